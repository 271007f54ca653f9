//! API client for the asset-tracking backend.
//!
//! Every request is authorized through the shared `SessionController`.
//! The client refreshes a session that has entered its refresh window
//! before sending, and reports 401 responses back to the controller.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use super::models::User;
use super::ApiError;
use crate::auth::SessionController;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited or network-failed requests.
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds, doubled after each retry.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Backend API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: Arc<SessionController>,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(base_url: Url, session: Arc<SessionController>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_http_client(client, base_url, session))
    }

    /// Share an existing connection pool.
    pub fn with_http_client(
        client: Client,
        mut base_url: Url,
        session: Arc<SessionController>,
    ) -> Self {
        // Url::join replaces the last path segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            session,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    /// Send an authorized GET, retrying rate limits and network failures
    /// with exponential backoff. Other failures return immediately.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match self.get_once(&url).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < MAX_RETRIES => {
                    retries += 1;
                    warn!(
                        url = %url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ApiError> {
        if self.session.ensure_fresh().await.is_err() {
            // Refresh failure already signed the session out
            return Err(ApiError::Unauthorized);
        }

        let request = self.session.authorize(self.client.get(url.clone()));
        let response = request.send().await?;
        let response = self.check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
            })
    }

    /// Check if response is successful, returning an error with body if not.
    /// A 401 invalidates the session before the error is returned.
    async fn check_response(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.session.on_unauthorized().await;
            return Err(ApiError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }

    // ===== Identity =====

    /// Look up the backend user record for `email`. `None` when the backend
    /// has no such user.
    pub async fn fetch_user_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let mut url = self.endpoint("users")?;
        url.query_pairs_mut().append_pair("email", email);

        match self.get(url).await {
            Ok(user) => Ok(Some(user)),
            Err(ApiError::NotFound(_)) => {
                debug!("No backend user for signed-in identity");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The backend record for the signed-in user. Returns `None` without a
    /// network call when there is no session or its token has no identity.
    pub async fn current_user(&self) -> Result<Option<User>, ApiError> {
        match self.session.current_identity() {
            Some(email) => self.fetch_user_by_email(&email).await,
            None => Ok(None),
        }
    }
}
