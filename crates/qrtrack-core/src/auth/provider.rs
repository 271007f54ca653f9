//! OAuth2 / OpenID Connect identity provider client.
//!
//! `IdentityProvider` is the seam the session controller talks through;
//! `OidcProvider` is the real implementation over reqwest. Endpoints come
//! from the provider's discovery document, fetched once and cached.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use super::error::ProviderError;
use super::pkce;
use crate::utils::truncate_body;

/// HTTP request timeout in seconds for identity provider calls
const REQUEST_TIMEOUT_SECS: u64 = 30;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Identity provider settings for one deployment.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: Url,
    pub client_id: String,
    pub redirect_uri: Url,
    /// Where the provider sends the browser after ending its own session
    pub logout_uri: Option<Url>,
    pub scopes: Vec<String>,
}

impl OidcConfig {
    pub fn new(issuer: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            redirect_uri,
            logout_uri: None,
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
        }
    }

    #[must_use]
    pub fn with_logout_uri(mut self, logout_uri: Url) -> Self {
        self.logout_uri = Some(logout_uri);
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Location of the discovery document under the issuer.
    pub fn discovery_url(&self) -> Result<Url, ProviderError> {
        let base = format!("{}/", self.issuer.as_str().trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|base| base.join(DISCOVERY_PATH))
            .map_err(|e| ProviderError::Discovery(format!("invalid issuer URL: {}", e)))
    }
}

/// The subset of the OpenID discovery document the session flow uses.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub revocation_endpoint: Option<Url>,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
}

/// Token endpoint response, for both code exchange and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// An authorization URL plus the PKCE secrets needed to finish the flow.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub code_verifier: String,
    pub redirect_uri: Url,
}

/// Operations the session controller needs from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build an authorization-code-with-PKCE request.
    async fn authorization_request(&self) -> Result<AuthorizationRequest, ProviderError>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, ProviderError>;

    /// Run the refresh-token grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError>;

    /// Revoke a token server-side.
    async fn revoke(&self, token: &str) -> Result<(), ProviderError>;

    /// URL that ends the provider's browser session, if it has one.
    async fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<Url>;
}

/// `IdentityProvider` for a standards-compliant OIDC issuer.
pub struct OidcProvider {
    config: OidcConfig,
    http: Client,
    discovery: OnceCell<Discovery>,
}

impl OidcProvider {
    pub fn new(config: OidcConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::network("client setup", e))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Use a custom HTTP client (for connection pool reuse).
    pub fn with_http_client(config: OidcConfig, http: Client) -> Self {
        Self {
            config,
            http,
            discovery: OnceCell::new(),
        }
    }

    /// Skip discovery and use known endpoints, for providers that do not
    /// publish a discovery document.
    #[must_use]
    pub fn with_discovery(self, discovery: Discovery) -> Self {
        Self {
            discovery: OnceCell::from(discovery),
            ..self
        }
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    async fn discovery(&self) -> Result<&Discovery, ProviderError> {
        self.discovery
            .get_or_try_init(|| self.fetch_discovery())
            .await
    }

    async fn fetch_discovery(&self) -> Result<Discovery, ProviderError> {
        let url = self.config.discovery_url()?;
        debug!(url = %url, "Fetching provider discovery document");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::network("discovery", e))?;
        let response = Self::ensure_success(response, "discovery").await?;
        response
            .json::<Discovery>()
            .await
            .map_err(|e| ProviderError::Discovery(e.to_string()))
    }

    async fn token_request(
        &self,
        operation: &'static str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, ProviderError> {
        let endpoint = self.discovery().await?.token_endpoint.clone();
        let response = self
            .http
            .post(endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| ProviderError::network(operation, e))?;

        let response = Self::ensure_success(response, operation).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    /// Checks HTTP response status; returns the response on success or an
    /// error with the (truncated) body otherwise.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ProviderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            operation,
            status,
            detail: truncate_body(&body),
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    async fn authorization_request(&self) -> Result<AuthorizationRequest, ProviderError> {
        let discovery = self.discovery().await?;

        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scope = self.config.scopes.join(" ");

        let mut url = discovery.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("scope", &scope);

        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier,
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        let tokens = self.token_request("code exchange", &params).await?;
        info!("Authorization code exchanged for tokens");
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        self.token_request("token refresh", &params).await
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderError> {
        let endpoint = self
            .discovery()
            .await?
            .revocation_endpoint
            .clone()
            .ok_or(ProviderError::MissingEndpoint("revocation"))?;

        let params = [
            ("token", token),
            ("token_type_hint", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .http
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::network("revocation", e))?;
        Self::ensure_success(response, "revocation").await?;
        Ok(())
    }

    async fn end_session_url(&self, id_token_hint: Option<&str>) -> Option<Url> {
        let discovery = match self.discovery().await {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(error = %e, "Cannot build end-session URL");
                return None;
            }
        };
        let mut url = discovery.end_session_endpoint.clone()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            if let Some(logout_uri) = &self.config.logout_uri {
                query.append_pair("post_logout_redirect_uri", logout_uri.as_str());
            }
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
        }
        Some(url)
    }
}
