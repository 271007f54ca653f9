//! Token expiry policy, refresh, and identity extraction.
//!
//! Nothing here touches storage; callers persist whatever `refresh` returns.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::bundle::TokenBundle;
use super::error::RefreshError;
use super::provider::{IdentityProvider, TokenResponse};

/// Refresh this long before the access token's hard expiry, so a refresh
/// never races a 401 during an in-flight user action.
pub const REFRESH_BUFFER_MINUTES: i64 = 15;

const REFRESH_BUFFER_MILLIS: i64 = REFRESH_BUFFER_MINUTES * 60 * 1000;

/// Upper bound on a refresh-token grant.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Claims checked, in order, when looking for the signed-in user's email.
const IDENTITY_CLAIMS: &[&str] = &["email", "emails", "preferred_username", "upn", "unique_name"];

/// Whether `bundle` should be refreshed before use, judged at the current time.
pub fn is_expired(bundle: &TokenBundle) -> bool {
    is_expired_at(bundle, Utc::now().timestamp_millis())
}

/// Whether `bundle` should be refreshed before use, judged at `now_millis`.
///
/// Bundles without timing information are always expired.
pub fn is_expired_at(bundle: &TokenBundle, now_millis: i64) -> bool {
    match bundle.expiry_epoch_millis() {
        Some(expiry) => now_millis >= expiry - REFRESH_BUFFER_MILLIS,
        None => true,
    }
}

/// Time left before `bundle` enters the refresh window, for display.
/// Zero when already inside it.
pub fn time_until_refresh(bundle: &TokenBundle) -> chrono::Duration {
    match bundle.expiry_epoch_millis() {
        Some(expiry) => {
            let remaining = expiry - REFRESH_BUFFER_MILLIS - Utc::now().timestamp_millis();
            chrono::Duration::milliseconds(remaining.max(0))
        }
        None => chrono::Duration::zero(),
    }
}

/// Build a fresh bundle from a token endpoint response, stamped with the
/// current time.
///
/// `previous` supplies the refresh and ID tokens when the provider leaves
/// them out of a refresh response.
pub fn bundle_from_response(
    response: TokenResponse,
    previous: Option<&TokenBundle>,
) -> TokenBundle {
    TokenBundle {
        access_token: Some(response.access_token),
        id_token: response
            .id_token
            .or_else(|| previous.and_then(|p| p.id_token.clone())),
        refresh_token: response
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        expires_in_seconds: response.expires_in,
        issued_at_epoch_millis: Some(Utc::now().timestamp_millis()),
    }
}

/// Run the refresh-token grant for `bundle`.
///
/// Makes exactly one attempt. On failure the caller must treat the session
/// as unauthenticated rather than retry.
pub async fn refresh(
    bundle: &TokenBundle,
    provider: &dyn IdentityProvider,
) -> Result<TokenBundle, RefreshError> {
    let refresh_token = bundle
        .refresh_token
        .as_deref()
        .ok_or(RefreshError::MissingRefreshToken)?;

    debug!("Refreshing access token");
    let response = tokio::time::timeout(REFRESH_TIMEOUT, provider.refresh(refresh_token))
        .await
        .map_err(|_| RefreshError::TimedOut)?
        .map_err(|e| {
            warn!(error = %e, "Token refresh failed");
            RefreshError::from(e)
        })?;

    Ok(bundle_from_response(response, Some(bundle)))
}

/// The signed-in user's email, read from the access token's claims (or the
/// ID token's when there is no access token).
///
/// Malformed tokens yield `None`.
pub fn extract_identity(bundle: &TokenBundle) -> Option<String> {
    let token = bundle
        .access_token
        .as_deref()
        .or(bundle.id_token.as_deref())?;
    let claims = decode_claims(token)?;

    IDENTITY_CLAIMS
        .iter()
        .find_map(|claim| claims.get(*claim).and_then(claim_as_string))
}

/// Decode the payload segment of a `header.payload.signature` token.
/// The signature is not verified; the backend does that.
fn decode_claims(token: &str) -> Option<Map<String, Value>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    // Some providers pad their segments even though the format says not to
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(claims) => Some(claims),
        _ => None,
    }
}

fn claim_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(claim_as_string),
        _ => None,
    }
}
