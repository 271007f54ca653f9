use async_trait::async_trait;
use url::Url;

use super::error::SignInError;
use super::provider::AuthorizationRequest;

/// Hands the authorization URL to the user (system browser, terminal
/// prompt) and waits for the provider to redirect back.
#[async_trait]
pub trait AuthorizationAgent: Send + Sync {
    /// Returns the redirect URL the provider sent the user to, or `None`
    /// when the user closed the prompt without finishing.
    async fn present(&self, request: &AuthorizationRequest) -> Result<Option<Url>, SignInError>;
}

/// Pull the authorization code out of a provider redirect.
///
/// The `state` must match the request that started the flow. A provider
/// `access_denied` counts as the user cancelling.
pub fn parse_redirect(
    redirect: &Url,
    request: &AuthorizationRequest,
) -> Result<String, SignInError> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        if error == "access_denied" {
            return Err(SignInError::Cancelled);
        }
        return Err(SignInError::Provider(match description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        }));
    }
    if state.as_deref() != Some(request.state.as_str()) {
        return Err(SignInError::StateMismatch);
    }
    code.filter(|c| !c.is_empty()).ok_or_else(|| {
        SignInError::Provider("authorization response is missing a code".to_string())
    })
}
