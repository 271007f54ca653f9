use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use qrtrack_core::auth::{AuthorizationAgent, AuthorizationRequest, SignInError};
use tracing::debug;
use url::Url;

/// Browser hand-off for a terminal: print the authorization URL, then read
/// back the URL the browser was redirected to. An empty line cancels.
pub struct TerminalAgent;

#[async_trait]
impl AuthorizationAgent for TerminalAgent {
    async fn present(&self, request: &AuthorizationRequest) -> Result<Option<Url>, SignInError> {
        let url = request.url.to_string();
        let redirect_prefix = request.redirect_uri.to_string();

        let line = tokio::task::spawn_blocking(move || prompt(&url, &redirect_prefix))
            .await
            .map_err(|e| SignInError::Provider(format!("prompt task failed: {}", e)))?
            .map_err(|e| SignInError::Provider(format!("could not read from terminal: {}", e)))?;

        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let redirect = Url::parse(line)
            .map_err(|e| SignInError::Provider(format!("not a valid redirect URL: {}", e)))?;
        debug!(scheme = redirect.scheme(), "Redirect URL received");
        Ok(Some(redirect))
    }
}

fn prompt(url: &str, redirect_prefix: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    writeln!(stderr, "Open this URL in your browser to sign in:\n\n  {}\n", url)?;
    writeln!(
        stderr,
        "After signing in, paste the address you were sent to (starts with {}).",
        redirect_prefix
    )?;
    write!(stderr, "Redirect URL (empty to cancel): ")?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
