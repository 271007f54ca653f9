//! qrtrack - command-line front end for the asset-tracking client.
//!
//! Builds the one `SessionController` for the process and exposes the
//! session operations: sign in, sign out, and inspect the current session.

mod agent;

use std::io;
use std::sync::Arc;

use anyhow::{bail, Result};
use qrtrack_core::auth::{
    OidcProvider, SessionController, SessionState, SignInOutcome, SignOutOutcome, TokenStore,
};
use qrtrack_core::{ApiClient, Config};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agent::TerminalAgent;

const USAGE: &str = "\
Usage: qrtrack <command>

Commands:
  login           Sign in through the identity provider
  logout          Sign out and revoke the session
  status [--json] Show the current session state
  whoami          Look up the signed-in user on the backend";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr (filtered by RUST_LOG, default `warn`) and to a daily
/// log file under the cache directory. The returned guard flushes the file
/// writer on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "qrtrack.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    info!(command, "qrtrack starting");
    let session = Arc::new(build_session(&config).await?);

    match command {
        "login" => login(&session, &mut config).await,
        "logout" => logout(&session).await,
        "status" => status(&session, &config, args.iter().any(|a| a == "--json")),
        "whoami" => whoami(session, &config).await,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

/// Composition root: storage, provider, and browser hand-off wired into
/// one initialized controller.
async fn build_session(config: &Config) -> Result<SessionController> {
    let store = TokenStore::new(config.open_storage()?);
    let provider = OidcProvider::new(config.oidc()?)?;

    let session = SessionController::start(
        store,
        Arc::new(provider),
        Arc::new(TerminalAgent),
        env!("CARGO_PKG_VERSION"),
    )
    .await;
    Ok(session)
}

async fn login(session: &SessionController, config: &mut Config) -> Result<()> {
    match session.sign_in().await? {
        SignInOutcome::AlreadyAuthenticated => {
            println!("Already signed in{}", identity_suffix(session));
        }
        SignInOutcome::SignedIn { identity } => {
            println!("Signed in{}", identity_suffix(session));
            if identity.is_some() && identity != config.last_identity {
                config.last_identity = identity;
                if let Err(e) = config.save() {
                    tracing::warn!(error = %e, "Failed to save config");
                }
            }
        }
    }
    Ok(())
}

async fn logout(session: &SessionController) -> Result<()> {
    match session.sign_out().await {
        SignOutOutcome::AlreadySignedOut => println!("Not signed in"),
        SignOutOutcome::SignedOut {
            revoked,
            end_session_url,
        } => {
            println!("Signed out");
            if !revoked {
                println!("(the identity provider could not be reached to revoke the session)");
            }
            if let Some(url) = end_session_url {
                println!(
                    "To also sign out of the identity provider in your browser, open:\n  {}",
                    url
                );
            }
        }
    }
    Ok(())
}

fn status(session: &SessionController, config: &Config, json: bool) -> Result<()> {
    let state = session.state();
    let identity = session.current_identity();
    let refresh_in = session.time_until_refresh();

    if json {
        let value = serde_json::json!({
            "state": state_label(state),
            "phase": session.phase().name(),
            "identity": identity,
            "refreshInSeconds": refresh_in.map(|d| d.num_seconds()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Session: {}", state_label(state));
    match (&identity, &config.last_identity) {
        (Some(identity), _) => println!("User:    {}", identity),
        (None, Some(last)) if state != SessionState::Authenticated => {
            println!("Last user: {}", last)
        }
        _ => {}
    }
    if let Some(remaining) = refresh_in {
        println!("Refresh: {}", format_remaining(remaining));
    }
    Ok(())
}

async fn whoami(session: Arc<SessionController>, config: &Config) -> Result<()> {
    if session.state() != SessionState::Authenticated {
        bail!("Not signed in. Run `qrtrack login` first.");
    }
    let api = ApiClient::new(config.api_base_url()?, session)?;
    match api.current_user().await? {
        Some(user) => {
            println!("{} <{}>", user.display_name(), user.email);
            if let Some(org) = &user.organization_id {
                println!("Organization: {}", org);
            }
        }
        None => println!("Signed in, but no backend user matches this account"),
    }
    Ok(())
}

fn identity_suffix(session: &SessionController) -> String {
    session
        .current_identity()
        .map(|email| format!(" as {}", email))
        .unwrap_or_default()
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Unknown => "unknown",
        SessionState::Authenticated => "authenticated",
        SessionState::Unauthenticated => "signed out",
    }
}

fn format_remaining(remaining: chrono::Duration) -> String {
    let minutes = remaining.num_minutes();
    if minutes <= 0 {
        "due now".to_string()
    } else if minutes < 60 {
        format!("in {}m", minutes)
    } else {
        format!("in {}h {}m", minutes / 60, minutes % 60)
    }
}
