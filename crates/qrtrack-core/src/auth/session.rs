use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use super::agent::{parse_redirect, AuthorizationAgent};
use super::bundle::TokenBundle;
use super::error::{RefreshError, SignInError};
use super::lifecycle;
use super::provider::IdentityProvider;
use super::store::TokenStore;
use super::version::{VersionCheck, VersionGuard};

/// How long the user gets to finish the browser step of sign-in.
pub const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound on code exchange and revocation calls.
const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// What consumers see of the session.
///
/// `Unknown` means storage has not been checked yet, so a consumer should
/// neither show the app nor redirect to sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOrigin {
    /// Hydrating a stored bundle at startup
    Startup,
    /// An authenticated session entered its refresh window
    Proactive,
}

/// Where the session controller is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Refreshing {
        stale: TokenBundle,
        origin: RefreshOrigin,
    },
    Authenticated {
        bundle: TokenBundle,
    },
    Unauthenticated,
    SigningIn {
        /// Session that stays in force if this attempt fails
        previous: Option<TokenBundle>,
    },
    SigningOut,
}

impl SessionPhase {
    pub fn state(&self) -> SessionState {
        match self {
            SessionPhase::Initializing => SessionState::Unknown,
            SessionPhase::Refreshing { origin, .. } => match origin {
                RefreshOrigin::Startup => SessionState::Unknown,
                RefreshOrigin::Proactive => SessionState::Authenticated,
            },
            SessionPhase::Authenticated { .. } => SessionState::Authenticated,
            SessionPhase::SigningIn { previous: Some(_) } => SessionState::Authenticated,
            SessionPhase::SigningIn { previous: None }
            | SessionPhase::SigningOut
            | SessionPhase::Unauthenticated => SessionState::Unauthenticated,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Initializing => "initializing",
            SessionPhase::Refreshing { .. } => "refreshing",
            SessionPhase::Authenticated { .. } => "authenticated",
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::SigningIn { .. } => "signing_in",
            SessionPhase::SigningOut => "signing_out",
        }
    }

    /// The bundle requests may be authorized with right now.
    fn usable_bundle(&self) -> Option<&TokenBundle> {
        match self {
            SessionPhase::Authenticated { bundle } => Some(bundle),
            SessionPhase::Refreshing {
                stale,
                origin: RefreshOrigin::Proactive,
            } => Some(stale),
            SessionPhase::SigningIn { previous } => previous.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    AlreadyAuthenticated,
    SignedIn { identity: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutOutcome {
    AlreadySignedOut,
    SignedOut {
        /// Whether the provider confirmed revocation
        revoked: bool,
        /// Page that ends the provider's browser session, for the UI to open
        end_session_url: Option<Url>,
    },
}

/// What `on_unauthorized` took the credential away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invalidated {
    /// No operation in flight
    Idle,
    Refresh,
    /// Re-authentication that would have fallen back to this session
    SignIn,
}

/// Owns the current session and is its only mutator.
///
/// Every mutating operation (initialization, refresh, sign-in, sign-out)
/// runs under one FIFO gate, so they queue instead of interleaving.
/// `on_unauthorized` is the exception: it drops the in-memory credential
/// immediately and bumps a generation counter. A refresh that sees the
/// counter move discards its result, so a 401 always wins over a late
/// success. Storage is only written under the gate.
pub struct SessionController {
    store: TokenStore,
    provider: Arc<dyn IdentityProvider>,
    agent: Arc<dyn AuthorizationAgent>,
    app_version: String,
    sign_in_timeout: Duration,
    gate: Mutex<()>,
    phase: watch::Sender<SessionPhase>,
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
}

impl SessionController {
    pub fn new(
        store: TokenStore,
        provider: Arc<dyn IdentityProvider>,
        agent: Arc<dyn AuthorizationAgent>,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Initializing);
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            store,
            provider,
            agent,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            sign_in_timeout: SIGN_IN_TIMEOUT,
            gate: Mutex::new(()),
            phase,
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// Version compared against the stored marker at startup.
    #[must_use]
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    #[must_use]
    pub fn with_sign_in_timeout(mut self, timeout: Duration) -> Self {
        self.sign_in_timeout = timeout;
        self
    }

    /// Construct and initialize in one step.
    pub async fn start(
        store: TokenStore,
        provider: Arc<dyn IdentityProvider>,
        agent: Arc<dyn AuthorizationAgent>,
        app_version: impl Into<String>,
    ) -> Self {
        let controller = Self::new(store, provider, agent).with_app_version(app_version);
        controller.initialize().await;
        controller
    }

    // ===== Observation =====

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that sees every state change in the order it was applied.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    /// Email of the signed-in user. `None` unless authenticated and the
    /// token carries an identity claim.
    ///
    /// A bundle without a readable identity still counts as authenticated:
    /// opaque access tokens are valid bearer credentials. Only the identity
    /// surface treats it as signed out.
    pub fn current_identity(&self) -> Option<String> {
        if self.state() != SessionState::Authenticated {
            return None;
        }
        self.phase
            .borrow()
            .usable_bundle()
            .and_then(lifecycle::extract_identity)
    }

    /// Time until the current bundle enters its refresh window.
    pub fn time_until_refresh(&self) -> Option<chrono::Duration> {
        self.phase
            .borrow()
            .usable_bundle()
            .map(lifecycle::time_until_refresh)
    }

    /// Attach the current access token as a bearer credential. Without a
    /// session the request goes out unchanged.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn access_token(&self) -> Option<String> {
        self.phase
            .borrow()
            .usable_bundle()
            .and_then(|bundle| bundle.access_token.clone())
    }

    // ===== Mutations =====

    /// Run the version check, then hydrate from storage, refreshing a
    /// stored bundle that is expired or about to be. Later calls are no-ops.
    pub async fn initialize(&self) -> SessionState {
        let _gate = self.gate.lock().await;
        self.ensure_initialized().await;
        self.state()
    }

    /// Refresh an authenticated session that has entered its refresh window.
    /// Does nothing otherwise.
    pub async fn ensure_fresh(&self) -> Result<(), RefreshError> {
        if !self.needs_refresh() {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        // Another caller may have refreshed while this one waited
        let stale = match &*self.phase.borrow() {
            SessionPhase::Authenticated { bundle } if lifecycle::is_expired(bundle) => {
                bundle.clone()
            }
            _ => return Ok(()),
        };
        self.refresh_session(stale, RefreshOrigin::Proactive).await
    }

    /// Start interactive sign-in. Succeeds immediately when already
    /// authenticated.
    pub async fn sign_in(&self) -> Result<SignInOutcome, SignInError> {
        let _gate = self.gate.lock().await;
        self.ensure_initialized().await;
        if self.state() == SessionState::Authenticated {
            debug!("Sign-in requested while authenticated");
            return Ok(SignInOutcome::AlreadyAuthenticated);
        }
        self.run_sign_in().await
    }

    /// Run interactive sign-in even when a session exists, e.g. to switch
    /// accounts. A failed attempt leaves the existing session in force.
    pub async fn reauthenticate(&self) -> Result<SignInOutcome, SignInError> {
        let _gate = self.gate.lock().await;
        self.ensure_initialized().await;
        self.run_sign_in().await
    }

    /// End the session: revoke server-side (best effort), then clear local
    /// state. Performs no I/O when already signed out.
    pub async fn sign_out(&self) -> SignOutOutcome {
        let _gate = self.gate.lock().await;
        self.ensure_initialized().await;

        let bundle = match self.phase.borrow().usable_bundle() {
            Some(bundle) => bundle.clone(),
            None => return SignOutOutcome::AlreadySignedOut,
        };
        self.transition(SessionPhase::SigningOut);

        let revoked = match bundle.revocable_token() {
            Some(token) => {
                match tokio::time::timeout(NETWORK_TIMEOUT, self.provider.revoke(token)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Token revocation failed, clearing session anyway");
                        false
                    }
                    Err(_) => {
                        warn!("Token revocation timed out, clearing session anyway");
                        false
                    }
                }
            }
            None => false,
        };
        let end_session_url = self.provider.end_session_url(bundle.id_token.as_deref()).await;

        self.store.save(None).await;
        self.transition(SessionPhase::Unauthenticated);
        info!(revoked, "Signed out");

        SignOutOutcome::SignedOut {
            revoked,
            end_session_url,
        }
    }

    /// The backend rejected our credentials. Clears the session; this
    /// always wins over a refresh still in flight.
    ///
    /// Ignored when no credential could have been attached, e.g. before
    /// initialization or during a first sign-in. Never waits behind an
    /// interactive sign-in.
    pub async fn on_unauthorized(&self) {
        let Some(invalidated) = self.drop_credential() else {
            debug!(
                phase = self.phase.borrow().name(),
                "Unauthorized response without a session credential, ignoring"
            );
            return;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        warn!(?invalidated, "Credentials rejected, clearing session");

        match invalidated {
            // The operation in flight persists the outcome when it finishes
            Invalidated::Refresh | Invalidated::SignIn => {}
            Invalidated::Idle => {
                let _gate = self.gate.lock().await;
                let signed_out = self.phase.borrow().usable_bundle().is_none();
                if signed_out {
                    self.store.save(None).await;
                }
            }
        }
    }

    // ===== Internals =====

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn needs_refresh(&self) -> bool {
        matches!(
            &*self.phase.borrow(),
            SessionPhase::Authenticated { bundle } if lifecycle::is_expired(bundle)
        )
    }

    fn transition(&self, next: SessionPhase) {
        debug!(phase = next.name(), state = ?next.state(), "Session transition");
        self.phase.send_replace(next);
        self.publish_state();
    }

    /// Bring the public state in line with the current phase.
    fn publish_state(&self) {
        self.state.send_if_modified(|current| {
            let state = self.phase.borrow().state();
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Remove the credential `authorize` would attach, without the gate.
    fn drop_credential(&self) -> Option<Invalidated> {
        let mut invalidated = None;
        self.phase.send_if_modified(|phase| {
            invalidated = match phase {
                SessionPhase::Authenticated { .. } => Some(Invalidated::Idle),
                SessionPhase::Refreshing {
                    origin: RefreshOrigin::Proactive,
                    ..
                } => Some(Invalidated::Refresh),
                SessionPhase::SigningIn { previous: Some(_) } => Some(Invalidated::SignIn),
                _ => None,
            };
            match invalidated {
                Some(Invalidated::SignIn) => *phase = SessionPhase::SigningIn { previous: None },
                Some(_) => *phase = SessionPhase::Unauthenticated,
                None => {}
            }
            invalidated.is_some()
        });
        if invalidated.is_some() {
            self.publish_state();
        }
        invalidated
    }

    async fn clear_session(&self) {
        self.store.save(None).await;
        self.transition(SessionPhase::Unauthenticated);
    }

    async fn ensure_initialized(&self) {
        if *self.phase.borrow() != SessionPhase::Initializing {
            return;
        }

        let stored = match VersionGuard::run(&self.store, &self.app_version).await {
            VersionCheck::Invalidated => None,
            VersionCheck::Unchanged => self.store.load().await,
        };

        match stored {
            None => {
                info!("No stored session");
                self.transition(SessionPhase::Unauthenticated);
            }
            Some(bundle) if !lifecycle::is_expired(&bundle) => {
                info!("Restored stored session");
                self.transition(SessionPhase::Authenticated { bundle });
            }
            Some(bundle) => {
                info!("Stored session needs refresh");
                // The outcome is reflected in the phase
                let _ = self.refresh_session(bundle, RefreshOrigin::Startup).await;
            }
        }
    }

    async fn refresh_session(
        &self,
        stale: TokenBundle,
        origin: RefreshOrigin,
    ) -> Result<(), RefreshError> {
        let generation = self.generation();
        self.transition(SessionPhase::Refreshing {
            stale: stale.clone(),
            origin,
        });

        let result = lifecycle::refresh(&stale, self.provider.as_ref()).await;

        if self.generation() != generation {
            warn!("Session invalidated during refresh, discarding result");
            self.clear_session().await;
            return Err(RefreshError::Superseded);
        }

        match result {
            Ok(bundle) => {
                self.store.save(Some(&bundle)).await;
                self.transition(SessionPhase::Authenticated { bundle });
                info!("Session refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed, signing out");
                self.clear_session().await;
                Err(e)
            }
        }
    }

    async fn run_sign_in(&self) -> Result<SignInOutcome, SignInError> {
        let previous = self.phase.borrow().usable_bundle().cloned();
        let had_session = previous.is_some();
        self.transition(SessionPhase::SigningIn { previous });

        let result = self.authorize_interactively().await;

        match result {
            Ok(bundle) => {
                self.store.save(Some(&bundle)).await;
                let identity = lifecycle::extract_identity(&bundle);
                self.transition(SessionPhase::Authenticated { bundle });
                info!(has_identity = identity.is_some(), "Signed in");
                Ok(SignInOutcome::SignedIn { identity })
            }
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                // A 401 during the attempt takes the fallback session away
                let fallback = match &*self.phase.borrow() {
                    SessionPhase::SigningIn { previous } => previous.clone(),
                    _ => None,
                };
                match fallback {
                    Some(bundle) => self.transition(SessionPhase::Authenticated { bundle }),
                    None if had_session => self.clear_session().await,
                    None => self.transition(SessionPhase::Unauthenticated),
                }
                Err(e)
            }
        }
    }

    async fn authorize_interactively(&self) -> Result<TokenBundle, SignInError> {
        let request = self.provider.authorization_request().await?;

        let redirect = tokio::time::timeout(self.sign_in_timeout, self.agent.present(&request))
            .await
            .map_err(|_| SignInError::TimedOut)??
            .ok_or(SignInError::Cancelled)?;
        let code = parse_redirect(&redirect, &request)?;

        let tokens = tokio::time::timeout(
            NETWORK_TIMEOUT,
            self.provider.exchange_code(&code, &request.code_verifier),
        )
        .await
        .map_err(|_| SignInError::TimedOut)??;

        Ok(lifecycle::bundle_from_response(tokens, None))
    }
}
