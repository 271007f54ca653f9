//! Authentication session lifecycle.
//!
//! This module provides:
//! - `TokenStore`: best-effort persistence of the token bundle and version
//!   marker over a pluggable `SecureStorage` backend (session file,
//!   keychain, encrypted file, memory)
//! - `lifecycle`: expiry policy (15-minute refresh buffer), refresh-token
//!   grant, and identity extraction from token claims
//! - `VersionGuard`: wipes stored sessions when the app version changes
//! - `SessionController`: the state machine that owns the current session
//! - `OidcProvider` / `AuthorizationAgent`: the identity provider and the
//!   browser hand-off used by interactive sign-in

pub mod agent;
pub mod bundle;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod pkce;
pub mod provider;
pub mod session;
pub mod storage;
pub mod store;
pub mod version;

pub use agent::{parse_redirect, AuthorizationAgent};
pub use bundle::TokenBundle;
pub use credentials::KeyringStorage;
pub use error::{ProviderError, RefreshError, SignInError};
pub use provider::{
    AuthorizationRequest, Discovery, IdentityProvider, OidcConfig, OidcProvider, TokenResponse,
};
pub use session::{
    RefreshOrigin, SessionController, SessionPhase, SessionState, SignInOutcome, SignOutOutcome,
};
pub use storage::{EncryptedFileStorage, MemoryStorage, SecureStorage, SessionFileStorage};
pub use store::{StorageError, TokenStore};
pub use version::{VersionCheck, VersionGuard};
