//! Core library for qrtrack.
//!
//! Owns the authentication session for the asset-tracking client: sign-in
//! through an OpenID Connect provider, token persistence and refresh, and
//! the authenticated backend API client built on top of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod utils;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError, User};
pub use auth::{SessionController, SessionState, TokenBundle, TokenStore};
pub use config::{Config, StorageBackend};
