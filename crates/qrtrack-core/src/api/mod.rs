//! REST API client module for the asset-tracking backend.
//!
//! This module provides the `ApiClient` for authenticated calls to the
//! backend. Requests carry the session's bearer token, and any 401 response
//! invalidates the session through `SessionController::on_unauthorized`.

pub mod client;
pub mod error;
pub mod models;

pub use client::ApiClient;
pub use error::ApiError;
pub use models::User;
