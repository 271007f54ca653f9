use thiserror::Error;

/// Failure talking to the identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error during {operation}: {detail}")]
    Network {
        operation: &'static str,
        detail: String,
    },

    #[error("Identity provider rejected {operation} (status {status}): {detail}")]
    Rejected {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Failed to load provider discovery document: {0}")]
    Discovery(String),

    #[error("Provider does not advertise a {0} endpoint")]
    MissingEndpoint(&'static str),

    #[error("Invalid response from identity provider: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Build a `Network` error from a reqwest failure, keeping the
    /// operation name for log context.
    pub fn network(operation: &'static str, err: reqwest::Error) -> Self {
        ProviderError::Network {
            operation,
            detail: err.to_string(),
        }
    }
}

/// Refresh-token grant failed. The session is treated as unauthenticated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Network error while refreshing: {0}")]
    Network(String),

    #[error("Refresh rejected by identity provider: {0}")]
    Rejected(String),

    #[error("Refresh timed out")]
    TimedOut,

    #[error("Session was invalidated while the refresh was in flight")]
    Superseded,
}

impl From<ProviderError> for RefreshError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Network { detail, .. } => RefreshError::Network(detail),
            other => RefreshError::Rejected(other.to_string()),
        }
    }
}

/// Interactive sign-in failed or was abandoned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignInError {
    #[error("Sign-in was cancelled")]
    Cancelled,

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Network error during sign-in: {0}")]
    Network(String),

    #[error("Authorization response state did not match the request")]
    StateMismatch,

    #[error("Sign-in timed out")]
    TimedOut,
}

impl From<ProviderError> for SignInError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Network { detail, .. } => SignInError::Network(detail),
            other => SignInError::Provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_network_error_maps_to_network_outcomes() {
        let err = ProviderError::Network {
            operation: "token refresh",
            detail: "connection reset".to_string(),
        };
        assert_eq!(
            RefreshError::from(err.clone()),
            RefreshError::Network("connection reset".to_string())
        );
        assert_eq!(
            SignInError::from(err),
            SignInError::Network("connection reset".to_string())
        );
    }

    #[test]
    fn test_provider_rejection_maps_to_rejected_outcomes() {
        let err = ProviderError::Rejected {
            operation: "token refresh",
            status: 400,
            detail: "invalid_grant".to_string(),
        };
        assert!(matches!(
            RefreshError::from(err.clone()),
            RefreshError::Rejected(msg) if msg.contains("invalid_grant")
        ));
        assert!(matches!(
            SignInError::from(err),
            SignInError::Provider(msg) if msg.contains("400")
        ));
    }
}
