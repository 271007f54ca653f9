use tracing::info;

use super::store::TokenStore;

/// Outcome of comparing the stored version marker to the running build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// First run or a different build: the stored session was wiped.
    Invalidated,
    Unchanged,
}

/// Wipes persisted sessions when the application version changes, so token
/// formats or scopes from an older build never outlive an upgrade.
pub struct VersionGuard;

impl VersionGuard {
    /// Must run before anything else reads the token bundle.
    pub async fn run(store: &TokenStore, current_version: &str) -> VersionCheck {
        let stored = store.load_version_marker().await;
        if stored.as_deref() == Some(current_version) {
            return VersionCheck::Unchanged;
        }

        info!(
            previous = stored.as_deref().unwrap_or("none"),
            current = current_version,
            "Application version changed, clearing stored session"
        );
        store.save(None).await;
        store.save_version_marker(current_version).await;
        VersionCheck::Invalidated
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::bundle::TokenBundle;
    use crate::auth::storage::MemoryStorage;

    fn stored_bundle() -> TokenBundle {
        TokenBundle {
            access_token: Some("a".to_string()),
            refresh_token: Some("r".to_string()),
            expires_in_seconds: Some(3600),
            issued_at_epoch_millis: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_run_writes_marker() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));

        assert_eq!(VersionGuard::run(&store, "1.0.0").await, VersionCheck::Invalidated);
        assert_eq!(store.load_version_marker().await.as_deref(), Some("1.0.0"));
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_version_mismatch_wipes_bundle() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));
        store.save(Some(&stored_bundle())).await;
        store.save_version_marker("1.0.0").await;

        assert_eq!(VersionGuard::run(&store, "1.1.0").await, VersionCheck::Invalidated);
        assert_eq!(store.load().await, None);
        assert_eq!(store.load_version_marker().await.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn test_matching_version_keeps_bundle() {
        let store = TokenStore::new(Arc::new(MemoryStorage::new()));
        store.save(Some(&stored_bundle())).await;
        store.save_version_marker("1.0.0").await;

        assert_eq!(VersionGuard::run(&store, "1.0.0").await, VersionCheck::Unchanged);
        assert_eq!(store.load().await, Some(stored_bundle()));
    }
}
