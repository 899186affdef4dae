use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::AppError;

/// An OAuth access token together with the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Something that can mint a fresh access token (an upstream round trip).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, AppError>;
}

/// Caches one access token and refreshes it shortly before expiry.
///
/// The slot is guarded by an async mutex that stays held across the refresh,
/// so callers that miss at the same time share a single upstream fetch.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    slot: Mutex<Option<AccessToken>>,
    refresh_margin: Duration,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self::with_margin(source, Duration::seconds(60))
    }

    pub fn with_margin(source: Arc<dyn TokenSource>, refresh_margin: Duration) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
            refresh_margin,
        }
    }

    /// Return a valid token value, fetching a new one if needed.
    pub async fn get(&self) -> Result<String, AppError> {
        let mut slot = self.slot.lock().await;

        if let Some(token) = slot.as_ref() {
            if token.expires_at - self.refresh_margin > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("refreshing access token");
        let token = self.source.fetch_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Drop the cached token, e.g. after the upstream rejected it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// Google service-account tokens via `gcp_auth`.
pub struct GcpTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
    scopes: Vec<&'static str>,
}

impl GcpTokenSource {
    pub fn new(provider: Arc<dyn gcp_auth::TokenProvider>, scopes: Vec<&'static str>) -> Self {
        Self { provider, scopes }
    }

    /// Load a service account from a key file, or fall back to the ambient
    /// credentials chain (`GOOGLE_APPLICATION_CREDENTIALS`, metadata server, gcloud).
    pub async fn from_credentials(
        credentials_path: Option<&str>,
        scopes: Vec<&'static str>,
    ) -> Result<Self, AppError> {
        let provider: Arc<dyn gcp_auth::TokenProvider> = match credentials_path {
            Some(path) => Arc::new(
                gcp_auth::CustomServiceAccount::from_file(path).map_err(|e| {
                    AppError::Upstream(format!("Failed to load service account '{}': {}", path, e))
                })?,
            ),
            None => gcp_auth::provider()
                .await
                .map_err(|e| AppError::Upstream(format!("No Google credentials found: {e}")))?,
        };
        Ok(Self::new(provider, scopes))
    }
}

#[async_trait]
impl TokenSource for GcpTokenSource {
    async fn fetch_token(&self) -> Result<AccessToken, AppError> {
        let token = self
            .provider
            .token(&self.scopes)
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to obtain access token: {e}")))?;

        Ok(AccessToken {
            value: token.as_str().to_string(),
            expires_at: token.expires_at(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    impl CountingSource {
        fn new(lifetime: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime,
            }
        }
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_token(&self) -> Result<AccessToken, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Give concurrent callers a chance to pile up behind the lock.
            tokio::task::yield_now().await;
            Ok(AccessToken {
                value: format!("token-{n}"),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    #[tokio::test]
    async fn test_reuses_valid_token() {
        let source = Arc::new(CountingSource::new(Duration::hours(1)));
        let cache = TokenCache::new(source.clone());

        assert_eq!(cache.get().await.unwrap(), "token-1");
        assert_eq!(cache.get().await.unwrap(), "token-1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_inside_margin() {
        // Lifetime shorter than the margin: every call is a miss.
        let source = Arc::new(CountingSource::new(Duration::seconds(30)));
        let cache = TokenCache::new(source.clone());

        assert_eq!(cache.get().await.unwrap(), "token-1");
        assert_eq!(cache.get().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let source = Arc::new(CountingSource::new(Duration::hours(1)));
        let cache = Arc::new(TokenCache::new(source.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await.unwrap() })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "token-1");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = Arc::new(CountingSource::new(Duration::hours(1)));
        let cache = TokenCache::new(source.clone());

        cache.get().await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.get().await.unwrap(), "token-2");
    }
}
