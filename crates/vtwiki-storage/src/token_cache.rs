//! Shared cache for platform app-access tokens.

use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Tokens are treated as expired this long before the platform says so.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_in: Duration,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Read-mostly token cache. On a miss the caller fetches a token without
/// holding any lock and stores it; concurrent misses may refresh twice,
/// which is accepted.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cached(&self) -> Option<String> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|token| token.expires_at > Instant::now())
            .map(|token| token.value.clone())
    }

    pub async fn store(&self, token: AccessToken) -> String {
        let lifetime = token.expires_in.saturating_sub(EXPIRY_MARGIN);
        let mut current = self.current.write().await;
        *current = Some(CachedToken {
            value: token.value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        token.value
    }

    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    /// Returns the cached token or fetches, caches and returns a new one.
    pub async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, E>>,
    {
        if let Some(token) = self.cached().await {
            return Ok(token);
        }
        debug!("access token cache miss, refreshing");
        let token = fetch().await?;
        Ok(self.store(token).await)
    }
}
