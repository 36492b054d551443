//! Short-lived credential cache keyed by device identifier.
//!
//! Entries expire at the earlier of the provider's `expires_in` (less a safety margin)
//! and the configured ceiling. Shared across tasks via `Arc<RwLock<..>>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::models::Credentials;

const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedCredentials {
    credentials: Credentials,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<RwLock<HashMap<String, CachedCredentials>>>,
    max_ttl: Duration,
}

impl TokenCache {
    pub fn new(max_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_ttl,
        }
    }

    /// Cached credentials for a device, if still fresh.
    pub async fn get(&self, device_id: &str) -> Option<Credentials> {
        let map = self.inner.read().await;
        map.get(device_id)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.credentials.clone())
    }

    pub async fn insert(&self, device_id: &str, credentials: Credentials) {
        let ttl = self.ttl_for(&credentials);
        if ttl.is_zero() {
            return;
        }
        let mut map = self.inner.write().await;
        map.insert(
            device_id.to_string(),
            CachedCredentials {
                credentials,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop a device's entry, e.g. after the provider refused its token.
    pub async fn invalidate(&self, device_id: &str) {
        let mut map = self.inner.write().await;
        map.remove(device_id);
    }

    fn ttl_for(&self, credentials: &Credentials) -> Duration {
        match credentials.expires_in {
            Some(secs) => Duration::from_secs(secs)
                .saturating_sub(EXPIRY_MARGIN)
                .min(self.max_ttl),
            None => self.max_ttl,
        }
    }
}
