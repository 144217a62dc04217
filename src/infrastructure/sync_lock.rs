// Per-user mutual-exclusion token with TTL. Grounded on
// `infrastructure/cache_layer.rs`'s `CacheEntry { inserted_at, ttl,
// is_expired() }`, repurposed from a value cache into a keyed lock table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    inserted_at: Instant,
    ttl: Duration,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// A held lock; dropping it does not release — callers must call
/// `SyncLock::release` explicitly so release remains an observable,
/// idempotent operation on every exit path under the release-always
/// propagation policy.
#[derive(Debug, Clone)]
pub struct LockToken {
    pub key: String,
    pub token: String,
}

#[derive(Clone)]
pub struct SyncLock {
    entries: Arc<RwLock<HashMap<String, LockEntry>>>,
    default_ttl: Duration,
}

impl SyncLock {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    pub fn key_for_wallet(wallet: &str) -> String {
        format!("nodeSync:{wallet}")
    }

    #[instrument(skip(self))]
    pub async fn acquire(&self, key: &str) -> AppResult<LockToken> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(key) {
            if !existing.is_expired() {
                return Err(AppError::Locked(format!("{key} is held")));
            }
        }

        let token = Uuid::new_v4().to_string();
        entries.insert(
            key.to_string(),
            LockEntry {
                token: token.clone(),
                inserted_at: Instant::now(),
                ttl: self.default_ttl,
            },
        );

        Ok(LockToken {
            key: key.to_string(),
            token,
        })
    }

    /// Idempotent: releasing an already-released or expired lock is a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self, lock: &LockToken) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&lock.key) {
            if existing.token == lock.token {
                entries.remove(&lock.key);
            }
        }
        Ok(())
    }

    /// Read-only probe for `/sync_status`: never takes
    /// the lock, never fails.
    pub async fn is_held(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| !e.is_expired()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_blocks_concurrent_holder() {
        let lock = SyncLock::new(Duration::from_secs(60));
        let key = SyncLock::key_for_wallet("0xabc");
        let first = lock.acquire(&key).await.unwrap();
        assert!(lock.is_held(&key).await);

        let second = lock.acquire(&key).await;
        assert!(matches!(second, Err(AppError::Locked(_))));

        lock.release(&first).await.unwrap();
        assert!(!lock.is_held(&key).await);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let lock = SyncLock::new(Duration::from_secs(60));
        let key = SyncLock::key_for_wallet("0xabc");
        let token = lock.acquire(&key).await.unwrap();
        lock.release(&token).await.unwrap();
        lock.release(&token).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let lock = SyncLock::new(Duration::from_millis(10));
        let key = SyncLock::key_for_wallet("0xabc");
        let _first = lock.acquire(&key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = lock.acquire(&key).await;
        assert!(second.is_ok());
    }
}
