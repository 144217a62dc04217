// Debounced queue: after every successful primary write, schedule a sync
// call to each secondary in the user's replica set. Grounded
// on `infrastructure/service_discovery.rs::start_cleanup_process`'s
// `tokio::spawn` + `interval` reaper loop, replacing its TTL-expiry sweep
// with a due-deadline drain over a keyed task store
// (`wallet -> (deadline, epoch)`, not per-wallet runtime timers).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::error::AppResult;
use crate::infrastructure::peer_client::PeerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Block until the secondary's import completes; used by migration
    /// flows that need consistency before continuing.
    Immediate,
    /// Enqueue a deferred task; a later trigger for the same wallet before
    /// the timer fires cancels and reschedules it.
    Debounced,
}

struct PendingEntry {
    deadline: Instant,
    epoch: u64,
    creator_node_endpoint: String,
}

/// Enqueues best-effort secondary pulls. Holds no reference to a local
/// `SyncWorker` (a primary doesn't import from itself) — it calls the
/// secondary's `/sync` endpoint over HTTP.
pub struct SyncTrigger {
    pending: Arc<RwLock<HashMap<String, PendingEntry>>>,
    peer_client: PeerClient,
    debounce: Duration,
    next_epoch: std::sync::atomic::AtomicU64,
}

impl SyncTrigger {
    pub fn new(peer_client: PeerClient, debounce: Duration) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            peer_client,
            debounce,
            next_epoch: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// `mode = Immediate` blocks until every secondary's sync call returns
    /// (or errors, which is logged, not propagated: a single failed
    /// secondary push is non-fatal to the triggering write).
    #[instrument(skip(self, secondaries))]
    pub async fn notify(
        &self,
        wallet: &str,
        creator_node_endpoint: &str,
        secondaries: &[String],
        mode: TriggerMode,
    ) -> AppResult<()> {
        match mode {
            TriggerMode::Immediate => {
                for secondary in secondaries {
                    if let Err(e) = self
                        .peer_client
                        .trigger_sync(secondary, &[wallet.to_string()], creator_node_endpoint)
                        .await
                    {
                        warn!("immediate sync trigger to {secondary} failed for {wallet}: {e}");
                    }
                }
                Ok(())
            }
            TriggerMode::Debounced => {
                self.enqueue(wallet, creator_node_endpoint).await;
                Ok(())
            }
        }
    }

    async fn enqueue(&self, wallet: &str, creator_node_endpoint: &str) {
        let epoch = self
            .next_epoch
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut pending = self.pending.write().await;
        pending.insert(
            wallet.to_string(),
            PendingEntry {
                deadline: Instant::now() + self.debounce,
                epoch,
                creator_node_endpoint: creator_node_endpoint.to_string(),
            },
        );
    }

    /// Cancels a wallet's pending timer.
    pub async fn cancel(&self, wallet: &str) {
        self.pending.write().await.remove(wallet);
    }

    async fn is_still_current(&self, wallet: &str, epoch: u64) -> bool {
        self.pending
            .read()
            .await
            .get(wallet)
            .map(|e| e.epoch == epoch)
            .unwrap_or(false)
    }

    /// Starts the background reaper that drains due entries and fires a
    /// best-effort secondary pull for each, one worker per due wallet.
    /// Secondaries are resolved by the caller per tick (the registry's
    /// replica-set membership can change between writes).
    pub fn spawn_reaper<F, Fut>(self: &Arc<Self>, resolve_secondaries: F, tick: Duration)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Vec<String>> + Send,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                this.fire_due(&resolve_secondaries).await;
            }
        });
    }

    async fn fire_due<F, Fut>(&self, resolve_secondaries: &F)
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Vec<String>>,
    {
        let now = Instant::now();
        let due: Vec<(String, u64, String)> = {
            let pending = self.pending.read().await;
            pending
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(wallet, e)| (wallet.clone(), e.epoch, e.creator_node_endpoint.clone()))
                .collect()
        };

        for (wallet, epoch, creator_node_endpoint) in due {
            if !self.is_still_current(&wallet, epoch).await {
                continue;
            }
            self.pending.write().await.remove(&wallet);

            let secondaries = resolve_secondaries(wallet.clone()).await;
            for secondary in secondaries {
                if let Err(e) = self
                    .peer_client
                    .trigger_sync(&secondary, &[wallet.clone()], &creator_node_endpoint)
                    .await
                {
                    warn!("debounced sync trigger to {secondary} failed for {wallet}: {e}");
                }
            }
            info!(wallet = %wallet, "fired debounced sync trigger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn rescheduling_cancels_the_prior_epoch() {
        let trigger = SyncTrigger::new(PeerClient::new(Duration::from_secs(1)), Duration::from_millis(50));
        trigger.enqueue("0xabc", "http://primary").await;
        let first_epoch = trigger.pending.read().await.get("0xabc").unwrap().epoch;

        trigger.enqueue("0xabc", "http://primary").await;
        assert!(!trigger.is_still_current("0xabc", first_epoch).await);
    }

    #[tokio::test]
    async fn cancel_removes_pending_entry() {
        let trigger = SyncTrigger::new(PeerClient::new(Duration::from_secs(1)), Duration::from_millis(50));
        trigger.enqueue("0xabc", "http://primary").await;
        trigger.cancel("0xabc").await;
        assert!(trigger.pending.read().await.get("0xabc").is_none());
    }
}
