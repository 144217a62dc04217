// Application state: assembles the database then hands it to every
// component built on top of it.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::infrastructure::{
    BlobStore, ContentStore, Db, Denylist, ExportService, PeerClient, ReadPath, ServiceSelector,
    SyncLock, SyncTrigger, SyncWorker,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub content_store: ContentStore,
    pub sync_lock: SyncLock,
    pub export_service: ExportService,
    pub sync_worker: SyncWorker,
    pub sync_trigger: Arc<SyncTrigger>,
    pub service_selector: ServiceSelector,
    pub read_path: ReadPath,
    pub blob_store: BlobStore,
    pub peer_client: PeerClient,
    pub denylist: Denylist,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db = Db::connect(&config.database.url).await?;

        let content_store = ContentStore::new(db.pool.clone());
        let sync_lock = SyncLock::new(Duration::from_millis(config.sync.lock_ttl_ms));
        let export_service = ExportService::new(db.clone());
        let blob_store = BlobStore::new(config.storage.root.clone());
        let peer_client = PeerClient::new(Duration::from_millis(config.sync.request_timeout_ms));

        let sync_worker = SyncWorker::new(
            db.clone(),
            blob_store.clone(),
            peer_client.clone(),
            sync_lock.clone(),
            config.sync.fetch_concurrency,
        );

        let sync_trigger = Arc::new(SyncTrigger::new(
            peer_client.clone(),
            Duration::from_millis(config.sync.debounce_ms),
        ));

        let service_selector = ServiceSelector::new(peer_client.clone(), &config.selector.expected_version);

        let denylist = Denylist::new();
        let read_path = ReadPath::new(
            db.clone(),
            blob_store.clone(),
            peer_client.clone(),
            denylist.clone(),
            config.content_network.base_url.clone(),
            Duration::from_millis(config.content_network.fetch_deadline_ms),
        );

        Ok(Self {
            config,
            db,
            content_store,
            sync_lock,
            export_service,
            sync_worker,
            sync_trigger,
            service_selector,
            read_path,
            blob_store,
            peer_client,
            denylist,
        })
    }

    /// Replica-set membership (this user's secondaries, excluding self) is
    /// the on-ledger registry's responsibility;
    /// until that collaborator is wired in, writes fire no debounced
    /// secondary sync. Callers that already know the replica set (tests,
    /// migration tooling) can call `sync_trigger.notify` directly.
    pub async fn secondaries_for(&self, _wallet: &str) -> Vec<String> {
        Vec::new()
    }
}
