// Replication-engine infrastructure: persistence, the clock
// ledger, content store, sync lock, export/import, trigger, selector, and
// read path.

pub mod blob_store;
pub mod clock_ledger;
pub mod content_store;
pub mod db;
pub mod export;
pub mod peer_client;
pub mod read_path;
pub mod service_selector;
pub mod sync_lock;
pub mod sync_trigger;
pub mod sync_worker;

pub use blob_store::BlobStore;
pub use clock_ledger::ClockLedger;
pub use content_store::ContentStore;
pub use db::{CNodeStore, Db};
pub use export::ExportService;
pub use peer_client::PeerClient;
pub use read_path::{ByteRange, Denylist, ReadOutcome, ReadPath};
pub use service_selector::{Candidate, DecisionTrace, SelectionResult, ServiceSelector};
pub use sync_lock::{LockToken, SyncLock};
pub use sync_trigger::{SyncTrigger, TriggerMode};
pub use sync_worker::{SyncOutcome, SyncState, SyncWalletOutcome, SyncWorker};
