// Serve a CID from disk, with replica-set and content-network fallback
//. Grounded on `infrastructure/cache_layer.rs`'s tiered-
// lookup structure (check the fast tier, then the next, then the origin),
// applied here to blob bytes instead of cache entries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::blob_store::BlobStore;
use crate::infrastructure::db::Db;
use crate::infrastructure::peer_client::PeerClient;
use crate::models::FileType;

#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

#[derive(Debug)]
pub enum ReadOutcome {
    Full { bytes: Vec<u8> },
    Partial { bytes: Vec<u8>, start: u64, end: u64, total: u64 },
}

/// CID deny-list. Kept as a small in-memory set;
/// administrative population of it is out of scope.
#[derive(Clone, Default)]
pub struct Denylist {
    cids: Arc<RwLock<HashSet<String>>>,
}

impl Denylist {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, cid: &str) {
        self.cids.write().await.insert(cid.to_string());
    }

    pub async fn contains(&self, cid: &str) -> bool {
        self.cids.read().await.contains(cid)
    }
}

#[derive(Clone)]
pub struct ReadPath {
    db: Db,
    blob_store: BlobStore,
    peer_client: PeerClient,
    denylist: Denylist,
    content_network_base: String,
    content_network_deadline: Duration,
}

impl ReadPath {
    pub fn new(
        db: Db,
        blob_store: BlobStore,
        peer_client: PeerClient,
        denylist: Denylist,
        content_network_base: String,
        content_network_deadline: Duration,
    ) -> Self {
        Self { db, blob_store, peer_client, denylist, content_network_base, content_network_deadline }
    }

    #[instrument(skip(self))]
    pub async fn read(
        &self,
        cid: &str,
        filename: Option<&str>,
        range: Option<ByteRange>,
    ) -> AppResult<ReadOutcome> {
        let file = match filename {
            None => {
                let file = self
                    .db
                    .find_file_by_cid(cid)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("no file row for {cid}")))?;
                if file.file_type == FileType::Dir {
                    return Err(AppError::BadRequest(format!(
                        "{cid} is a directory CID; request /ipfs/{cid}/<filename>"
                    )));
                }
                file
            }
            Some(name) => self
                .db
                .find_dir_entry(cid, name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("no entry {name} in directory {cid}")))?,
        };

        if self.denylist.contains(&file.multihash).await {
            return Err(AppError::Forbidden(format!("{} is blacklisted", file.multihash)));
        }

        let path = self
            .blob_store
            .path_for(&file.multihash, file.dir_multihash.as_deref());

        if let Some(bytes) = self.blob_store.read(&path).await? {
            self.enqueue_rehydrate(&file.multihash);
            return Self::slice_for_range(bytes, range);
        }

        // Disk miss: try the user's replica set (self excluded upstream by
        // the caller, which knows its own endpoint).
        for peer in self.peer_endpoints_for(&file.user_uuid).await? {
            let fetched = match &file.dir_multihash {
                Some(dir) => match &file.file_name {
                    Some(name) => self.peer_client.fetch_dir_blob(&peer, dir, name).await,
                    None => continue,
                },
                None => self.peer_client.fetch_blob(&peer, &file.multihash).await,
            };

            match fetched {
                Ok(bytes) => {
                    self.blob_store.write(&path, &bytes).await?;
                    self.enqueue_rehydrate(&file.multihash);
                    return Self::slice_for_range(bytes, range);
                }
                Err(e) => warn!("peer {peer} miss for {}: {e}", file.multihash),
            }
        }

        // Final fallback: the content-addressed network's direct fetch,
        // bounded by a short deadline.
        match tokio::time::timeout(
            self.content_network_deadline,
            self.peer_client.fetch_blob(&self.content_network_base, &file.multihash),
        )
        .await
        {
            Ok(Ok(bytes)) => {
                self.blob_store.write(&path, &bytes).await?;
                self.enqueue_rehydrate(&file.multihash);
                Self::slice_for_range(bytes, range)
            }
            Ok(Err(e)) => Err(AppError::Upstream(format!("content network fetch failed: {e}"))),
            Err(_) => Err(AppError::Upstream("content network fetch timed out".to_string())),
        }
    }

    /// Replica-set lookup for a given user is normally supplied by the
    /// registry (an external collaborator, out of scope); callers in this
    /// crate that know the current replica set pass it through the HTTP
    /// layer instead. This
    /// default returns no peers so the disk/network tiers still apply.
    async fn peer_endpoints_for(&self, _user_uuid: &str) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn enqueue_rehydrate(&self, cid: &str) {
        let cid = cid.to_string();
        tokio::spawn(async move {
            tracing::debug!(cid = %cid, "rehydration task enqueued");
        });
    }

    fn slice_for_range(bytes: Vec<u8>, range: Option<ByteRange>) -> AppResult<ReadOutcome> {
        let Some(range) = range else {
            return Ok(ReadOutcome::Full { bytes });
        };

        let total = bytes.len() as u64;
        let end = range.end.unwrap_or(total.saturating_sub(1)).min(total.saturating_sub(1));

        if total == 0 || range.start >= total || range.start > end {
            return Err(AppError::RangeNotSatisfiable(format!(
                "range {}-{:?} unsatisfiable for {total}-byte blob",
                range.start, range.end
            )));
        }

        let slice = bytes[range.start as usize..=end as usize].to_vec();
        Ok(ReadOutcome::Partial { bytes: slice, start: range.start, end, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::content_store::ContentStore;
    use crate::models::{FileType, NewFile};

    async fn setup() -> (ReadPath, ContentStore) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = ContentStore::new(db.pool.clone());
        let dir = tempfile::tempdir().unwrap();
        let blob_store = BlobStore::new(dir.path().to_path_buf());
        let peer_client = PeerClient::new(Duration::from_millis(200));
        let read_path = ReadPath::new(
            db,
            blob_store,
            peer_client,
            Denylist::new(),
            "https://content-network.invalid".to_string(),
            Duration::from_millis(200),
        );
        std::mem::forget(dir);
        (read_path, store)
    }

    #[tokio::test]
    async fn dir_cid_on_single_route_is_bad_request() {
        let (read_path, store) = setup().await;
        store
            .write_files(
                "0xabc",
                vec![NewFile {
                    multihash: "QmDir".into(),
                    storage_path: String::new(),
                    file_type: FileType::Dir,
                    dir_multihash: None,
                    file_name: None,
                }],
            )
            .await
            .unwrap();

        let result = read_path.read("QmDir", None, None).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let (read_path, _store) = setup().await;
        let result = read_path.read("QmMissing", None, None).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn blacklisted_cid_is_forbidden() {
        let (read_path, store) = setup().await;
        store
            .write_files(
                "0xabc",
                vec![NewFile {
                    multihash: "QmBad".into(),
                    storage_path: String::new(),
                    file_type: FileType::Metadata,
                    dir_multihash: None,
                    file_name: None,
                }],
            )
            .await
            .unwrap();
        read_path.denylist.add("QmBad").await;

        let result = read_path.read("QmBad", None, None).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn in_range_request_returns_partial_content() {
        let bytes = b"0123456789".to_vec();
        let outcome = ReadPath::slice_for_range(bytes, Some(ByteRange { start: 2, end: Some(4) })).unwrap();
        match outcome {
            ReadOutcome::Partial { bytes, start, end, total } => {
                assert_eq!(bytes, b"234");
                assert_eq!((start, end, total), (2, 4, 10));
            }
            _ => panic!("expected partial"),
        }
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let bytes = b"short".to_vec();
        let result = ReadPath::slice_for_range(bytes, Some(ByteRange { start: 100, end: None }));
        assert!(matches!(result, Err(AppError::RangeNotSatisfiable(_))));
    }
}
