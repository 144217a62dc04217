// Pull export from a source node, validate contiguity, fetch missing blobs,
// commit atomically. Grounded on
// `infrastructure/write_ahead_log.rs`'s transaction-status state machine
// (`Pending -> Executing -> Committed/Failed`) for the run-state enum, and
// on `infrastructure/service_discovery.rs`'s background-task fan-out idiom
// for the bounded-concurrency blob fetch.

use std::collections::HashMap;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::blob_store::BlobStore;
use crate::infrastructure::db::Db;
use crate::infrastructure::peer_client::PeerClient;
use crate::infrastructure::sync_lock::{LockToken, SyncLock};
use crate::models::{CNodeUserExport, ExportResponse, FileRow, FileType, User};

/// Per-run lifecycle: lock is always released on every exit
/// from `Fetching` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    LockHeld,
    Fetching,
    Downloading,
    Committing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncWalletOutcome {
    /// `returned.clock == localMax`: source had nothing new.
    UpToDate,
    Synced { clock: i64 },
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub results: HashMap<String, SyncWalletOutcome>,
}

#[derive(Clone)]
pub struct SyncWorker {
    db: Db,
    blob_store: BlobStore,
    peer_client: PeerClient,
    sync_lock: SyncLock,
    fetch_concurrency: usize,
}

impl SyncWorker {
    pub fn new(
        db: Db,
        blob_store: BlobStore,
        peer_client: PeerClient,
        sync_lock: SyncLock,
        fetch_concurrency: usize,
    ) -> Self {
        Self { db, blob_store, peer_client, sync_lock, fetch_concurrency }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, wallets: &[String], source_endpoint: &str) -> AppResult<SyncOutcome> {
        let mut state = SyncState::Idle;
        let mut held_locks: Vec<LockToken> = Vec::new();

        let run_result = self.run_inner(wallets, source_endpoint, &mut state, &mut held_locks).await;

        for token in &held_locks {
            if let Err(e) = self.sync_lock.release(token).await {
                warn!("failed releasing sync lock {}: {e}", token.key);
            }
        }

        if run_result.is_err() {
            state = SyncState::Failed;
        }
        info!(?state, "sync run finished");
        run_result
    }

    async fn run_inner(
        &self,
        wallets: &[String],
        source_endpoint: &str,
        state: &mut SyncState,
        held_locks: &mut Vec<LockToken>,
    ) -> AppResult<SyncOutcome> {
        // Step 1: acquire the per-wallet sync lock for every wallet.
        for wallet in wallets {
            let key = SyncLock::key_for_wallet(wallet);
            let token = self.sync_lock.acquire(&key).await?;
            held_locks.push(token);
        }
        *state = SyncState::LockHeld;

        // Step 2: local clock per wallet (-1 if the user is unknown here).
        let mut local_max_by_wallet = HashMap::new();
        for wallet in wallets {
            let local_max = match self.db.get_user_by_wallet(wallet).await? {
                Some(user) => user.clock,
                None => -1,
            };
            local_max_by_wallet.insert(wallet.clone(), local_max);
        }

        // Clocks are 1-based (the first record a user ever gets is clock 1),
        // so an absent user (-1) baselines at 0, not -1, before adding 1.
        let clock_range_min = local_max_by_wallet
            .values()
            .copied()
            .map(|v| v.max(0))
            .min()
            .unwrap_or(0)
            + 1;

        // Step 3: export pull.
        *state = SyncState::Fetching;
        let export = self
            .peer_client
            .fetch_export(source_endpoint, wallets, clock_range_min)
            .await?;

        // Step 4: validate, per wallet.
        let mut results = HashMap::new();
        let mut to_commit: Vec<(User, CNodeUserExport)> = Vec::new();

        for wallet in wallets {
            let local_max = local_max_by_wallet[wallet];
            let entry = find_entry_for_wallet(&export, wallet)?;
            validate_response(wallet, local_max, entry)?;

            if entry.user.clock == local_max {
                results.insert(wallet.clone(), SyncWalletOutcome::UpToDate);
                continue;
            }

            to_commit.push((entry.user.clone(), entry.clone()));
        }

        if to_commit.is_empty() {
            return Ok(SyncOutcome { results });
        }

        // Step 5: fetch every referenced blob in bounded-concurrency batches.
        *state = SyncState::Downloading;
        for (_, entry) in &to_commit {
            self.fetch_blobs(entry, &export.peer_info.endpoints).await?;
        }

        // Step 6: single transaction, ordered inserts, commit.
        *state = SyncState::Committing;
        for (user, entry) in &to_commit {
            self.db
                .commit_import(user, &entry.clock_records, &entry.user_metas, &entry.tracks, &entry.files)
                .await?;
            results.insert(user.wallet.clone(), SyncWalletOutcome::Synced { clock: user.clock });
        }

        *state = SyncState::Idle;
        Ok(SyncOutcome { results })
    }

    /// Fetches every non-directory file's blob, track files and non-track
    /// files each in their own bounded-concurrency batch (default N=10).
    /// `FileRow` carries no separate track-foreign-key column (§3): `file_type
    /// == Audio` is the only attribute that ties a file to a track, so it is
    /// also the track/non-track split used here and by `db::commit_import`.
    #[instrument(skip(self, entry, peer_endpoints))]
    async fn fetch_blobs(&self, entry: &CNodeUserExport, peer_endpoints: &[String]) -> AppResult<()> {
        let (track_files, non_track_files): (Vec<&FileRow>, Vec<&FileRow>) = entry
            .files
            .iter()
            .filter(|f| f.file_type != FileType::Dir)
            .partition(|f| f.file_type == FileType::Audio);

        self.fetch_batch(&non_track_files, peer_endpoints).await?;
        self.fetch_batch(&track_files, peer_endpoints).await?;
        Ok(())
    }

    async fn fetch_batch(&self, files: &[&FileRow], peer_endpoints: &[String]) -> AppResult<()> {
        let n = self.fetch_concurrency.max(1);
        let results: Vec<AppResult<()>> = stream::iter(files.iter().map(|file| {
            let file = (*file).clone();
            let peer_endpoints = peer_endpoints.to_vec();
            async move { self.fetch_one_blob(&file, &peer_endpoints).await }
        }))
        .buffer_unordered(n)
        .collect()
        .await;

        for r in results {
            r?;
        }
        Ok(())
    }

    async fn fetch_one_blob(&self, file: &FileRow, peer_endpoints: &[String]) -> AppResult<()> {
        let path = self.blob_store.path_for(&file.multihash, file.dir_multihash.as_deref());
        if self.blob_store.metadata_len(&path).await?.is_some() {
            return Ok(());
        }

        let mut last_err = None;
        for peer in peer_endpoints {
            let fetched = match &file.dir_multihash {
                Some(dir) => {
                    let Some(name) = &file.file_name else { continue };
                    self.peer_client.fetch_dir_blob(peer, dir, name).await
                }
                None => self.peer_client.fetch_blob(peer, &file.multihash).await,
            };

            match fetched {
                Ok(bytes) => {
                    self.blob_store.write(&path, &bytes).await?;
                    return Ok(());
                }
                Err(e) => {
                    warn!("blob fetch from {peer} failed for {}: {e}", file.multihash);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AppError::Upstream(format!("no peers available to fetch {}", file.multihash))
        }))
    }
}

fn find_entry_for_wallet<'a>(
    export: &'a ExportResponse,
    wallet: &str,
) -> AppResult<&'a CNodeUserExport> {
    export
        .cnode_users
        .values()
        .find(|entry| entry.user.wallet == wallet)
        .ok_or_else(|| {
            AppError::BadRequest(format!("export response did not include wallet {wallet}"))
        })
}

/// Structural/identity/progress/contiguity checks,
/// exposed standalone so tests can drive it without a live peer.
pub fn validate_response(wallet: &str, local_max: i64, entry: &CNodeUserExport) -> AppResult<()> {
    if entry.user.wallet != wallet {
        return Err(AppError::BadRequest(format!(
            "export entry wallet mismatch: expected {wallet}, got {}",
            entry.user.wallet
        )));
    }

    if entry.user.clock < local_max {
        return Err(AppError::Regression(format!(
            "source clock {} is behind local {local_max} for {wallet}",
            entry.user.clock
        )));
    }

    if entry.user.clock == local_max {
        return Ok(());
    }

    // Clocks are 1-based: an absent local user (-1) baselines at 0, so the
    // first expected clock on a cold pull is 1, not 0.
    let expected_first = local_max.max(0) + 1;
    match entry.clock_records.first() {
        Some(first) if first.clock == expected_first => {}
        Some(first) => {
            return Err(AppError::NonContiguous(format!(
                "export window for {wallet} starts at {}, expected {expected_first}",
                first.clock
            )))
        }
        None => {
            return Err(AppError::NonContiguous(format!(
                "export window for {wallet} had no clock records but clock advanced"
            )))
        }
    }

    for pair in entry.clock_records.windows(2) {
        if pair[1].clock != pair[0].clock + 1 {
            return Err(AppError::NonContiguous(format!(
                "clock gap between {} and {} for {wallet}",
                pair[0].clock, pair[1].clock
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClockInfo, ClockRecord, SourceKind};

    fn user(wallet: &str, clock: i64) -> User {
        User {
            user_uuid: "uuid-1".into(),
            wallet: wallet.into(),
            latest_block_number: 0,
            clock,
            created_at: Utc::now(),
        }
    }

    fn clock_record(clock: i64) -> ClockRecord {
        ClockRecord {
            user_uuid: "uuid-1".into(),
            clock,
            source_kind: SourceKind::UserMeta,
            created_at: Utc::now(),
        }
    }

    fn entry(wallet: &str, clock: i64, records: Vec<ClockRecord>) -> CNodeUserExport {
        CNodeUserExport {
            user: user(wallet, clock),
            clock_records: records,
            user_metas: vec![],
            tracks: vec![],
            files: vec![],
            clock_info: ClockInfo { local_clock_max: clock, requested_clock_range_min: 1, requested_clock_range_max: clock },
        }
    }

    #[test]
    fn up_to_date_is_accepted() {
        let e = entry("0xabc", 5, vec![]);
        assert!(validate_response("0xabc", 5, &e).is_ok());
    }

    #[test]
    fn regression_is_rejected() {
        let e = entry("0xabc", 3, vec![]);
        assert!(matches!(validate_response("0xabc", 5, &e), Err(AppError::Regression(_))));
    }

    #[test]
    fn non_contiguous_start_is_rejected() {
        let e = entry("0xabc", 5, vec![clock_record(3), clock_record(4), clock_record(5)]);
        assert!(matches!(validate_response("0xabc", 1, &e), Err(AppError::NonContiguous(_))));
    }

    #[test]
    fn gap_in_sequence_is_rejected() {
        let e = entry("0xabc", 5, vec![clock_record(1), clock_record(3)]);
        assert!(matches!(validate_response("0xabc", 0, &e), Err(AppError::NonContiguous(_))));
    }

    #[test]
    fn wallet_mismatch_is_rejected() {
        let e = entry("0xother", 5, vec![]);
        assert!(matches!(validate_response("0xabc", 0, &e), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn cold_pull_starting_at_clock_one_is_accepted() {
        // local_max = -1 models a wallet this node has never seen; the first
        // clock a user can ever have is 1, not 0.
        let e = entry("0xabc", 3, vec![clock_record(1), clock_record(2), clock_record(3)]);
        assert!(validate_response("0xabc", -1, &e).is_ok());
    }
}
