// Every endpoint the replication protocol exposes, wired to the
// export/import/lock/selector/read-path components behind `AppState`: a
// plain `axum::Router` of `State<AppState>` handlers returning
// `AppResult<Json<_>>` (or a raw `Response` for the byte-streaming routes).

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{ByteRange, ReadOutcome, SyncLock, SyncWalletOutcome, TriggerMode};
use crate::models::{ExportResponse, NewFile, NewTrack, NewUserMeta};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/export", get(export_handler))
        .route("/sync", post(sync_handler))
        .route("/sync_status/{wallet}", get(sync_status_handler))
        .route("/users/clock_status/{wallet}", get(clock_status_handler))
        .route("/ipfs/{cid}", get(ipfs_handler))
        .route("/ipfs/{dir_cid}/{filename}", get(ipfs_dir_handler))
        .route("/file_lookup", get(file_lookup_handler))
        .route("/audius_users/metadata", post(user_meta_handler))
        .route("/audius_users", post(finalize_handler))
        .route("/tracks/metadata", post(track_handler))
        .route("/tracks", post(finalize_handler))
        .route("/image_upload", post(files_upload_handler))
        .route("/track_content", post(files_upload_handler))
        .with_state(state)
}

/// Repeated `wallet_public_key=<wallet>` query pairs collect into the
/// `Vec<String>` field below.
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub wallet_public_key: Vec<String>,
    pub clock_range_min: i64,
    pub clock_range_max: Option<i64>,
    pub source_endpoint: Option<String>,
}

/// Health route C7's selector checks on every candidate: 200 plus a version
/// string it compares major/minor against the expected version.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "version": state.config.selector.expected_version }))
}

async fn export_handler(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Json<ExportResponse>> {
    if query.wallet_public_key.is_empty() {
        return Err(AppError::BadRequest("wallet_public_key is required".to_string()));
    }

    let peer_endpoints = query.source_endpoint.into_iter().collect::<Vec<_>>();
    let response = state
        .export_service
        .export(
            &query.wallet_public_key,
            query.clock_range_min,
            query.clock_range_max,
            state.config.sync.max_export_range,
            peer_endpoints,
        )
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub wallet: Vec<String>,
    pub creator_node_endpoint: String,
    #[serde(default)]
    pub immediate: Option<bool>,
    #[serde(default)]
    pub sync_type: Option<String>,
}

async fn sync_handler(
    State(state): State<AppState>,
    Json(req): Json<SyncRequest>,
) -> AppResult<Json<Value>> {
    if req.wallet.is_empty() {
        return Err(AppError::BadRequest("wallet is required".to_string()));
    }

    tracing::info!(
        wallets = ?req.wallet,
        immediate = ?req.immediate,
        sync_type = ?req.sync_type,
        "sync requested"
    );

    let outcome = state
        .sync_worker
        .run(&req.wallet, &req.creator_node_endpoint)
        .await?;

    let results: HashMap<String, Value> = outcome
        .results
        .into_iter()
        .map(|(wallet, result)| {
            let value = match result {
                SyncWalletOutcome::UpToDate => json!({ "status": "up_to_date" }),
                SyncWalletOutcome::Synced { clock } => json!({ "status": "synced", "clock": clock }),
            };
            (wallet, value)
        })
        .collect();

    Ok(Json(json!({ "results": results })))
}

async fn sync_status_handler(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> AppResult<Json<Value>> {
    let key = SyncLock::key_for_wallet(&wallet);
    if state.sync_lock.is_held(&key).await {
        return Err(AppError::Locked(format!("sync lock held for {wallet}")));
    }

    let user = state
        .db
        .get_user_by_wallet(&wallet)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown wallet {wallet}")))?;

    Ok(Json(json!({
        "latestBlockNumber": user.latest_block_number,
        "clockValue": user.clock,
    })))
}

async fn clock_status_handler(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> AppResult<Json<Value>> {
    let user = state
        .db
        .get_user_by_wallet(&wallet)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown wallet {wallet}")))?;

    Ok(Json(json!({ "clockValue": user.clock })))
}

async fn ipfs_handler(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let range = parse_range_header(&headers);
    let outcome = state.read_path.read(&cid, None, range).await?;
    Ok(outcome_to_response(outcome))
}

async fn ipfs_dir_handler(
    State(state): State<AppState>,
    Path((dir_cid, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let range = parse_range_header(&headers);
    let outcome = state.read_path.read(&dir_cid, Some(&filename), range).await?;
    Ok(outcome_to_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct FileLookupQuery {
    pub multihash: String,
    pub dir_multihash: Option<String>,
    pub file_name: Option<String>,
}

/// Internal node-to-node file read. Signature verification of
/// the calling delegate wallet is an external signing primitive; this
/// handler only checks that a delegate-signature header was attached
/// upstream, and trusts the transport layer to have validated it.
async fn file_lookup_handler(
    State(state): State<AppState>,
    Query(query): Query<FileLookupQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if !headers.contains_key("x-delegate-signature") {
        return Err(AppError::Unauthorized("missing delegate signature".to_string()));
    }

    let (cid, filename) = match (&query.dir_multihash, &query.file_name) {
        (Some(dir), Some(name)) => (dir.clone(), Some(name.clone())),
        _ => (query.multihash.clone(), None),
    };

    let outcome = state.read_path.read(&cid, filename.as_deref(), None).await?;
    Ok(outcome_to_response(outcome))
}

#[derive(Debug, Deserialize)]
pub struct UserMetaUploadRequest {
    pub wallet: String,
    #[serde(flatten)]
    pub payload: NewUserMeta,
}

async fn user_meta_handler(
    State(state): State<AppState>,
    Json(req): Json<UserMetaUploadRequest>,
) -> AppResult<Json<Value>> {
    let wallet = req.wallet.clone();
    let receipt = write_under_lock(&state, &wallet, || {
        state.content_store.write_user_meta(&wallet, req.payload)
    })
    .await?;
    notify_secondaries(&state, &wallet).await;
    Ok(Json(json!({ "userUuid": receipt.user_uuid, "clock": receipt.clock })))
}

#[derive(Debug, Deserialize)]
pub struct TrackUploadRequest {
    pub wallet: String,
    #[serde(flatten)]
    pub payload: NewTrack,
}

async fn track_handler(
    State(state): State<AppState>,
    Json(req): Json<TrackUploadRequest>,
) -> AppResult<Json<Value>> {
    let wallet = req.wallet.clone();
    let receipt = write_under_lock(&state, &wallet, || {
        state.content_store.write_track(&wallet, req.payload)
    })
    .await?;
    notify_secondaries(&state, &wallet).await;
    Ok(Json(json!({ "userUuid": receipt.user_uuid, "clock": receipt.clock })))
}

#[derive(Debug, Deserialize)]
pub struct FilesUploadRequest {
    pub wallet: String,
    pub files: Vec<NewFile>,
}

/// Backs both `/image_upload` (directory CID + resized variants) and
/// `/track_content` (a single audio file row). The actual media processing
/// that produces these rows (resizing, transcoding) is an external
/// collaborator; this endpoint only persists the resulting
/// content-addressed rows.
async fn files_upload_handler(
    State(state): State<AppState>,
    Json(req): Json<FilesUploadRequest>,
) -> AppResult<Json<Value>> {
    let wallet = req.wallet.clone();
    let receipts = write_under_lock(&state, &wallet, || {
        state.content_store.write_files(&wallet, req.files)
    })
    .await?;
    notify_secondaries(&state, &wallet).await;

    let clocks: Vec<i64> = receipts.iter().map(|r| r.clock).collect();
    Ok(Json(json!({ "clocks": clocks })))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub wallet: String,
    pub block_number: i64,
}

/// Backs `/audius_users` and `/tracks`: applies the ledger's block number to
/// this user without minting a new clock (the ledger write itself is an
/// external collaborator; this only reflects it locally).
async fn finalize_handler(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> AppResult<Json<Value>> {
    let wallet = req.wallet.clone();
    write_under_lock(&state, &wallet, || {
        state
            .content_store
            .bump_latest_block_number(&wallet, req.block_number)
    })
    .await?;
    Ok(Json(json!({ "wallet": wallet, "blockNumber": req.block_number })))
}

/// Advisory per-user serialization for the content-upload endpoints: the
/// lock is fast-path coordination, the `(user_uuid, clock)` unique
/// constraint on the clock ledger is the safety net if it's ever lost.
async fn write_under_lock<F, Fut, T>(state: &AppState, wallet: &str, f: F) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
{
    let key = SyncLock::key_for_wallet(wallet);
    let token = state.sync_lock.acquire(&key).await?;
    let result = f().await;
    state.sync_lock.release(&token).await?;
    result
}

async fn notify_secondaries(state: &AppState, wallet: &str) {
    let secondaries = state.secondaries_for(wallet).await;
    if secondaries.is_empty() {
        return;
    }
    if let Err(e) = state
        .sync_trigger
        .notify(wallet, &state.config.node.endpoint, &secondaries, TriggerMode::Debounced)
        .await
    {
        tracing::warn!("failed to enqueue sync trigger for {wallet}: {e}");
    }
}

fn parse_range_header(headers: &HeaderMap) -> Option<ByteRange> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;
    let start: u64 = start_s.parse().ok()?;
    let end = if end_s.is_empty() { None } else { end_s.parse().ok() };
    Some(ByteRange { start, end })
}

fn outcome_to_response(outcome: ReadOutcome) -> Response {
    match outcome {
        ReadOutcome::Full { bytes } => (StatusCode::OK, bytes).into_response(),
        ReadOutcome::Partial { bytes, start, end, total } => {
            let mut response = (StatusCode::PARTIAL_CONTENT, bytes).into_response();
            if let Ok(value) = format!("bytes {start}-{end}/{total}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
    }
}
