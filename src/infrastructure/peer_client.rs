// Outbound HTTP calls to other nodes: export pull, blob fetch, and selector
// health/sync-status checks. Built on `reqwest`, the natural client-side
// counterpart to an axum server.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::models::ExportResponse;

#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckResult {
    pub version: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub latest_block_number: i64,
    pub clock_value: i64,
}

impl PeerClient {
    pub fn new(request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { http }
    }

    /// Builds the `/export` query string with one
    /// `wallet_public_key` pair per wallet; the server side collects
    /// repeated occurrences of the same key into a `Vec<String>`.
    #[instrument(skip(self))]
    pub async fn fetch_export(
        &self,
        source_endpoint: &str,
        wallets: &[String],
        clock_range_min: i64,
    ) -> AppResult<ExportResponse> {
        let mut url = format!("{source_endpoint}/export?clock_range_min={clock_range_min}");
        for wallet in wallets {
            url.push_str(&format!("&wallet_public_key={wallet}"));
        }
        self.get_json(&url).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_blob(&self, gateway_base: &str, cid: &str) -> AppResult<Vec<u8>> {
        let url = format!("{gateway_base}/ipfs/{cid}");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "peer {gateway_base} returned {} for {cid}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    #[instrument(skip(self))]
    pub async fn fetch_dir_blob(
        &self,
        gateway_base: &str,
        dir_cid: &str,
        file_name: &str,
    ) -> AppResult<Vec<u8>> {
        let url = format!("{gateway_base}/ipfs/{dir_cid}/{file_name}");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "peer {gateway_base} returned {} for {dir_cid}/{file_name}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Health route must return 200 and a version for the selector to
    /// compare against the expected major/minor.
    #[instrument(skip(self))]
    pub async fn check_health(&self, endpoint: &str) -> AppResult<HealthCheckResult> {
        let url = format!("{endpoint}/health");
        self.get_json(&url).await
    }

    /// Optional sync-check against `/sync_status/:wallet`. Returns `None`
    /// when the candidate has never seen this wallet ("first-time"), which
    /// the selector treats as acceptable.
    #[instrument(skip(self))]
    pub async fn check_sync_status(
        &self,
        endpoint: &str,
        wallet: &str,
    ) -> AppResult<Option<SyncStatus>> {
        let url = format!("{endpoint}/sync_status/{wallet}");
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if resp.status() == reqwest::StatusCode::LOCKED {
            return Err(AppError::Locked(format!("{endpoint} sync lock held for {wallet}")));
        }
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "{endpoint} sync_status returned {}",
                resp.status()
            )));
        }
        Ok(Some(resp.json().await?))
    }

    #[instrument(skip(self))]
    pub async fn trigger_sync(
        &self,
        endpoint: &str,
        wallets: &[String],
        creator_node_endpoint: &str,
    ) -> AppResult<()> {
        let resp = self
            .http
            .post(format!("{endpoint}/sync"))
            .json(&serde_json::json!({
                "wallet": wallets,
                "creator_node_endpoint": creator_node_endpoint,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "{endpoint} rejected sync trigger: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "GET {url} returned {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}
