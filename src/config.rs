use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub node: NodeConfig,
    pub sync: SyncConfig,
    pub selector: SelectorConfig,
    pub content_network: ContentNetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding content-addressed blobs, laid out as
    /// `<root>/<dirCID>/<CID>`.
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's externally reachable base URL, advertised to peers as a
    /// replication source.
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_export_range: i64,
    pub lock_ttl_ms: u64,
    pub debounce_ms: u64,
    pub fetch_concurrency: usize,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub expected_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentNetworkConfig {
    /// Base URL of the content-addressed network's direct-fetch gateway,
    /// used as the read path's last-resort fallback.
    pub base_url: String,
    pub fetch_deadline_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/content_node.db".to_string()),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            storage: StorageConfig {
                root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "data/storage".to_string()),
            },
            node: NodeConfig {
                endpoint: env::var("NODE_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            sync: SyncConfig {
                max_export_range: env::var("SYNC_MAX_EXPORT_RANGE")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .unwrap_or(5000),
                lock_ttl_ms: env::var("SYNC_LOCK_TTL_MS")
                    .unwrap_or_else(|_| "600000".to_string())
                    .parse()
                    .unwrap_or(600_000),
                debounce_ms: env::var("SYNC_DEBOUNCE_MS")
                    .unwrap_or_else(|_| "15000".to_string())
                    .parse()
                    .unwrap_or(15_000),
                fetch_concurrency: env::var("SYNC_FETCH_CONCURRENCY")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                request_timeout_ms: env::var("SYNC_REQUEST_TIMEOUT_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .unwrap_or(5_000),
            },
            selector: SelectorConfig {
                expected_version: env::var("SELECTOR_EXPECTED_VERSION")
                    .unwrap_or_else(|_| "0.1.0".to_string()),
            },
            content_network: ContentNetworkConfig {
                base_url: env::var("CONTENT_NETWORK_BASE_URL")
                    .unwrap_or_else(|_| "https://ipfs.io".to_string()),
                fetch_deadline_ms: env::var("CONTENT_NETWORK_FETCH_DEADLINE_MS")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3_000),
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
