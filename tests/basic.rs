// End-to-end coverage of the replication protocol: a primary
// node serves its real HTTP surface over a loopback socket, a second
// `AppState` drives `SyncWorker` against it exactly as a secondary node
// would, and every assertion is made against the secondary's own database
// afterward.

use std::net::SocketAddr;

use content_node::app_state::AppState;
use content_node::config::{
    Config, ContentNetworkConfig, DatabaseConfig, NodeConfig, SelectorConfig, ServerConfig,
    StorageConfig, SyncConfig,
};
use content_node::http::create_router;
use content_node::infrastructure::{Candidate, PeerClient, ServiceSelector, SyncWalletOutcome};
use content_node::models::NewUserMeta;

fn config_with(storage_root: String, max_export_range: i64) -> Config {
    Config {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        },
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        storage: StorageConfig { root: storage_root },
        node: NodeConfig {
            endpoint: "http://127.0.0.1:0".to_string(),
        },
        sync: SyncConfig {
            max_export_range,
            lock_ttl_ms: 60_000,
            debounce_ms: 15_000,
            fetch_concurrency: 4,
            request_timeout_ms: 5_000,
        },
        selector: SelectorConfig {
            expected_version: "0.1.0".to_string(),
        },
        content_network: ContentNetworkConfig {
            base_url: "https://ipfs.io".to_string(),
            fetch_deadline_ms: 3_000,
        },
    }
}

/// Boots a primary node's full HTTP surface on an ephemeral loopback port
/// and returns its `AppState` (so the test can seed content directly) plus
/// the address a secondary should pull from.
async fn spin_up_primary(storage_root: String, max_export_range: i64) -> (AppState, SocketAddr) {
    let config = config_with(storage_root, max_export_range);
    let state = AppState::new(config).await.expect("primary state builds");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("listener has a local addr");

    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (state, addr)
}

async fn new_secondary(storage_root: String) -> AppState {
    let config = config_with(storage_root, 5_000);
    AppState::new(config).await.expect("secondary state builds")
}

fn user_meta(i: usize) -> NewUserMeta {
    NewUserMeta {
        multihash: format!("Qm{i}"),
        data: serde_json::json!({ "i": i }),
    }
}

#[tokio::test]
async fn cold_sync_pulls_full_history() {
    let primary_root = tempfile::tempdir().unwrap();
    let secondary_root = tempfile::tempdir().unwrap();
    let (primary, addr) = spin_up_primary(primary_root.path().display().to_string(), 5_000).await;

    let wallet = "0xcold".to_string();
    for i in 0..3 {
        primary
            .content_store
            .write_user_meta(&wallet, user_meta(i))
            .await
            .unwrap();
    }

    let secondary = new_secondary(secondary_root.path().display().to_string()).await;
    let source_endpoint = format!("http://{addr}");

    let outcome = secondary
        .sync_worker
        .run(&[wallet.clone()], &source_endpoint)
        .await
        .expect("cold sync succeeds");

    assert_eq!(
        outcome.results.get(&wallet),
        Some(&SyncWalletOutcome::Synced { clock: 3 })
    );

    let user = secondary
        .db
        .get_user_by_wallet(&wallet)
        .await
        .unwrap()
        .expect("user replicated");
    assert_eq!(user.clock, 3);

    let metas = secondary
        .db
        .get_user_metas_in_range(&user.user_uuid, 1, 3)
        .await
        .unwrap();
    assert_eq!(metas.len(), 3);
}

#[tokio::test]
async fn incremental_sync_pulls_only_new_records() {
    let primary_root = tempfile::tempdir().unwrap();
    let secondary_root = tempfile::tempdir().unwrap();
    let (primary, addr) = spin_up_primary(primary_root.path().display().to_string(), 5_000).await;
    let source_endpoint = format!("http://{addr}");

    let wallet = "0xincr".to_string();
    for i in 0..3 {
        primary
            .content_store
            .write_user_meta(&wallet, user_meta(i))
            .await
            .unwrap();
    }

    let secondary = new_secondary(secondary_root.path().display().to_string()).await;
    secondary
        .sync_worker
        .run(&[wallet.clone()], &source_endpoint)
        .await
        .expect("first sync succeeds");

    // Nothing changed upstream: a second pull reports up to date.
    let repeat = secondary
        .sync_worker
        .run(&[wallet.clone()], &source_endpoint)
        .await
        .expect("repeat sync succeeds");
    assert_eq!(repeat.results.get(&wallet), Some(&SyncWalletOutcome::UpToDate));

    for i in 3..5 {
        primary
            .content_store
            .write_user_meta(&wallet, user_meta(i))
            .await
            .unwrap();
    }

    let outcome = secondary
        .sync_worker
        .run(&[wallet.clone()], &source_endpoint)
        .await
        .expect("incremental sync succeeds");
    assert_eq!(
        outcome.results.get(&wallet),
        Some(&SyncWalletOutcome::Synced { clock: 5 })
    );

    let user = secondary.db.get_user_by_wallet(&wallet).await.unwrap().unwrap();
    let metas = secondary
        .db
        .get_user_metas_in_range(&user.user_uuid, 1, 5)
        .await
        .unwrap();
    assert_eq!(metas.len(), 5);
}

#[tokio::test]
async fn paged_sync_converges_under_a_small_max_range() {
    let primary_root = tempfile::tempdir().unwrap();
    let secondary_root = tempfile::tempdir().unwrap();
    // MAX_RANGE of 2 forces the full 5-record history across several calls.
    let (primary, addr) = spin_up_primary(primary_root.path().display().to_string(), 2).await;
    let source_endpoint = format!("http://{addr}");

    let wallet = "0xpaged".to_string();
    for i in 0..5 {
        primary
            .content_store
            .write_user_meta(&wallet, user_meta(i))
            .await
            .unwrap();
    }

    let secondary = new_secondary(secondary_root.path().display().to_string()).await;

    let mut reached_five = false;
    for _ in 0..10 {
        let outcome = secondary
            .sync_worker
            .run(&[wallet.clone()], &source_endpoint)
            .await
            .expect("paged sync step succeeds");

        match outcome.results.get(&wallet) {
            Some(SyncWalletOutcome::Synced { clock: 5 }) => {
                reached_five = true;
                break;
            }
            Some(SyncWalletOutcome::UpToDate) => break,
            _ => continue,
        }
    }

    assert!(reached_five, "secondary never converged to clock 5");

    let user = secondary.db.get_user_by_wallet(&wallet).await.unwrap().unwrap();
    assert_eq!(user.clock, 5);
    let metas = secondary
        .db
        .get_user_metas_in_range(&user.user_uuid, 1, 5)
        .await
        .unwrap();
    assert_eq!(metas.len(), 5);
}

#[tokio::test]
async fn regression_is_refused_when_local_clock_outruns_source() {
    let primary_root = tempfile::tempdir().unwrap();
    let secondary_root = tempfile::tempdir().unwrap();
    let (primary, addr) = spin_up_primary(primary_root.path().display().to_string(), 5_000).await;
    let source_endpoint = format!("http://{addr}");

    let wallet = "0xregress".to_string();
    primary
        .content_store
        .write_user_meta(&wallet, user_meta(0))
        .await
        .unwrap();

    let secondary = new_secondary(secondary_root.path().display().to_string()).await;
    secondary
        .sync_worker
        .run(&[wallet.clone()], &source_endpoint)
        .await
        .expect("initial sync succeeds");

    // Simulate the secondary having observed a clock the primary has not
    // reached (e.g. a write accepted from a different, since-demoted
    // primary): the worker must refuse to regress rather than overwrite it.
    let user = secondary.db.get_user_by_wallet(&wallet).await.unwrap().unwrap();
    sqlx::query("UPDATE cnode_users SET clock = ? WHERE user_uuid = ?")
        .bind(99_i64)
        .bind(&user.user_uuid)
        .execute(&secondary.db.pool)
        .await
        .unwrap();

    let result = secondary.sync_worker.run(&[wallet.clone()], &source_endpoint).await;
    assert!(matches!(result, Err(content_node::AppError::Regression(_))));
}

/// Boots a bare node whose `/health` route reports a caller-chosen version,
/// standing in for one selector candidate.
async fn spin_up_node_reporting_version(version: &str) -> SocketAddr {
    let storage_root = tempfile::tempdir().unwrap();
    let mut config = config_with(storage_root.path().display().to_string(), 5_000);
    config.selector.expected_version = version.to_string();
    let state = AppState::new(config).await.expect("node state builds");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("listener has a local addr");
    std::mem::forget(storage_root);

    let router = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    addr
}

#[tokio::test]
async fn selector_picks_newest_compatible_version() {
    let newest = spin_up_node_reporting_version("1.2.1").await;
    let expected = spin_up_node_reporting_version("1.2.0").await;
    let incompatible = spin_up_node_reporting_version("1.1.9").await;

    let peer_client = PeerClient::new(std::time::Duration::from_secs(5));
    let selector = ServiceSelector::new(peer_client, "1.2.0");

    let candidates = vec![
        Candidate { endpoint: format!("http://{incompatible}") },
        Candidate { endpoint: format!("http://{expected}") },
        Candidate { endpoint: format!("http://{newest}") },
    ];

    let result = selector
        .select(candidates, None, None, None, 3)
        .await
        .expect("selection succeeds with two compatible candidates");

    assert_eq!(result.primary, format!("http://{newest}"));
    assert_eq!(result.secondaries, vec![format!("http://{expected}")]);

    let health_stage = result
        .trace
        .stages
        .iter()
        .find(|s| s.stage == "filter_health")
        .unwrap();
    assert_eq!(health_stage.surviving.len(), 2);
    assert!(!health_stage.surviving.contains(&format!("http://{incompatible}")));
}

#[tokio::test]
async fn selector_fails_when_no_candidate_survives() {
    let incompatible = spin_up_node_reporting_version("2.0.0").await;

    let peer_client = PeerClient::new(std::time::Duration::from_secs(5));
    let selector = ServiceSelector::new(peer_client, "1.2.0");

    let candidates = vec![Candidate { endpoint: format!("http://{incompatible}") }];
    let result = selector.select(candidates, None, None, None, 3).await;
    assert!(matches!(result, Err(content_node::AppError::NoPrimaryAvailable(_))));
}
