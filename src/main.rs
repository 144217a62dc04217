// Content node server: the per-user replication engine's HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use content_node::{app_state::AppState, config::Config, http::create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let app_state = AppState::new(config.clone()).await?;

    // Best-effort secondary pulls for debounced sync triggers. Replica-set
    // membership comes from the on-ledger registry, which is out of scope;
    // until it's wired in, the reaper has nothing to resolve and simply
    // drains an empty queue.
    let sync_trigger = Arc::clone(&app_state.sync_trigger);
    let resolve_state = app_state.clone();
    sync_trigger.spawn_reaper(
        move |wallet| {
            let state = resolve_state.clone();
            async move { state.secondaries_for(&wallet).await }
        },
        Duration::from_secs(5),
    );

    let app = create_router(app_state).layer(CorsLayer::permissive());

    let addr = config.server_address();
    tracing::info!(%addr, "content node starting");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
