use anyhow::Result;
use concourse_api::{build_router, build_state, spawn_maintenance, ApiConfig};
use concourse_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("concourse_api");

    let config = ApiConfig::from_env();
    let bind = config.bind.clone();
    let kb_root = config.runtime.kb_root.display().to_string();

    let state = build_state(config).await?;
    let storage = state.store.backend();
    spawn_maintenance(&state);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, kb_root = %kb_root, storage, "concourse api started");

    axum::serve(listener, app).await?;
    Ok(())
}
