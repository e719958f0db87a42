use anyhow::{Context, Result};
use gcs_zip::config::ServerConfig;
use gcs_zip::logging;
use gcs_zip::server::{routes, AppState};
use gcs_zip::storage::GcsStore;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cfg = ServerConfig::from_env_and_args()?;
    tracing::info!("Starting gcs-zip-server with config: {:?}", cfg);

    // One client for the whole process; archive state stays per request.
    let store = GcsStore::connect(&cfg.storage)
        .await
        .context("creating storage client")?;
    let state = AppState::new(Arc::new(store)).with_strict(cfg.strict);

    let addr = cfg.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, routes(state)).await?;

    Ok(())
}
