use anyhow::{Context, Result};
use std::sync::Arc;

use deepfake_shield::classifier::{HubModelLoader, select_device};
use deepfake_shield::config::Config;
use deepfake_shield::registry::ModelRegistry;
use deepfake_shield::{AppState, logging, routes};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = Config::from_env();
    log::info!(
        "Starting deepfake-shield (frames={}, block>={}, workers={}, timeout={:?})",
        config.sample_count,
        config.block_threshold,
        config.inference_workers,
        config.inference_timeout
    );

    let device = select_device();
    log::info!("Using device {:?}", device);

    let registry = Arc::new(ModelRegistry::new(HubModelLoader::new(
        config.models.clone(),
        device,
    )));

    if !config.preload.is_empty() {
        let preload = config.preload.clone();
        let warm = Arc::clone(&registry);
        tokio::task::spawn_blocking(move || warm.preload(&preload))
            .await
            .context("Preload task panicked")?
            .context("Failed to preload models")?;
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let app = routes::build_router(Arc::new(AppState::new(config, registry)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    log::info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
