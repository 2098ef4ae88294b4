//! Deepfake detection service: classifies uploaded images, video and audio as
//! real or fake with pretrained models and serves the verdicts over HTTP.

pub mod classifier;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod registry;
pub mod response;
pub mod router;
pub mod routes;
pub mod verdict;

use axum::Router;
use std::sync::Arc;

use config::Config;
use pipeline::DetectionPipeline;
use registry::{ModelLoader, ModelRegistry};

/// Shared state handed to every handler
pub struct AppState {
    pub pipeline: DetectionPipeline,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, registry: Arc<ModelRegistry>) -> Self {
        Self {
            pipeline: DetectionPipeline::new(registry, &config),
            config,
        }
    }
}

/// Assemble the HTTP app around a model loader
pub fn build_app(config: Config, loader: impl ModelLoader + 'static) -> Router {
    let registry = Arc::new(ModelRegistry::new(loader));
    routes::build_router(Arc::new(AppState::new(config, registry)))
}
