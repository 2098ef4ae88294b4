use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::media::Modality;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub loaded_models: Vec<Modality>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        loaded_models: state.pipeline.registry().loaded(),
    })
}
