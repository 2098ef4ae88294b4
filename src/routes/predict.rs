//! JSON prediction endpoints (/predict_image, /predict_video, /predict_audio)

use axum::{
    Json, Router,
    extract::{Multipart, State},
    routing::post,
};
use std::sync::Arc;

use super::read_upload;
use crate::AppState;
use crate::error::Result;
use crate::media::Modality;
use crate::response::{self, PredictionResponse};

/// Multipart field carrying the media on every predict endpoint
pub const UPLOAD_FIELD: &str = "file";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/predict_image", post(predict_image))
        .route("/predict_video", post(predict_video))
        .route("/predict_audio", post(predict_audio))
}

/// POST /predict_image
async fn predict_image(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>> {
    predict(&state, Modality::Image, multipart).await
}

/// POST /predict_video - mean over sampled frames, with per-frame detail
async fn predict_video(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>> {
    predict(&state, Modality::Video, multipart).await
}

/// POST /predict_audio - first 5 seconds at 16kHz
async fn predict_audio(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>> {
    predict(&state, Modality::Audio, multipart).await
}

async fn predict(
    state: &AppState,
    modality: Modality,
    mut multipart: Multipart,
) -> Result<Json<PredictionResponse>> {
    let upload = read_upload(&mut multipart, UPLOAD_FIELD).await?;
    let verdict = state.pipeline.run(modality, upload).await?;
    Ok(Json(response::format(modality, &verdict)))
}
