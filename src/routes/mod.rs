//! HTTP surface: JSON prediction endpoints, the web tier's analyze redirect and health

pub mod analyze;
pub mod health;
pub mod predict;

use axum::{Router, extract::DefaultBodyLimit, extract::Multipart};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::AppState;
use crate::error::{DetectionError, Result};
use crate::media::Upload;

/// Build every route with upload limit and open CORS applied
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .merge(predict::routes())
        .merge(analyze::routes())
        .merge(health::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Pull the first multipart field named `field_name` as an upload
pub(crate) async fn read_upload(multipart: &mut Multipart, field_name: &str) -> Result<Upload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectionError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(field_name) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| {
            DetectionError::BadRequest(format!("Failed to read '{}' field: {}", field_name, e))
        })?;
        return Ok(Upload { filename, bytes });
    }

    Err(DetectionError::BadRequest(format!(
        "Missing '{}' file field",
        field_name
    )))
}
