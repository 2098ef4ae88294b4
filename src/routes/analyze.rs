//! Web tier integration: upload form -> detection -> redirect to the result page

use axum::{
    Router,
    extract::{Multipart, State},
    response::Redirect,
    routing::post,
};
use std::sync::Arc;

use super::read_upload;
use crate::AppState;
use crate::error::Result;
use crate::media::Modality;
use crate::response::ResultView;

/// Multipart field name used by the upload form
pub const FORM_FIELD: &str = "media";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/analyze", post(analyze))
}

/// POST /analyze - modality picked by file extension, answered with 303 See Other
async fn analyze(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Redirect> {
    let upload = read_upload(&mut multipart, FORM_FIELD).await?;
    let modality = Modality::from_filename(&upload.filename);
    let filename = upload.filename.clone();

    let verdict = state.pipeline.run(modality, upload).await?;
    let view = ResultView::new(&filename, modality, &verdict);

    let location = format!("{}?{}", state.config.result_view_path, view.to_query());
    log::debug!("[analyze] Redirecting to {}", location);
    Ok(Redirect::to(&location))
}
