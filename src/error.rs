//! Error taxonomy for the detection pipeline and its HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    /// Modality or container the downstream decoder cannot open
    #[error("Unsupported media: {0}")]
    UnsupportedMediaType(String),

    /// Zero frames, zero-length audio or an empty upload
    #[error("Empty media: {0}")]
    EmptyMedia(String),

    /// Weights or config missing / incompatible
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Inference timed out after {}s", .0.as_secs())]
    InferenceTimeout(Duration),

    /// Malformed request (e.g. no file field in the upload)
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DetectionError>;

impl DetectionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DetectionError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DetectionError::EmptyMedia(_) | DetectionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DetectionError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            DetectionError::Inference(_) | DetectionError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DetectionError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Stable machine-readable name, returned as `kind` in error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            DetectionError::UnsupportedMediaType(_) => "unsupported_media_type",
            DetectionError::EmptyMedia(_) => "empty_media",
            DetectionError::ModelLoad(_) => "model_load",
            DetectionError::Inference(_) => "inference",
            DetectionError::InferenceTimeout(_) => "inference_timeout",
            DetectionError::BadRequest(_) => "bad_request",
            DetectionError::Io(_) => "io",
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for DetectionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_client_error() {
            log::warn!("[http] {} {}", status.as_u16(), self);
        } else {
            log::error!("[http] {} {}", status.as_u16(), self);
        }

        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

/// Extension trait for tagging third-party errors with a taxonomy variant and context
pub trait ErrContext<T> {
    /// Map error to `UnsupportedMediaType`
    fn unsupported(self, context: &str) -> Result<T>;

    /// Map error to `ModelLoad`
    fn model_load(self, context: &str) -> Result<T>;

    /// Map error to `Inference`
    fn inference(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ErrContext<T> for std::result::Result<T, E> {
    fn unsupported(self, context: &str) -> Result<T> {
        self.map_err(|e| DetectionError::UnsupportedMediaType(format!("{}: {}", context, e)))
    }

    fn model_load(self, context: &str) -> Result<T> {
        self.map_err(|e| DetectionError::ModelLoad(format!("{}: {}", context, e)))
    }

    fn inference(self, context: &str) -> Result<T> {
        self.map_err(|e| DetectionError::Inference(format!("{}: {}", context, e)))
    }
}
