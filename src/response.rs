use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;

use crate::classifier::{Label, ProbabilityVector};
use crate::media::Modality;
use crate::verdict::{AggregateVerdict, Status};

/// Query value escaping; unreserved characters pass through
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_').remove(b'~');

/// Image and audio response body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinglePrediction {
    pub predicted_label: Label,
    pub confidence: f32,
    pub status: Status,
}

/// Video response body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoPrediction {
    pub predicted_label: Label,
    pub confidence: f32,
    pub status: Status,
    pub mean_probabilities: ProbabilityVector,
    /// `[real, fake]` per sampled frame
    pub per_frame_probs: Vec<[f32; 2]>,
    pub frame_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Single(SinglePrediction),
    Video(VideoPrediction),
}

/// Shape a verdict into the JSON body for its endpoint
pub fn format(modality: Modality, verdict: &AggregateVerdict) -> PredictionResponse {
    match modality {
        Modality::Image | Modality::Audio => PredictionResponse::Single(SinglePrediction {
            predicted_label: verdict.label,
            confidence: verdict.confidence,
            status: verdict.status,
        }),
        Modality::Video => PredictionResponse::Video(VideoPrediction {
            predicted_label: verdict.label,
            confidence: verdict.confidence,
            status: verdict.status,
            mean_probabilities: verdict.mean,
            per_frame_probs: verdict.results.iter().map(|r| r.probs.to_array()).collect(),
            frame_indices: verdict.results.iter().map(|r| r.frame_index).collect(),
        }),
    }
}

/// Parameters the web tier's result page renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub filename: String,
    pub result: Label,
    /// Percentage, two decimals
    pub confidence: f64,
    pub media_type: Modality,
}

impl ResultView {
    pub fn new(filename: &str, modality: Modality, verdict: &AggregateVerdict) -> Self {
        Self {
            filename: sanitize_filename(filename),
            result: verdict.label,
            confidence: to_percent(verdict.confidence),
            media_type: modality,
        }
    }

    /// `filename=..&result=..&confidence=..&media_type=..`, percent-encoded
    pub fn to_query(&self) -> String {
        let confidence = self.confidence.to_string();
        [
            ("filename", self.filename.as_str()),
            ("result", self.result.as_str()),
            ("confidence", confidence.as_str()),
            ("media_type", self.media_type.as_str()),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_VALUE)))
        .collect::<Vec<_>>()
        .join("&")
    }
}

fn to_percent(confidence: f32) -> f64 {
    (confidence as f64 * 100.0 * 100.0).round() / 100.0
}

/// Keep the final path component and only `[A-Za-z0-9._-]`
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
