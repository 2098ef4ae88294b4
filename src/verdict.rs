//! Aggregation of per-sample probabilities into one verdict, plus the
//! three-tier moderation status derived from it.

use serde::Serialize;

use crate::classifier::{ClassificationResult, Label, ProbabilityVector};
use crate::constants::DEFAULT_BLOCK_THRESHOLD;
use crate::error::{DetectionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Safe,
    Suspicious,
    Blocked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Safe => "safe",
            Status::Suspicious => "suspicious",
            Status::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    /// Fake confidence at or above which media is blocked
    pub block: f32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            block: DEFAULT_BLOCK_THRESHOLD,
        }
    }
}

impl TierThresholds {
    pub fn status(&self, label: Label, confidence: f32) -> Status {
        match label {
            Label::Real => Status::Safe,
            Label::Fake if confidence >= self.block => Status::Blocked,
            Label::Fake => Status::Suspicious,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateVerdict {
    pub label: Label,
    /// Mean probability of `label`
    pub confidence: f32,
    pub status: Status,
    pub mean: ProbabilityVector,
    /// Per-sample results the mean was taken over, in sample order
    pub results: Vec<ClassificationResult>,
}

/// Elementwise mean over all samples, then argmax (ties read as real)
pub fn aggregate(
    results: &[ClassificationResult],
    thresholds: &TierThresholds,
) -> Result<AggregateVerdict> {
    if results.is_empty() {
        return Err(DetectionError::EmptyMedia(
            "no classified samples to aggregate".into(),
        ));
    }

    let (real, fake) = results.iter().fold((0f64, 0f64), |(real, fake), r| {
        (real + r.probs.real as f64, fake + r.probs.fake as f64)
    });
    let k = results.len() as f64;
    let mean = ProbabilityVector::new((real / k) as f32, (fake / k) as f32);

    let label = mean.argmax();
    let confidence = mean.get(label);
    let status = thresholds.status(label, confidence);

    log::debug!(
        "[verdict] {} samples -> {} ({:.4}, {})",
        results.len(),
        label,
        confidence,
        status.as_str()
    );

    Ok(AggregateVerdict {
        label,
        confidence,
        status,
        mean,
        results: results.to_vec(),
    })
}
