use image::RgbImage;
use serde::Serialize;
use std::fmt;

use crate::error::Result;

mod audio;
mod labels;
mod loader;
mod vit;

pub use audio::AudioClassifier;
pub use labels::LabelMap;
pub use loader::{HubModelLoader, ModelFiles, resolve_model_files, select_device};
pub use vit::VitClassifier;

/// Authenticity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Real,
    Fake,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Real => "real",
            Label::Fake => "fake",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class probabilities in canonical (real, fake) order, whatever the model's own order is
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbabilityVector {
    pub real: f32,
    pub fake: f32,
}

impl ProbabilityVector {
    pub fn new(real: f32, fake: f32) -> Self {
        Self { real, fake }
    }

    pub fn get(&self, label: Label) -> f32 {
        match label {
            Label::Real => self.real,
            Label::Fake => self.fake,
        }
    }

    /// `[real, fake]`
    pub fn to_array(&self) -> [f32; 2] {
        [self.real, self.fake]
    }

    /// Fake must strictly outweigh real; an exact tie reads as real
    pub fn argmax(&self) -> Label {
        if self.fake > self.real {
            Label::Fake
        } else {
            Label::Real
        }
    }

    pub fn sum(&self) -> f32 {
        self.real + self.fake
    }
}

/// One probability vector and the frame it came from (0 for image and audio)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub frame_index: usize,
    pub probs: ProbabilityVector,
}

/// Preprocessed-ready input for a single forward row
pub enum Sample<'a> {
    Image(&'a RgbImage),
    Waveform(&'a [f32]),
}

/// Pretrained authenticity classifier.
///
/// Implementations are read-only after construction and are shared across
/// requests, so `forward` takes `&self`.
pub trait Classifier: Send + Sync {
    /// Model identifier for logs and health output
    fn name(&self) -> &str;

    fn labels(&self) -> &LabelMap;

    /// Softmax probabilities in the model's label order, one row per sample
    fn forward(&self, samples: &[Sample<'_>]) -> Result<Vec<Vec<f32>>>;
}

/// Numerically stable softmax over one row of logits
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
