use ndarray::Array2;
use ort::session::Session;
use ort::value::Value;
use serde::Deserialize;
use std::sync::{Mutex, PoisonError};

use super::{Classifier, LabelMap, ModelFiles, Sample, softmax};
use crate::error::{DetectionError, ErrContext, Result};

const INTRA_THREADS: usize = 2;

#[derive(Deserialize)]
struct FeatureExtractorConfig {
    #[serde(default = "default_normalize")]
    do_normalize: bool,
}

fn default_normalize() -> bool {
    true
}

/// Waveform classifier exported to ONNX (wav2vec2-style `input_values` -> `logits`)
pub struct AudioClassifier {
    name: String,
    // ONNX Runtime needs exclusive access to run a session
    session: Mutex<Session>,
    labels: LabelMap,
    normalize: bool,
}

impl AudioClassifier {
    pub fn load(files: &ModelFiles) -> Result<Self> {
        log::info!("Loading ONNX audio classifier from {}", files.weights.display());

        let config_json =
            std::fs::read_to_string(&files.config).model_load("Read audio model config")?;
        let labels = LabelMap::from_config_json(&config_json, None)?;

        let normalize = match &files.preprocessor {
            Some(path) => {
                let raw = std::fs::read_to_string(path).model_load("Read feature extractor config")?;
                let cfg: FeatureExtractorConfig =
                    serde_json::from_str(&raw).model_load("Parse feature extractor config")?;
                cfg.do_normalize
            }
            None => default_normalize(),
        };

        let session = Session::builder()
            .model_load("Failed to create ONNX session builder")?
            .with_intra_threads(INTRA_THREADS)
            .model_load("Failed to set thread count")?
            .commit_from_file(&files.weights)
            .model_load("Failed to load ONNX model")?;

        log::info!(
            "Audio classifier {} loaded ({} labels: {:?})",
            files.name,
            labels.len(),
            labels.names()
        );

        Ok(Self {
            name: files.name.clone(),
            session: Mutex::new(session),
            labels,
            normalize,
        })
    }

    fn run_one(&self, waveform: &[f32]) -> Result<Vec<f32>> {
        let input = if self.normalize {
            zero_mean_unit_var(waveform)
        } else {
            waveform.to_vec()
        };

        let array = Array2::from_shape_vec((1, input.len()), input)
            .inference("Failed to create input_values array")?;
        let value = Value::from_array(array).inference("Failed to create input_values Value")?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![value])
            .inference("ONNX inference failed")?;

        let (_shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .inference("Failed to extract logits")?;

        Ok(softmax(logits))
    }
}

/// Wav2Vec2 feature-extractor normalization
fn zero_mean_unit_var(samples: &[f32]) -> Vec<f32> {
    let n = samples.len().max(1) as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    let denom = (var + 1e-7).sqrt();
    samples.iter().map(|x| (x - mean) / denom).collect()
}

impl Classifier for AudioClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn forward(&self, samples: &[Sample<'_>]) -> Result<Vec<Vec<f32>>> {
        samples
            .iter()
            .map(|s| match s {
                Sample::Waveform(wave) => self.run_one(wave),
                Sample::Image(_) => Err(DetectionError::Inference(
                    "audio classifier received image input".into(),
                )),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_moments() {
        let wave: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin() * 0.3 + 0.1).collect();
        let norm = zero_mean_unit_var(&wave);
        let n = norm.len() as f32;
        let mean = norm.iter().sum::<f32>() / n;
        let var = norm.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-4);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_normalization_of_silence_is_finite() {
        let norm = zero_mean_unit_var(&[0.0; 16]);
        assert!(norm.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_unreadable_model_files_are_model_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = ModelFiles {
            name: "missing-audio".into(),
            config: dir.path().join("config.json"),
            weights: dir.path().join("model.onnx"),
            preprocessor: None,
        };
        let result = AudioClassifier::load(&files);
        assert!(matches!(result, Err(DetectionError::ModelLoad(_))));

        std::fs::write(&files.config, r#"{"id2label": {"0": "real", "1": "fake"}}"#).unwrap();
        files.preprocessor = Some(dir.path().join("preprocessor_config.json"));
        let result = AudioClassifier::load(&files);
        assert!(matches!(result, Err(DetectionError::ModelLoad(_))));
    }
}
