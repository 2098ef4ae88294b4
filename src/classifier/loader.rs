//! Model file resolution and the production `ModelLoader`.
//!
//! A model source is either a local directory (checked first) or a Hugging Face
//! repo id fetched through the hf-hub cache.

use candle_core::Device;
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{AudioClassifier, Classifier, VitClassifier};
use crate::config::ModelsConfig;
use crate::error::{DetectionError, ErrContext, Result};
use crate::media::Modality;
use crate::registry::ModelLoader;

const VIT_WEIGHTS: &[&str] = &["model.safetensors"];
const ONNX_WEIGHTS: &[&str] = &["model.onnx", "onnx/model.onnx"];
const CONFIG_FILE: &str = "config.json";
const PREPROCESSOR_FILE: &str = "preprocessor_config.json";

/// On-disk files for one model
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub name: String,
    pub config: PathBuf,
    pub weights: PathBuf,
    pub preprocessor: Option<PathBuf>,
}

/// Locate config, weights (first candidate found) and optional preprocessor config
pub fn resolve_model_files(source: &str, weight_candidates: &[&str]) -> Result<ModelFiles> {
    let dir = Path::new(source);
    if dir.is_dir() {
        let config = dir.join(CONFIG_FILE);
        if !config.is_file() {
            return Err(DetectionError::ModelLoad(format!(
                "{} not found in {}",
                CONFIG_FILE,
                dir.display()
            )));
        }
        let weights = weight_candidates
            .iter()
            .map(|f| dir.join(f))
            .find(|p| p.is_file())
            .ok_or_else(|| {
                DetectionError::ModelLoad(format!(
                    "no weights ({}) in {}",
                    weight_candidates.join(", "),
                    dir.display()
                ))
            })?;
        let preprocessor = Some(dir.join(PREPROCESSOR_FILE)).filter(|p| p.is_file());

        return Ok(ModelFiles {
            name: source.to_string(),
            config,
            weights,
            preprocessor,
        });
    }

    log::info!("Fetching model {} from Hugging Face", source);
    let api = Api::new().model_load("Create Hugging Face client")?;
    let repo = api.repo(Repo::new(source.to_string(), RepoType::Model));

    let config = repo
        .get(CONFIG_FILE)
        .model_load(&format!("Fetch {} for {}", CONFIG_FILE, source))?;
    let weights = weight_candidates
        .iter()
        .find_map(|f| repo.get(f).ok())
        .ok_or_else(|| {
            DetectionError::ModelLoad(format!(
                "no weights ({}) in repo {}",
                weight_candidates.join(", "),
                source
            ))
        })?;
    let preprocessor = repo.get(PREPROCESSOR_FILE).ok();

    Ok(ModelFiles {
        name: source.to_string(),
        config,
        weights,
        preprocessor,
    })
}

/// Device the candle models run on
pub fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    let device = Device::new_cuda(0).unwrap_or(Device::Cpu);
    #[cfg(all(feature = "metal", not(feature = "cuda")))]
    let device = Device::new_metal(0).unwrap_or(Device::Cpu);
    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    let device = Device::Cpu;
    device
}

/// Loads the configured pretrained classifier for each modality
pub struct HubModelLoader {
    models: ModelsConfig,
    device: Device,
}

impl HubModelLoader {
    pub fn new(models: ModelsConfig, device: Device) -> Self {
        Self { models, device }
    }
}

impl ModelLoader for HubModelLoader {
    fn load(&self, modality: Modality) -> Result<Arc<dyn Classifier>> {
        let classifier: Arc<dyn Classifier> = match modality {
            Modality::Image => {
                let files = resolve_model_files(&self.models.image, VIT_WEIGHTS)?;
                Arc::new(VitClassifier::load(&files, None, &self.device)?)
            }
            Modality::Video => {
                let files = resolve_model_files(&self.models.video, VIT_WEIGHTS)?;
                Arc::new(VitClassifier::load(
                    &files,
                    Some(self.models.video_labels.as_slice()),
                    &self.device,
                )?)
            }
            Modality::Audio => {
                let files = resolve_model_files(&self.models.audio, ONNX_WEIGHTS)?;
                Arc::new(AudioClassifier::load(&files)?)
            }
        };
        Ok(classifier)
    }
}
