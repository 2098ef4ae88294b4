use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use image::{RgbImage, imageops::FilterType};
use serde::Deserialize;

use super::{Classifier, LabelMap, ModelFiles, Sample};
use crate::error::{DetectionError, ErrContext, Result};

/// Normalization used by ViT image processors unless the model says otherwise
const DEFAULT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const DEFAULT_STD: [f32; 3] = [0.5, 0.5, 0.5];
const DEFAULT_IMAGE_SIZE: usize = 224;

#[derive(Deserialize)]
struct ImageGeometry {
    #[serde(default = "default_image_size")]
    image_size: usize,
}

fn default_image_size() -> usize {
    DEFAULT_IMAGE_SIZE
}

#[derive(Deserialize, Default)]
struct PreprocessorConfig {
    image_mean: Option<Vec<f32>>,
    image_std: Option<Vec<f32>>,
}

/// ViT image classifier (ViTForImageClassification weights) used for images and video frames
pub struct VitClassifier {
    name: String,
    model: vit::Model,
    device: Device,
    labels: LabelMap,
    image_size: usize,
    mean: [f32; 3],
    std: [f32; 3],
}

impl VitClassifier {
    pub fn load(files: &ModelFiles, label_fallback: Option<&[String]>, device: &Device) -> Result<Self> {
        log::info!("Loading ViT classifier {} on {:?}", files.name, device);

        let config_json =
            std::fs::read_to_string(&files.config).model_load("Read ViT config")?;
        let labels = LabelMap::from_config_json(&config_json, label_fallback)?;
        let config: vit::Config =
            serde_json::from_str(&config_json).model_load("Parse ViT config")?;
        let geometry: ImageGeometry =
            serde_json::from_str(&config_json).model_load("Parse ViT image size")?;

        let preprocessor: PreprocessorConfig = match &files.preprocessor {
            Some(path) => serde_json::from_str(
                &std::fs::read_to_string(path).model_load("Read preprocessor config")?,
            )
            .model_load("Parse preprocessor config")?,
            None => PreprocessorConfig::default(),
        };

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, device)
                .model_load("Map safetensors weights")?
        };
        let model = vit::Model::new(&config, labels.len(), vb).model_load("Build ViT model")?;

        log::info!(
            "ViT classifier {} loaded ({} labels: {:?})",
            files.name,
            labels.len(),
            labels.names()
        );

        Ok(Self {
            name: files.name.clone(),
            model,
            device: device.clone(),
            labels,
            image_size: geometry.image_size,
            mean: channel_triplet(preprocessor.image_mean, DEFAULT_MEAN),
            std: channel_triplet(preprocessor.image_std, DEFAULT_STD),
        })
    }

    /// Resize, rescale to [0,1], normalize and pack into an NCHW batch
    fn preprocess_batch(&self, images: &[&RgbImage]) -> Result<Tensor> {
        let size = self.image_size;
        let plane = size * size;
        let mut data = vec![0f32; images.len() * 3 * plane];

        for (batch_idx, img) in images.iter().enumerate() {
            let resized;
            let img = if img.dimensions() == (size as u32, size as u32) {
                *img
            } else {
                resized = image::imageops::resize(
                    *img,
                    size as u32,
                    size as u32,
                    FilterType::Triangle,
                );
                &resized
            };

            let offset = batch_idx * 3 * plane;
            for (i, pixel) in img.pixels().enumerate() {
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    data[offset + c * plane + i] = (value - self.mean[c]) / self.std[c];
                }
            }
        }

        Tensor::from_vec(data, (images.len(), 3, size, size), &self.device)
            .inference("Build input tensor")
    }
}

fn channel_triplet(values: Option<Vec<f32>>, default: [f32; 3]) -> [f32; 3] {
    match values.as_deref() {
        Some([a, b, c]) => [*a, *b, *c],
        _ => default,
    }
}

impl Classifier for VitClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn forward(&self, samples: &[Sample<'_>]) -> Result<Vec<Vec<f32>>> {
        if samples.is_empty() {
            return Ok(vec![]);
        }

        let images = samples
            .iter()
            .map(|s| match s {
                Sample::Image(img) => Ok(*img),
                Sample::Waveform(_) => Err(DetectionError::Inference(
                    "ViT classifier received audio input".into(),
                )),
            })
            .collect::<Result<Vec<&RgbImage>>>()?;

        let input = self.preprocess_batch(&images)?;
        let logits = self.model.forward(&input).inference("ViT forward pass")?;
        let probs = candle_nn::ops::softmax(&logits, 1).inference("Softmax")?;
        let rows: Vec<Vec<f32>> = probs.to_vec2().inference("Read probabilities")?;

        log::debug!("[vit] {} classified {} images in one pass", self.name, rows.len());
        Ok(rows)
    }
}
