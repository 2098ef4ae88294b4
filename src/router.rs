use std::sync::Arc;

use crate::classifier::{ClassificationResult, Sample};
use crate::error::{DetectionError, Result};
use crate::media::{DecodedMedia, Modality};
use crate::registry::ModelRegistry;

/// Dispatches decoded samples to the classifier for their modality
pub struct ClassifierRouter {
    registry: Arc<ModelRegistry>,
}

impl ClassifierRouter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Run the modality's classifier over every sample.
    ///
    /// Returns one result per sample in canonical (real, fake) order; video
    /// results carry their source frame index. Blocking.
    pub fn classify(
        &self,
        modality: Modality,
        media: &DecodedMedia,
    ) -> Result<Vec<ClassificationResult>> {
        if media.modality() != modality {
            return Err(DetectionError::Inference(format!(
                "{} samples routed to the {} classifier",
                media.modality(),
                modality
            )));
        }

        let (samples, indices): (Vec<Sample<'_>>, Vec<usize>) = match media {
            DecodedMedia::Image(img) => (vec![Sample::Image(img)], vec![0]),
            DecodedMedia::Video(frames) => frames
                .frames()
                .iter()
                .map(|f| (Sample::Image(&f.rgb), f.index))
                .unzip(),
            DecodedMedia::Audio(wave) => (vec![Sample::Waveform(wave.samples())], vec![0]),
        };

        let classifier = self.registry.get_or_init(modality)?;
        let rows = classifier.forward(&samples)?;
        if rows.len() != samples.len() {
            return Err(DetectionError::Inference(format!(
                "{} returned {} rows for {} samples",
                classifier.name(),
                rows.len(),
                samples.len()
            )));
        }

        let labels = classifier.labels();
        let results = rows
            .iter()
            .zip(indices)
            .map(|(row, frame_index)| {
                Ok(ClassificationResult {
                    frame_index,
                    probs: labels.to_probabilities(row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "[router] {} classified {} {} sample(s)",
            classifier.name(),
            results.len(),
            modality
        );
        Ok(results)
    }
}
