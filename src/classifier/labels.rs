//! Model label sets resolved to real/fake by name.
//!
//! The image, video and audio models do not agree on class order, so index 0
//! is never assumed to be "real". Each `id2label` entry is matched by name;
//! models that only ship generic `LABEL_n` names take a configured order.

use serde::Deserialize;
use std::collections::HashMap;

use super::{Label, ProbabilityVector};
use crate::error::{DetectionError, ErrContext, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    /// Model output index -> class
    by_index: Vec<Label>,
    names: Vec<String>,
}

#[derive(Deserialize)]
struct LabelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Match a model label name to a class
fn resolve_label(name: &str) -> Option<Label> {
    let lower = name.to_lowercase();
    if lower.contains("fake") || lower.contains("spoof") {
        Some(Label::Fake)
    } else if lower.contains("real") || lower.contains("bona") || lower.contains("genuine") {
        Some(Label::Real)
    } else {
        None
    }
}

impl LabelMap {
    /// Build from names in model output order. Exactly one real and one fake class required.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut by_index = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let label = resolve_label(name).ok_or_else(|| {
                DetectionError::ModelLoad(format!("unrecognized model label '{}'", name))
            })?;
            by_index.push(label);
        }

        let count = |label: Label| by_index.iter().filter(|l| **l == label).count();
        if count(Label::Real) != 1 || count(Label::Fake) != 1 {
            return Err(DetectionError::ModelLoad(format!(
                "label set {:?} must contain exactly one real and one fake class",
                names.iter().map(|n| n.as_ref()).collect::<Vec<_>>()
            )));
        }

        Ok(Self {
            by_index,
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
        })
    }

    /// Read `id2label` from a model's `config.json`.
    /// `fallback` names are used when the config's own names do not resolve.
    pub fn from_config_json(json: &str, fallback: Option<&[String]>) -> Result<Self> {
        let config: LabelConfig = serde_json::from_str(json).model_load("Parse model config")?;

        let mut entries: Vec<(usize, String)> = config
            .id2label
            .into_iter()
            .map(|(id, name)| {
                id.trim()
                    .parse::<usize>()
                    .map(|id| (id, name))
                    .model_load("Non-numeric id2label key")
            })
            .collect::<Result<_>>()?;
        entries.sort_by_key(|(id, _)| *id);

        if entries.iter().enumerate().any(|(i, (id, _))| i != *id) {
            return Err(DetectionError::ModelLoad(
                "id2label ids are not contiguous from 0".into(),
            ));
        }

        let names: Vec<String> = entries.into_iter().map(|(_, name)| name).collect();

        match (Self::from_names(&names), fallback) {
            (Ok(map), _) => Ok(map),
            (Err(e), None) => Err(e),
            (Err(_), Some(fallback)) => {
                if !names.is_empty() && names.len() != fallback.len() {
                    return Err(DetectionError::ModelLoad(format!(
                        "model has {} classes but {} fallback labels are configured",
                        names.len(),
                        fallback.len()
                    )));
                }
                log::info!(
                    "[labels] Model labels {:?} are generic, using configured order {:?}",
                    names,
                    fallback
                );
                Self::from_names(fallback)
            }
        }
    }

    /// Number of model output classes
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Reorder one softmax row into canonical (real, fake)
    pub fn to_probabilities(&self, row: &[f32]) -> Result<ProbabilityVector> {
        if row.len() != self.by_index.len() {
            return Err(DetectionError::Inference(format!(
                "model returned {} classes, expected {}",
                row.len(),
                self.by_index.len()
            )));
        }

        let mut probs = ProbabilityVector::new(0.0, 0.0);
        for (label, p) in self.by_index.iter().zip(row) {
            match label {
                Label::Real => probs.real = *p,
                Label::Fake => probs.fake = *p,
            }
        }
        Ok(probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_by_name_not_index() {
        let map = LabelMap::from_names(&["Fake", "Real"]).unwrap();
        let probs = map.to_probabilities(&[0.9, 0.1]).unwrap();
        assert_eq!(probs, ProbabilityVector::new(0.1, 0.9));
    }

    #[test]
    fn test_case_and_synonyms() {
        assert!(LabelMap::from_names(&["bonafide", "spoof"]).is_ok());
        assert!(LabelMap::from_names(&["REAL_FACE", "deepfake"]).is_ok());
    }

    #[test]
    fn test_rejects_unknown_and_duplicate_classes() {
        assert!(matches!(
            LabelMap::from_names(&["cat", "dog"]),
            Err(DetectionError::ModelLoad(_))
        ));
        assert!(LabelMap::from_names(&["real", "real_too"]).is_err());
    }

    #[test]
    fn test_config_json_sorted_by_id() {
        let json = r#"{"id2label": {"1": "Real", "0": "Fake"}, "hidden_size": 768}"#;
        let map = LabelMap::from_config_json(json, None).unwrap();
        assert_eq!(map.names(), &["Fake".to_string(), "Real".to_string()]);
        let probs = map.to_probabilities(&[0.3, 0.7]).unwrap();
        assert_eq!(probs.real, 0.7);
        assert_eq!(probs.fake, 0.3);
    }

    #[test]
    fn test_generic_labels_use_fallback() {
        let json = r#"{"id2label": {"0": "LABEL_0", "1": "LABEL_1"}}"#;
        assert!(LabelMap::from_config_json(json, None).is_err());

        let fallback = vec!["real".to_string(), "fake".to_string()];
        let map = LabelMap::from_config_json(json, Some(&fallback)).unwrap();
        let probs = map.to_probabilities(&[0.25, 0.75]).unwrap();
        assert_eq!(probs, ProbabilityVector::new(0.25, 0.75));
    }

    #[test]
    fn test_fallback_size_must_match() {
        let json = r#"{"id2label": {"0": "LABEL_0", "1": "LABEL_1", "2": "LABEL_2"}}"#;
        let fallback = vec!["real".to_string(), "fake".to_string()];
        assert!(LabelMap::from_config_json(json, Some(&fallback)).is_err());
    }

    #[test]
    fn test_row_length_mismatch_is_inference_error() {
        let map = LabelMap::from_names(&["real", "fake"]).unwrap();
        assert!(matches!(
            map.to_probabilities(&[1.0]),
            Err(DetectionError::Inference(_))
        ));
    }
}
