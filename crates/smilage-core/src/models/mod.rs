//! Capability interfaces and the inference backends that implement them.
//!
//! Every backend owns a fixed input recipe (see [`preprocess`]). The recipes
//! belong to the weight files they were trained with and must change only
//! together with them.

pub mod caffe;
pub mod ferplus;
pub mod preprocess;

use crate::types::Prediction;
use image::RgbImage;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

pub use caffe::{OnnxAgeNet, OnnxGenderNet, AGE_BUCKETS, GENDER_LABELS};
#[cfg(feature = "opencv")]
pub use caffe::{CaffeAgeNet, CaffeGenderNet};
pub use ferplus::{FerPlusEmotion, FERPLUS_EMOTIONS};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (place the weights in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty face crop")]
    EmptyInput,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "opencv")]
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// A per-face classifier producing one (label, confidence) pair.
pub trait Classifier: Send {
    /// Human-readable backend name (e.g. "FERPlus").
    fn name(&self) -> &str;

    /// Classify one face crop.
    fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError>;
}

/// Facial expression classifier.
pub trait EmotionModel: Classifier {}

/// Age bucket classifier.
pub trait AgeModel: Classifier {}

/// Gender classifier.
pub trait GenderModel: Classifier {}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|v| v / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

/// Index of the largest value. NaN entries never win.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

/// Outputs of nets ending in a softmax layer are used as-is; anything else
/// (raw logits, or an export that dropped the final layer) is normalized.
pub fn as_probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let in_range = raw.iter().all(|v| (0.0..=1.0).contains(v));
    if in_range && (sum - 1.0).abs() < 1e-3 {
        raw.to_vec()
    } else {
        softmax(raw)
    }
}

/// Map a probability vector onto its label set.
pub(crate) fn pick_label(probs: &[f32], labels: &[&str]) -> Result<Prediction, ModelError> {
    if probs.len() != labels.len() {
        return Err(ModelError::InferenceFailed(format!(
            "expected {} scores, got {}",
            labels.len(),
            probs.len()
        )));
    }
    let idx = argmax(probs)
        .ok_or_else(|| ModelError::InferenceFailed("no finite scores".to_string()))?;
    Ok(Prediction::new(labels[idx], probs[idx]))
}

pub(crate) fn ensure_exists(path: &Path) -> Result<(), ModelError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ModelError::ModelNotFound(path.display().to_string()))
    }
}

/// Open an ONNX session on a small CPU thread budget.
pub(crate) fn load_session(path: &Path, what: &str) -> Result<Session, ModelError> {
    ensure_exists(path)?;

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?;

    tracing::info!(
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded {what} model"
    );

    Ok(session)
}
