//! FER+ emotion classifier via ONNX Runtime.
//!
//! Runs the `emotion-ferplus` model on a 64×64 grayscale crop and turns its
//! eight logits into probabilities.

use super::{load_session, pick_label, preprocess, softmax, Classifier, EmotionModel, ModelError};
use crate::types::Prediction;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FERPLUS_INPUT_SIZE: u32 = 64;

/// FER+ output order.
pub const FERPLUS_EMOTIONS: [&str; 8] = [
    "neutral",
    "happiness",
    "surprise",
    "sadness",
    "anger",
    "disgust",
    "fear",
    "contempt",
];

/// FER+ emotion backend.
pub struct FerPlusEmotion {
    session: Session,
}

impl FerPlusEmotion {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        let session = load_session(model_path, "FER+ emotion")?;
        Ok(Self { session })
    }

    /// Grayscale 64×64, raw pixel values. The model was trained without
    /// normalization; feeding scaled input flattens its output.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        preprocess::gray_tensor(face, FERPLUS_INPUT_SIZE)
    }
}

impl Classifier for FerPlusEmotion {
    fn name(&self) -> &str {
        "FERPlus"
    }

    fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ModelError::EmptyInput);
        }

        let input = Self::preprocess(face);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("emotion scores: {e}")))?;

        let probs = softmax(logits);
        tracing::trace!(
            scores = ?FERPLUS_EMOTIONS.iter().zip(probs.iter()).collect::<Vec<_>>(),
            "emotion scores"
        );

        pick_label(&probs, &FERPLUS_EMOTIONS)
    }
}

impl EmotionModel for FerPlusEmotion {}
