//! smilage-core: face detection and per-face classification.
//!
//! Uses SCRFD for face detection and a registry of interchangeable
//! emotion/age/gender backends, running via ONNX Runtime (and optionally
//! OpenCV DNN for the Caffe nets).

pub mod detector;
pub mod models;
pub mod quality;
pub mod registry;
pub mod smoothing;
pub mod trigger;
pub mod types;

pub use detector::{DetectorError, FaceDetector, FaceLocator};
pub use models::{AgeModel, Classifier, EmotionModel, GenderModel, ModelError};
pub use registry::{Backend, CapabilitySummary, ModelManager};
pub use smoothing::LabelSmoother;
pub use trigger::{CapturePolicy, CaptureReason, CaptureTrigger};
pub use types::{largest_face, Capability, FaceRegion, Prediction, UNKNOWN_LABEL};

/// Label the emotion backends use for a smile.
pub const SMILE_LABEL: &str = "happiness";
