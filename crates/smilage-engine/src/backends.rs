//! Loading the detector and classifier backends named in [`Config`].

use crate::config::Config;
use smilage_core::detector::DetectorError;
use smilage_core::models::{FerPlusEmotion, ModelError, OnnxAgeNet, OnnxGenderNet};
use smilage_core::{Backend, Capability, FaceDetector, ModelManager};

/// Keys the stock backends are registered under.
pub const FERPLUS_KEY: &str = "ferplus";
pub const ONNX_AGE_KEY: &str = "onnx_age";
pub const ONNX_GENDER_KEY: &str = "onnx_gender";
#[cfg(feature = "opencv")]
pub const CAFFE_AGE_KEY: &str = "caffe_age";
#[cfg(feature = "opencv")]
pub const CAFFE_GENDER_KEY: &str = "caffe_gender";

fn try_register(
    models: &mut ModelManager,
    key: &str,
    loaded: Result<Backend, ModelError>,
) {
    match loaded {
        Ok(backend) => models.register(key, backend),
        Err(e) => tracing::warn!(%key, error = %e, "backend not registered"),
    }
}

/// Register every backend whose weights load, then activate the configured
/// keys. Nothing here is fatal: a capability may end up empty.
pub fn load_model_manager(config: &Config) -> ModelManager {
    let mut models = ModelManager::new();

    try_register(
        &mut models,
        FERPLUS_KEY,
        FerPlusEmotion::load(&config.emotion_model_path())
            .map(|m| Backend::Emotion(Box::new(m))),
    );
    try_register(
        &mut models,
        ONNX_AGE_KEY,
        OnnxAgeNet::load(&config.age_onnx_path()).map(|m| Backend::Age(Box::new(m))),
    );
    try_register(
        &mut models,
        ONNX_GENDER_KEY,
        OnnxGenderNet::load(&config.gender_onnx_path()).map(|m| Backend::Gender(Box::new(m))),
    );

    #[cfg(feature = "opencv")]
    {
        use smilage_core::models::{CaffeAgeNet, CaffeGenderNet};

        let (proto, model) = config.age_caffe_paths();
        try_register(
            &mut models,
            CAFFE_AGE_KEY,
            CaffeAgeNet::load(&proto, &model).map(|m| Backend::Age(Box::new(m))),
        );
        let (proto, model) = config.gender_caffe_paths();
        try_register(
            &mut models,
            CAFFE_GENDER_KEY,
            CaffeGenderNet::load(&proto, &model).map(|m| Backend::Gender(Box::new(m))),
        );
    }

    activate_configured(&mut models, config);

    for capability in Capability::ALL {
        if models.is_empty(capability) {
            tracing::warn!(%capability, "no backend available, predictions will be unknown");
        }
    }

    models
}

/// Switch to the backends the config asks for. Unknown keys are logged and
/// the current active backend stays.
pub fn activate_configured(models: &mut ModelManager, config: &Config) {
    let wanted = [
        (Capability::Emotion, &config.emotion_backend),
        (Capability::Age, &config.age_backend),
        (Capability::Gender, &config.gender_backend),
    ];
    for (capability, key) in wanted {
        let Some(key) = key else {
            continue;
        };
        if !models.switch_active(capability, key) {
            tracing::warn!(
                %capability,
                %key,
                available = ?models.keys(capability),
                "configured backend is not registered"
            );
        }
    }
}

pub fn load_face_detector(config: &Config) -> Result<FaceDetector, DetectorError> {
    FaceDetector::load(&config.detector_model_path())
}
