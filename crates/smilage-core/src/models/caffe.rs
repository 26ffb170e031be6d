//! Age and gender nets (Levi & Hassner Caffe models).
//!
//! Both nets share one input recipe: a 227×227 BGR blob with the training-set
//! mean subtracted and no scaling. The ONNX exports keep that recipe, so the
//! same preprocessing feeds either runtime.

use super::preprocess::{bgr_blob, BlobRecipe};
use super::{
    as_probabilities, load_session, pick_label, AgeModel, Classifier, GenderModel, ModelError,
};
use crate::types::Prediction;
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// Input recipe of the age/gender nets.
pub const AGE_GENDER_RECIPE: BlobRecipe = BlobRecipe {
    size: 227,
    mean_bgr: [78.426_337_76, 87.768_914_374, 114.895_847_746],
    scale: 1.0,
};

pub const AGE_BUCKETS: [&str; 8] = [
    "(0-2)", "(4-6)", "(8-12)", "(15-20)", "(25-32)", "(38-43)", "(48-53)", "(60-100)",
];

pub const GENDER_LABELS: [&str; 2] = ["Male", "Female"];

/// ONNX session plus the label set it scores.
struct BlobClassifier {
    session: Session,
    name: &'static str,
    labels: &'static [&'static str],
}

impl BlobClassifier {
    fn load(
        model_path: &Path,
        name: &'static str,
        labels: &'static [&'static str],
    ) -> Result<Self, ModelError> {
        let session = load_session(model_path, name)?;
        Ok(Self {
            session,
            name,
            labels,
        })
    }

    fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ModelError::EmptyInput);
        }

        let blob = bgr_blob(face, &AGE_GENDER_RECIPE);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(blob.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("{} scores: {e}", self.name)))?;

        pick_label(&as_probabilities(raw), self.labels)
    }
}

/// Age net exported to ONNX.
pub struct OnnxAgeNet(BlobClassifier);

impl OnnxAgeNet {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        BlobClassifier::load(model_path, "OnnxAgeNet", &AGE_BUCKETS).map(Self)
    }
}

impl Classifier for OnnxAgeNet {
    fn name(&self) -> &str {
        self.0.name
    }

    fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
        self.0.classify(face)
    }
}

impl AgeModel for OnnxAgeNet {}

/// Gender net exported to ONNX.
pub struct OnnxGenderNet(BlobClassifier);

impl OnnxGenderNet {
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        BlobClassifier::load(model_path, "OnnxGenderNet", &GENDER_LABELS).map(Self)
    }
}

impl Classifier for OnnxGenderNet {
    fn name(&self) -> &str {
        self.0.name
    }

    fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
        self.0.classify(face)
    }
}

impl GenderModel for OnnxGenderNet {}

#[cfg(feature = "opencv")]
pub use dnn::{CaffeAgeNet, CaffeGenderNet};

#[cfg(feature = "opencv")]
mod dnn {
    //! Caffe prototxt + caffemodel pairs, run through OpenCV DNN.

    use super::*;
    use crate::models::ensure_exists;
    use opencv::core::{Mat, MatTraitConst, Scalar};
    use opencv::dnn::{self, Net, NetTrait};

    struct CaffeNet {
        net: Net,
        name: &'static str,
        labels: &'static [&'static str],
    }

    impl CaffeNet {
        fn load(
            proto: &Path,
            model: &Path,
            name: &'static str,
            labels: &'static [&'static str],
        ) -> Result<Self, ModelError> {
            ensure_exists(proto)?;
            ensure_exists(model)?;

            let net = dnn::read_net_from_caffe(
                &proto.to_string_lossy(),
                &model.to_string_lossy(),
            )?;
            tracing::info!(
                proto = %proto.display(),
                model = %model.display(),
                "loaded {name} model"
            );

            Ok(Self { net, name, labels })
        }

        fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
            if face.width() == 0 || face.height() == 0 {
                return Err(ModelError::EmptyInput);
            }

            let blob = bgr_blob(face, &AGE_GENDER_RECIPE);
            let data = blob
                .as_slice()
                .ok_or_else(|| ModelError::InferenceFailed("blob is not contiguous".into()))?;
            let size = AGE_GENDER_RECIPE.size as i32;
            let flat = Mat::from_slice(data)?;
            let input = flat.reshape_nd(1, &[1, 3, size, size])?.try_clone()?;

            self.net.set_input(&input, "", 1.0, Scalar::default())?;
            let output = self.net.forward_single("")?;
            let raw = output.data_typed::<f32>()?;

            pick_label(&as_probabilities(raw), self.labels)
        }
    }

    /// Caffe age net.
    pub struct CaffeAgeNet(CaffeNet);

    impl CaffeAgeNet {
        pub fn load(proto: &Path, model: &Path) -> Result<Self, ModelError> {
            CaffeNet::load(proto, model, "CaffeAgeNet", &AGE_BUCKETS).map(Self)
        }
    }

    impl Classifier for CaffeAgeNet {
        fn name(&self) -> &str {
            self.0.name
        }

        fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
            self.0.classify(face)
        }
    }

    impl AgeModel for CaffeAgeNet {}

    /// Caffe gender net.
    pub struct CaffeGenderNet(CaffeNet);

    impl CaffeGenderNet {
        pub fn load(proto: &Path, model: &Path) -> Result<Self, ModelError> {
            CaffeNet::load(proto, model, "CaffeGenderNet", &GENDER_LABELS).map(Self)
        }
    }

    impl Classifier for CaffeGenderNet {
        fn name(&self) -> &str {
            self.0.name
        }

        fn classify(&mut self, face: &RgbImage) -> Result<Prediction, ModelError> {
            self.0.classify(face)
        }
    }

    impl GenderModel for CaffeGenderNet {}
}
