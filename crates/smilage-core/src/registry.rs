//! Named backends per capability and the facade that routes predictions.
//!
//! Each capability keeps its own set of keyed backends with at most one
//! active. Predictions never fail: a missing or failing backend yields the
//! unknown pair and a warning in the log.

use crate::models::{AgeModel, Classifier, EmotionModel, GenderModel};
use crate::types::{Capability, Prediction};
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;

/// Keyed backends for one capability.
pub struct Registry<M: ?Sized> {
    backends: BTreeMap<String, Box<M>>,
    active: Option<String>,
}

impl<M: ?Sized> Default for Registry<M> {
    fn default() -> Self {
        Self {
            backends: BTreeMap::new(),
            active: None,
        }
    }
}

impl<M: Classifier + ?Sized> Registry<M> {
    /// Add or replace a backend. The first registration becomes active;
    /// replacing the active key keeps it active with the new backend.
    pub fn register(&mut self, key: impl Into<String>, backend: Box<M>) {
        let key = key.into();
        if self.backends.insert(key.clone(), backend).is_some() {
            tracing::debug!(%key, "replaced backend");
        }
        if self.active.is_none() {
            self.active = Some(key);
        }
    }

    /// Make `key` active. Returns false (and changes nothing) for unknown keys.
    pub fn switch_active(&mut self, key: &str) -> bool {
        if self.backends.contains_key(key) {
            self.active = Some(key.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Run the active backend on `face`.
    pub fn predict(&mut self, face: &RgbImage) -> Prediction {
        let Some(key) = self.active.as_deref() else {
            return Prediction::unknown();
        };
        let Some(backend) = self.backends.get_mut(key) else {
            return Prediction::unknown();
        };
        match backend.classify(face) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(backend = key, error = %e, "prediction failed");
                Prediction::unknown()
            }
        }
    }
}

/// A backend tagged with the capability it serves.
pub enum Backend {
    Emotion(Box<dyn EmotionModel>),
    Age(Box<dyn AgeModel>),
    Gender(Box<dyn GenderModel>),
}

impl Backend {
    pub fn capability(&self) -> Capability {
        match self {
            Backend::Emotion(_) => Capability::Emotion,
            Backend::Age(_) => Capability::Age,
            Backend::Gender(_) => Capability::Gender,
        }
    }
}

/// Registered and active backends for one capability, as reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySummary {
    pub capability: Capability,
    pub active: Option<String>,
    pub available: Vec<String>,
}

/// Facade over the three capability registries.
#[derive(Default)]
pub struct ModelManager {
    emotion: Registry<dyn EmotionModel>,
    age: Registry<dyn AgeModel>,
    gender: Registry<dyn GenderModel>,
}

impl ModelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_emotion(&mut self, key: impl Into<String>, model: Box<dyn EmotionModel>) {
        self.emotion.register(key, model);
    }

    pub fn register_age(&mut self, key: impl Into<String>, model: Box<dyn AgeModel>) {
        self.age.register(key, model);
    }

    pub fn register_gender(&mut self, key: impl Into<String>, model: Box<dyn GenderModel>) {
        self.gender.register(key, model);
    }

    /// Register a backend under the capability it carries.
    pub fn register(&mut self, key: impl Into<String>, backend: Backend) {
        let key = key.into();
        tracing::info!(capability = %backend.capability(), %key, "registered backend");
        match backend {
            Backend::Emotion(m) => self.register_emotion(key, m),
            Backend::Age(m) => self.register_age(key, m),
            Backend::Gender(m) => self.register_gender(key, m),
        }
    }

    pub fn switch_active(&mut self, capability: Capability, key: &str) -> bool {
        let switched = match capability {
            Capability::Emotion => self.emotion.switch_active(key),
            Capability::Age => self.age.switch_active(key),
            Capability::Gender => self.gender.switch_active(key),
        };
        if switched {
            tracing::info!(%capability, %key, "switched active backend");
        }
        switched
    }

    pub fn active_key(&self, capability: Capability) -> Option<&str> {
        match capability {
            Capability::Emotion => self.emotion.active_key(),
            Capability::Age => self.age.active_key(),
            Capability::Gender => self.gender.active_key(),
        }
    }

    pub fn keys(&self, capability: Capability) -> Vec<String> {
        match capability {
            Capability::Emotion => self.emotion.keys(),
            Capability::Age => self.age.keys(),
            Capability::Gender => self.gender.keys(),
        }
    }

    pub fn is_empty(&self, capability: Capability) -> bool {
        match capability {
            Capability::Emotion => self.emotion.is_empty(),
            Capability::Age => self.age.is_empty(),
            Capability::Gender => self.gender.is_empty(),
        }
    }

    pub fn predict(&mut self, capability: Capability, face: &RgbImage) -> Prediction {
        match capability {
            Capability::Emotion => self.emotion.predict(face),
            Capability::Age => self.age.predict(face),
            Capability::Gender => self.gender.predict(face),
        }
    }

    pub fn predict_emotion(&mut self, face: &RgbImage) -> Prediction {
        self.emotion.predict(face)
    }

    pub fn predict_age(&mut self, face: &RgbImage) -> Prediction {
        self.age.predict(face)
    }

    pub fn predict_gender(&mut self, face: &RgbImage) -> Prediction {
        self.gender.predict(face)
    }

    pub fn summary(&self) -> Vec<CapabilitySummary> {
        Capability::ALL
            .iter()
            .map(|&capability| CapabilitySummary {
                capability,
                active: self.active_key(capability).map(str::to_string),
                available: self.keys(capability),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ModelError;

    /// Classifier returning a fixed answer, or failing.
    pub(crate) struct Fixed {
        pub label: &'static str,
        pub confidence: f32,
        pub fail: bool,
    }

    impl Fixed {
        pub fn new(label: &'static str, confidence: f32) -> Self {
            Self {
                label,
                confidence,
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                label: "",
                confidence: 0.0,
                fail: true,
            }
        }
    }

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn classify(&mut self, _face: &RgbImage) -> Result<Prediction, ModelError> {
            if self.fail {
                Err(ModelError::InferenceFailed("stub".into()))
            } else {
                Ok(Prediction::new(self.label, self.confidence))
            }
        }
    }

    impl EmotionModel for Fixed {}
    impl AgeModel for Fixed {}
    impl GenderModel for Fixed {}

    fn face() -> RgbImage {
        RgbImage::new(8, 8)
    }

    #[test]
    fn test_empty_registry_returns_unknown() {
        let mut mm = ModelManager::new();
        assert!(mm.is_empty(Capability::Emotion));
        assert_eq!(mm.predict_emotion(&face()), Prediction::unknown());
        assert_eq!(mm.active_key(Capability::Age), None);
    }

    #[test]
    fn test_first_registration_becomes_active() {
        let mut mm = ModelManager::new();
        mm.register_emotion("a", Box::new(Fixed::new("happiness", 0.9)));
        mm.register_emotion("b", Box::new(Fixed::new("sadness", 0.8)));
        assert_eq!(mm.active_key(Capability::Emotion), Some("a"));
        assert_eq!(mm.predict_emotion(&face()).label, "happiness");
        assert_eq!(mm.keys(Capability::Emotion), vec!["a", "b"]);
    }

    #[test]
    fn test_switch_active() {
        let mut mm = ModelManager::new();
        mm.register_age("a", Box::new(Fixed::new("(0-2)", 0.5)));
        mm.register_age("b", Box::new(Fixed::new("(25-32)", 0.6)));
        assert!(mm.switch_active(Capability::Age, "b"));
        assert_eq!(mm.predict_age(&face()).label, "(25-32)");
        assert!(!mm.switch_active(Capability::Age, "missing"));
        assert_eq!(mm.active_key(Capability::Age), Some("b"));
    }

    #[test]
    fn test_replacing_active_key_keeps_it_active() {
        let mut mm = ModelManager::new();
        mm.register_gender("g", Box::new(Fixed::new("Male", 0.7)));
        mm.register_gender("g", Box::new(Fixed::new("Female", 0.8)));
        assert_eq!(mm.keys(Capability::Gender), vec!["g"]);
        assert_eq!(mm.active_key(Capability::Gender), Some("g"));
        assert_eq!(mm.predict_gender(&face()).label, "Female");
    }

    #[test]
    fn test_failing_backend_yields_unknown() {
        let mut mm = ModelManager::new();
        mm.register(
            "broken",
            Backend::Emotion(Box::new(Fixed::failing())),
        );
        let p = mm.predict(Capability::Emotion, &face());
        assert!(!p.is_known());
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn test_capabilities_are_independent() {
        let mut mm = ModelManager::new();
        mm.register("e", Backend::Emotion(Box::new(Fixed::new("neutral", 0.4))));
        assert!(!mm.is_empty(Capability::Emotion));
        assert!(mm.is_empty(Capability::Age));
        assert!(!mm.switch_active(Capability::Age, "e"));
    }

    #[test]
    fn test_summary() {
        let mut mm = ModelManager::new();
        mm.register("ferplus", Backend::Emotion(Box::new(Fixed::new("neutral", 0.4))));
        let summary = mm.summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].capability, Capability::Emotion);
        assert_eq!(summary[0].active.as_deref(), Some("ferplus"));
        assert!(summary[1].available.is_empty());
    }
}
