use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel label returned when no backend produced a result.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A classification task with its own label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Emotion,
    Age,
    Gender,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Emotion, Capability::Age, Capability::Gender];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Emotion => "emotion",
            Capability::Age => "age",
            Capability::Gender => "gender",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown capability: {0} (expected emotion, age or gender)")]
pub struct ParseCapabilityError(pub String);

impl FromStr for Capability {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emotion" => Ok(Capability::Emotion),
            "age" => Ok(Capability::Age),
            "gender" => Ok(Capability::Gender),
            other => Err(ParseCapabilityError(other.to_string())),
        }
    }
}

/// Result of one classifier on one face: a label and its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// Probability of `label` in [0, 1].
    pub confidence: f32,
}

impl Prediction {
    /// Build a prediction, clamping the confidence into [0, 1] (NaN becomes 0).
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// The neutral "no result" pair.
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.label != UNKNOWN_LABEL
    }
}

impl Default for Prediction {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Face rectangle in integer frame coordinates, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence.
    pub confidence: f32,
}

impl FaceRegion {
    /// Convert a floating-point detection into a region clamped to a
    /// `frame_width` × `frame_height` frame. Returns `None` when nothing of
    /// the box lies inside the frame.
    pub fn from_detection(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let x1 = x.max(0.0).round() as u32;
        let y1 = y.max(0.0).round() as u32;
        let x2 = ((x + width).round().max(0.0) as u32).min(frame_width);
        let y2 = ((y + height).round().max(0.0) as u32).min(frame_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Copy this region out of `frame`.
    pub fn crop(&self, frame: &RgbImage) -> RgbImage {
        image::imageops::crop_imm(frame, self.x, self.y, self.width, self.height).to_image()
    }
}

/// Pick the face with the largest area.
pub fn largest_face(faces: &[FaceRegion]) -> Option<&FaceRegion> {
    faces.iter().max_by_key(|f| f.area())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_clamps_confidence() {
        assert_eq!(Prediction::new("a", 1.5).confidence, 1.0);
        assert_eq!(Prediction::new("a", -0.2).confidence, 0.0);
        assert_eq!(Prediction::new("a", f32::NAN).confidence, 0.0);
    }

    #[test]
    fn test_unknown_prediction() {
        let p = Prediction::unknown();
        assert_eq!(p.label, UNKNOWN_LABEL);
        assert_eq!(p.confidence, 0.0);
        assert!(!p.is_known());
        assert!(Prediction::new("Male", 0.9).is_known());
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!("Emotion".parse::<Capability>(), Ok(Capability::Emotion));
        assert_eq!(" age ".parse::<Capability>(), Ok(Capability::Age));
        assert!("smile".parse::<Capability>().is_err());
        assert_eq!(Capability::Gender.to_string(), "gender");
    }

    #[test]
    fn test_region_clamped_to_frame() {
        let r = FaceRegion::from_detection(-10.0, 20.0, 100.0, 500.0, 0.9, 64, 48).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 20, 64, 28));
    }

    #[test]
    fn test_region_outside_frame() {
        assert!(FaceRegion::from_detection(100.0, 100.0, 10.0, 10.0, 0.9, 64, 48).is_none());
        assert!(FaceRegion::from_detection(f32::NAN, 0.0, 10.0, 10.0, 0.9, 64, 48).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let frame = RgbImage::new(64, 48);
        let r = FaceRegion::from_detection(10.0, 5.0, 20.0, 30.0, 0.9, 64, 48).unwrap();
        let crop = r.crop(&frame);
        assert_eq!(crop.dimensions(), (20, 30));
    }

    #[test]
    fn test_largest_face() {
        let small = FaceRegion {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            confidence: 0.99,
        };
        let big = FaceRegion {
            x: 20,
            y: 20,
            width: 30,
            height: 30,
            confidence: 0.6,
        };
        assert_eq!(largest_face(&[small, big]), Some(&big));
        assert_eq!(largest_face(&[]), None);
    }
}
