//! WebSocket wire format.
//!
//! Inbound messages are JSON objects with an `action` tag. Outbound messages
//! are one of three untagged shapes: a frame payload, a benchmark progress
//! update or the benchmark results.

use crate::benchmark::BenchmarkResults;
use crate::gallery::encode_jpeg;
use crate::session::{FramePredictions, FrameReport, SessionControls};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Label sent before any face has been seen.
pub const PLACEHOLDER_LABEL: &str = "-";
const FRAME_JPEG_QUALITY: u8 = 80;

/// Commands from the browser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    ManualCapture,
    UpdateThreshold {
        #[serde(default)]
        value: Option<f32>,
    },
    RunBenchmark,
}

impl ControlMessage {
    /// Parse one text frame. Malformed JSON and unknown actions yield `None`
    /// and a warning.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(error = %e, message = text, "ignoring control message");
                None
            }
        }
    }

    /// Hand the command to the capture loop.
    pub fn apply(&self, controls: &SessionControls) {
        match self {
            ControlMessage::ManualCapture => {
                tracing::info!("manual capture requested");
                controls.request_manual_capture();
            }
            ControlMessage::UpdateThreshold { value: Some(value) } => {
                if controls.set_threshold(*value) {
                    tracing::info!(threshold = controls.threshold(), "smile threshold updated");
                } else {
                    tracing::warn!(value, "rejected smile threshold");
                }
            }
            ControlMessage::UpdateThreshold { value: None } => {
                tracing::warn!("update_threshold without a value");
            }
            ControlMessage::RunBenchmark => controls.request_benchmark(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionsPayload {
    pub emotion: String,
    pub age: String,
    pub gender: String,
    pub smile_score: f32,
    pub is_blurry: bool,
}

impl Default for PredictionsPayload {
    fn default() -> Self {
        Self {
            emotion: PLACEHOLDER_LABEL.to_string(),
            age: PLACEHOLDER_LABEL.to_string(),
            gender: PLACEHOLDER_LABEL.to_string(),
            smile_score: 0.0,
            is_blurry: false,
        }
    }
}

impl From<&FramePredictions> for PredictionsPayload {
    fn from(p: &FramePredictions) -> Self {
        Self {
            emotion: p.emotion.label.clone(),
            age: p.age.label.clone(),
            gender: p.gender.label.clone(),
            smile_score: p.smile_score,
            is_blurry: p.is_blurry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePayload {
    /// Base64 JPEG of the annotated frame.
    pub frame: String,
    pub predictions: PredictionsPayload,
    pub is_smiling: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Frame(FramePayload),
    BenchmarkProgress { benchmark_progress: f32 },
    BenchmarkResults { benchmark_results: BenchmarkResults },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages for one frame report, benchmark updates first.
pub fn messages_for(report: &FrameReport) -> Result<Vec<ServerMessage>, image::ImageError> {
    let mut out = Vec::with_capacity(3);

    if let Some(tick) = &report.benchmark {
        out.push(ServerMessage::BenchmarkProgress {
            benchmark_progress: tick.progress,
        });
        if let Some(results) = &tick.results {
            out.push(ServerMessage::BenchmarkResults {
                benchmark_results: results.clone(),
            });
        }
    }

    let jpeg = encode_jpeg(&report.annotated, FRAME_JPEG_QUALITY)?;
    out.push(ServerMessage::Frame(FramePayload {
        frame: BASE64.encode(jpeg),
        predictions: report
            .predictions
            .as_ref()
            .map(PredictionsPayload::from)
            .unwrap_or_default(),
        is_smiling: report.is_smiling,
        capture: report.captured.is_some().then_some(true),
    }));

    Ok(out)
}
