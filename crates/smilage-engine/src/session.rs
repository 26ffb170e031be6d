//! The per-run capture context and its frame loop.
//!
//! A [`CaptureSession`] is built once per connection (or CLI run). It owns the
//! detector, trigger, smoother, gallery and overlay, and shares the model
//! manager and a set of [`SessionControls`] with the outside world. Controls
//! are plain atomics: the loop reads them once per frame, so a request takes
//! effect at most one frame late.

use crate::benchmark::{BenchmarkTick, SessionBenchmark, SystemSampler};
use crate::config::Config;
use crate::gallery::{Gallery, GalleryError};
use crate::overlay::{FaceAnnotation, Overlay};
use crate::backends;
use image::RgbImage;
use smilage_core::detector::DetectorError;
use smilage_core::{
    largest_face, quality, CapturePolicy, CaptureReason, CaptureTrigger, FaceLocator, FaceRegion,
    LabelSmoother, ModelManager, Prediction, SMILE_LABEL,
};
use smilage_hw::{Camera, CameraError, FrameSource};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

const BANNER_TEXT: &str = "Selfie Captured";
const BANNER_DURATION: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
}

/// Flags written by a control task and read by the capture loop.
#[derive(Debug)]
pub struct SessionControls {
    manual_capture: AtomicBool,
    threshold_bits: AtomicU32,
    benchmark: AtomicBool,
    stop: AtomicBool,
}

impl SessionControls {
    pub fn new(smile_threshold: f32) -> Self {
        Self {
            manual_capture: AtomicBool::new(false),
            threshold_bits: AtomicU32::new(smile_threshold.clamp(0.0, 1.0).to_bits()),
            benchmark: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    pub fn request_manual_capture(&self) {
        self.manual_capture.store(true, Ordering::Relaxed);
    }

    pub fn take_manual_capture(&self) -> bool {
        self.manual_capture.swap(false, Ordering::Relaxed)
    }

    /// Set the smile threshold, clamped to [0, 1]. Non-finite values are
    /// rejected.
    pub fn set_threshold(&self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.threshold_bits
            .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        true
    }

    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::Relaxed))
    }

    pub fn request_benchmark(&self) {
        self.benchmark.store(true, Ordering::Relaxed);
    }

    pub fn take_benchmark_request(&self) -> bool {
        self.benchmark.swap(false, Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Loop tuning taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub blur_threshold: f64,
    pub policy: CapturePolicy,
    pub smoothing_window: usize,
    pub benchmark_frames: usize,
    pub frame_interval: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            blur_threshold: config.blur_threshold,
            policy: config.capture_policy(),
            smoothing_window: config.smoothing_window,
            benchmark_frames: config.benchmark_frames,
            frame_interval: config.frame_interval(),
        }
    }
}

/// Predictions for the face a frame was judged on.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePredictions {
    pub emotion: Prediction,
    pub age: Prediction,
    pub gender: Prediction,
    /// Emotion confidence when the emotion is happiness, else 0.
    pub smile_score: f32,
    pub is_blurry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSelfie {
    pub filename: String,
    pub reason: CaptureReason,
}

/// Everything the loop learned from one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub face: Option<FaceRegion>,
    /// `None` when no face was found.
    pub predictions: Option<FramePredictions>,
    pub is_smiling: bool,
    /// Set when the trigger fired and the frame was written.
    pub captured: Option<CapturedSelfie>,
    /// The frame with overlays drawn.
    pub annotated: RgbImage,
    pub benchmark: Option<BenchmarkTick>,
}

struct Smoothers {
    emotion: LabelSmoother,
    age: LabelSmoother,
    gender: LabelSmoother,
}

impl Smoothers {
    fn new(window: usize) -> Self {
        Self {
            emotion: LabelSmoother::new(window),
            age: LabelSmoother::new(window),
            gender: LabelSmoother::new(window),
        }
    }

    fn reset(&mut self) {
        self.emotion.reset();
        self.age.reset();
        self.gender.reset();
    }
}

pub struct CaptureSession {
    detector: Box<dyn FaceLocator>,
    models: Arc<Mutex<ModelManager>>,
    controls: Arc<SessionControls>,
    trigger: CaptureTrigger,
    smoothers: Option<Smoothers>,
    gallery: Gallery,
    overlay: Overlay,
    options: SessionOptions,
    sampler: SystemSampler,
    benchmark: Option<SessionBenchmark>,
    banner_until: Option<Instant>,
}

impl CaptureSession {
    pub fn new(
        detector: Box<dyn FaceLocator>,
        models: Arc<Mutex<ModelManager>>,
        controls: Arc<SessionControls>,
        gallery: Gallery,
        overlay: Overlay,
        options: SessionOptions,
    ) -> Self {
        let smoothers =
            (options.smoothing_window > 1).then(|| Smoothers::new(options.smoothing_window));
        Self {
            detector,
            models,
            controls,
            trigger: CaptureTrigger::new(options.policy),
            smoothers,
            gallery,
            overlay,
            sampler: SystemSampler::new(),
            benchmark: None,
            banner_until: None,
            options,
        }
    }

    /// Build a session from configuration: loads the detector and opens the
    /// gallery and overlay font.
    pub fn from_config(
        config: &Config,
        models: Arc<Mutex<ModelManager>>,
        controls: Arc<SessionControls>,
    ) -> Result<Self, SessionError> {
        let detector = backends::load_face_detector(config)?;
        let gallery = Gallery::open(&config.captures_dir)?;
        let overlay = Overlay::new(config.font_path.as_deref());
        Ok(Self::new(
            Box::new(detector),
            models,
            controls,
            gallery,
            overlay,
            SessionOptions::from_config(config),
        ))
    }

    pub fn controls(&self) -> &Arc<SessionControls> {
        &self.controls
    }

    /// Run one frame through detection, prediction, trigger, capture and
    /// overlay. `now` drives the trigger and banner clocks.
    pub fn process_frame(&mut self, frame: &RgbImage, now: Instant) -> FrameReport {
        let started = Instant::now();

        if self.controls.take_benchmark_request() {
            tracing::info!(frames = self.options.benchmark_frames, "benchmark started");
            self.benchmark = Some(SessionBenchmark::new(self.options.benchmark_frames));
        }
        if self.controls.take_manual_capture() {
            self.trigger.request_manual();
        }

        let faces = self.detector.locate(frame).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "face detection failed");
            Vec::new()
        });
        let face = largest_face(&faces).copied();

        let (predictions, is_smiling) = match &face {
            Some(region) => {
                let (predictions, smiling) = self.predict(&region.crop(frame));
                (Some(predictions), smiling)
            }
            None => {
                if let Some(s) = self.smoothers.as_mut() {
                    s.reset();
                }
                (None, false)
            }
        };

        let captured = match self.trigger.evaluate(is_smiling, now) {
            Some(reason) => {
                let saved = self.save(frame, reason);
                if saved.is_none() {
                    self.trigger.cancel(reason);
                }
                saved
            }
            None => None,
        };
        if captured.is_some() {
            self.banner_until = Some(now + BANNER_DURATION);
        }

        let mut annotated = frame.clone();
        if let (Some(region), Some(p)) = (&face, &predictions) {
            self.overlay.draw_face(
                &mut annotated,
                &FaceAnnotation {
                    face: region,
                    age: &p.age.label,
                    emotion: &p.emotion.label,
                    gender: &p.gender.label,
                    smile_confidence: is_smiling.then_some(p.emotion.confidence),
                    is_blurry: p.is_blurry,
                },
            );
        }
        if self.banner_until.is_some_and(|until| now < until) {
            self.overlay.draw_banner(&mut annotated, BANNER_TEXT);
        }

        let benchmark = self.record_benchmark(started.elapsed());

        FrameReport {
            face,
            predictions,
            is_smiling,
            captured,
            annotated,
            benchmark,
        }
    }

    /// Classify one face crop. The smile decision uses the raw emotion; the
    /// smoothed labels are only for display.
    fn predict(&mut self, crop: &RgbImage) -> (FramePredictions, bool) {
        let (mut emotion, mut age, mut gender) = {
            let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
            (
                models.predict_emotion(crop),
                models.predict_age(crop),
                models.predict_gender(crop),
            )
        };

        let happy = emotion.label == SMILE_LABEL;
        let smile_score = if happy { emotion.confidence } else { 0.0 };
        let is_smiling = happy && emotion.confidence >= self.controls.threshold();
        let is_blurry = quality::is_blurry(crop, self.options.blur_threshold);

        if let Some(s) = self.smoothers.as_mut() {
            emotion.label = s.emotion.push(&emotion.label);
            age.label = s.age.push(&age.label);
            gender.label = s.gender.push(&gender.label);
        }

        (
            FramePredictions {
                emotion,
                age,
                gender,
                smile_score,
                is_blurry,
            },
            is_smiling,
        )
    }

    /// Write the unannotated frame.
    fn save(&mut self, frame: &RgbImage, reason: CaptureReason) -> Option<CapturedSelfie> {
        let timestamp = chrono::Utc::now().timestamp();
        match self.gallery.save(frame, timestamp) {
            Ok(filename) => {
                tracing::info!(%filename, ?reason, "selfie saved");
                Some(CapturedSelfie { filename, reason })
            }
            Err(e) => {
                tracing::warn!(error = %e, ?reason, "failed to save selfie");
                None
            }
        }
    }

    fn record_benchmark(&mut self, frame_time: Duration) -> Option<BenchmarkTick> {
        let bench = self.benchmark.as_mut()?;
        let tick = bench.record(frame_time, self.sampler.sample());
        if let Some(results) = &tick.results {
            tracing::info!(
                fps = results.fps,
                avg_frame_time_ms = results.avg_frame_time_ms,
                "benchmark finished"
            );
            self.benchmark = None;
        }
        Some(tick)
    }

    /// Capture loop at the configured frame rate.
    ///
    /// Each report is handed to `sink`; the loop ends when the sink returns
    /// false, when the stop flag is set, or on a non-transient camera error.
    pub fn run<F>(&mut self, source: &mut dyn FrameSource, mut sink: F) -> Result<(), SessionError>
    where
        F: FnMut(FrameReport) -> bool,
    {
        tracing::info!(interval = ?self.options.frame_interval, "capture loop started");

        while !self.controls.is_stopped() {
            let tick = Instant::now();

            let frame = match source.next_frame() {
                Ok(f) => f,
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "frame read failed, retrying");
                    std::thread::sleep(RETRY_DELAY);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let report = self.process_frame(&frame.image, frame.timestamp);
            if !sink(report) {
                tracing::debug!("frame consumer gone");
                break;
            }

            if let Some(rest) = self.options.frame_interval.checked_sub(tick.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        tracing::info!("capture loop stopped");
        Ok(())
    }
}

/// Open the configured camera and run `session` on it. The camera is
/// released when this returns, whatever the outcome.
pub fn run_camera<F>(
    session: &mut CaptureSession,
    config: &Config,
    sink: F,
) -> Result<(), SessionError>
where
    F: FnMut(FrameReport) -> bool,
{
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    let mut stream = camera.stream()?;
    session.run(&mut stream, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smilage_core::{AgeModel, Classifier, EmotionModel, GenderModel, ModelError};
    use smilage_hw::Frame;
    use std::collections::VecDeque;

    struct FixedFaces(Vec<FaceRegion>);

    impl FaceLocator for FixedFaces {
        fn locate(&mut self, _frame: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    /// Replays a script of (label, confidence) answers, repeating the last.
    struct Scripted(VecDeque<(&'static str, f32)>);

    impl Scripted {
        fn new(answers: &[(&'static str, f32)]) -> Self {
            Self(answers.iter().copied().collect())
        }
    }

    impl Classifier for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn classify(&mut self, _face: &RgbImage) -> Result<Prediction, ModelError> {
            let next = if self.0.len() > 1 {
                self.0.pop_front()
            } else {
                self.0.front().copied()
            };
            let (label, conf) = next.ok_or(ModelError::EmptyInput)?;
            Ok(Prediction::new(label, conf))
        }
    }

    impl EmotionModel for Scripted {}
    impl AgeModel for Scripted {}
    impl GenderModel for Scripted {}

    fn face() -> FaceRegion {
        FaceRegion {
            x: 8,
            y: 8,
            width: 32,
            height: 32,
            confidence: 0.9,
        }
    }

    fn models(emotions: &[(&'static str, f32)]) -> Arc<Mutex<ModelManager>> {
        let mut mm = ModelManager::new();
        mm.register_emotion("scripted", Box::new(Scripted::new(emotions)));
        mm.register_age("scripted", Box::new(Scripted::new(&[("(25-32)", 0.6)])));
        mm.register_gender("scripted", Box::new(Scripted::new(&[("Female", 0.8)])));
        Arc::new(Mutex::new(mm))
    }

    fn options(policy: CapturePolicy) -> SessionOptions {
        SessionOptions {
            blur_threshold: 100.0,
            policy,
            smoothing_window: 0,
            benchmark_frames: 3,
            frame_interval: Duration::ZERO,
        }
    }

    fn session(
        dir: &std::path::Path,
        faces: Vec<FaceRegion>,
        emotions: &[(&'static str, f32)],
        policy: CapturePolicy,
    ) -> CaptureSession {
        CaptureSession::new(
            Box::new(FixedFaces(faces)),
            models(emotions),
            Arc::new(SessionControls::new(0.7)),
            Gallery::open(dir).unwrap(),
            Overlay::without_text(),
            options(policy),
        )
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(64, 64, image::Rgb([120, 120, 120]))
    }

    #[test]
    fn test_controls_threshold() {
        let controls = SessionControls::new(0.7);
        assert!((controls.threshold() - 0.7).abs() < 1e-6);
        assert!(controls.set_threshold(0.4));
        assert!((controls.threshold() - 0.4).abs() < 1e-6);
        assert!(controls.set_threshold(3.0));
        assert_eq!(controls.threshold(), 1.0);
        assert!(!controls.set_threshold(f32::NAN));
        assert_eq!(controls.threshold(), 1.0);
    }

    #[test]
    fn test_controls_requests_are_taken_once() {
        let controls = SessionControls::new(0.7);
        controls.request_manual_capture();
        assert!(controls.take_manual_capture());
        assert!(!controls.take_manual_capture());
        controls.request_benchmark();
        assert!(controls.take_benchmark_request());
        assert!(!controls.take_benchmark_request());
    }

    #[test]
    fn test_no_face_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(
            dir.path(),
            vec![],
            &[("happiness", 0.99)],
            CapturePolicy::EdgeTriggered,
        );
        let report = s.process_frame(&frame(), Instant::now());
        assert!(report.face.is_none());
        assert!(report.predictions.is_none());
        assert!(!report.is_smiling);
        assert!(report.captured.is_none());
        assert_eq!(report.annotated.dimensions(), (64, 64));
    }

    #[test]
    fn test_smile_captures_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(
            dir.path(),
            vec![face()],
            &[("happiness", 0.9)],
            CapturePolicy::EdgeTriggered,
        );
        let report = s.process_frame(&frame(), Instant::now());

        assert!(report.is_smiling);
        let p = report.predictions.unwrap();
        assert_eq!(p.emotion.label, "happiness");
        assert!((p.smile_score - 0.9).abs() < 1e-6);
        assert_eq!(p.age.label, "(25-32)");
        assert_eq!(p.gender.label, "Female");
        // a flat gray crop has no edges
        assert!(p.is_blurry);

        let captured = report.captured.unwrap();
        assert_eq!(captured.reason, CaptureReason::Smile);
        assert!(dir.path().join(&captured.filename).exists());
    }

    #[test]
    fn test_below_threshold_is_not_a_smile() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(
            dir.path(),
            vec![face()],
            &[("happiness", 0.5)],
            CapturePolicy::EdgeTriggered,
        );
        let report = s.process_frame(&frame(), Instant::now());
        assert!(!report.is_smiling);
        assert!((report.predictions.unwrap().smile_score - 0.5).abs() < 1e-6);
        assert!(report.captured.is_none());

        // lowering the threshold at runtime takes effect on the next frame
        s.controls().set_threshold(0.4);
        let report = s.process_frame(&frame(), Instant::now());
        assert!(report.is_smiling);
        assert!(report.captured.is_some());
    }

    #[test]
    fn test_other_emotion_scores_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(
            dir.path(),
            vec![face()],
            &[("surprise", 0.95)],
            CapturePolicy::EdgeTriggered,
        );
        let report = s.process_frame(&frame(), Instant::now());
        assert_eq!(report.predictions.unwrap().smile_score, 0.0);
        assert!(!report.is_smiling);
    }

    #[test]
    fn test_manual_capture_without_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), vec![], &[("neutral", 0.9)], CapturePolicy::EdgeTriggered);
        s.controls().request_manual_capture();
        let report = s.process_frame(&frame(), Instant::now());
        let captured = report.captured.unwrap();
        assert_eq!(captured.reason, CaptureReason::Manual);
    }

    #[test]
    fn test_manual_after_smile_in_same_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(
            dir.path(),
            vec![face()],
            &[("happiness", 0.9)],
            CapturePolicy::EdgeTriggered,
        );
        let now = Instant::now();
        let first = s.process_frame(&frame(), now).captured.unwrap();
        assert_eq!(first.reason, CaptureReason::Smile);

        s.controls().request_manual_capture();
        let second = s
            .process_frame(&frame(), now + Duration::from_millis(30))
            .captured
            .unwrap();
        assert_eq!(second.reason, CaptureReason::Manual);
        assert_ne!(first.filename, second.filename);
        assert_eq!(s.gallery.list().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_write_keeps_manual_request() {
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("captures");
        let mut s = session(&captures, vec![], &[("neutral", 0.9)], CapturePolicy::EdgeTriggered);

        // a plain file where the directory was makes every write fail
        std::fs::remove_dir(&captures).unwrap();
        std::fs::write(&captures, b"").unwrap();
        s.controls().request_manual_capture();
        assert!(s.process_frame(&frame(), Instant::now()).captured.is_none());

        std::fs::remove_file(&captures).unwrap();
        std::fs::create_dir(&captures).unwrap();
        let captured = s.process_frame(&frame(), Instant::now()).captured.unwrap();
        assert_eq!(captured.reason, CaptureReason::Manual);
        assert!(s.process_frame(&frame(), Instant::now()).captured.is_none());
    }

    #[test]
    fn test_benchmark_runs_for_configured_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), vec![], &[("neutral", 0.9)], CapturePolicy::EdgeTriggered);
        assert!(s.process_frame(&frame(), Instant::now()).benchmark.is_none());

        s.controls().request_benchmark();
        let ticks: Vec<BenchmarkTick> = (0..3)
            .filter_map(|_| s.process_frame(&frame(), Instant::now()).benchmark)
            .collect();
        assert_eq!(ticks.len(), 3);
        assert!(ticks[0].results.is_none());
        assert!(ticks[2].results.is_some());
        // finished benchmarks stop reporting
        assert!(s.process_frame(&frame(), Instant::now()).benchmark.is_none());
    }

    #[test]
    fn test_smoothing_applies_to_labels_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = CaptureSession::new(
            Box::new(FixedFaces(vec![face()])),
            models(&[("neutral", 0.9), ("neutral", 0.9), ("happiness", 0.95)]),
            Arc::new(SessionControls::new(0.7)),
            Gallery::open(dir.path()).unwrap(),
            Overlay::without_text(),
            SessionOptions {
                smoothing_window: 5,
                ..options(CapturePolicy::EdgeTriggered)
            },
        );
        let now = Instant::now();
        s.process_frame(&frame(), now);
        s.process_frame(&frame(), now);
        let report = s.process_frame(&frame(), now);
        // the display label is still the majority, the smile decision is raw
        assert_eq!(report.predictions.unwrap().emotion.label, "neutral");
        assert!(report.is_smiling);
    }

    struct ScriptedSource {
        frames: usize,
        errors_first: usize,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.errors_first > 0 {
                self.errors_first -= 1;
                return Err(CameraError::Frame(smilage_hw::FrameError::InvalidLength {
                    expected: 4,
                    actual: 0,
                }));
            }
            if self.frames == 0 {
                return Err(CameraError::CaptureFailed("unplugged".into()));
            }
            self.frames -= 1;
            Ok(Frame::from_image(frame()))
        }
    }

    #[test]
    fn test_run_stops_when_sink_declines() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), vec![], &[("neutral", 0.9)], CapturePolicy::EdgeTriggered);
        let mut source = ScriptedSource {
            frames: 100,
            errors_first: 2,
        };
        let mut seen = 0;
        s.run(&mut source, |_| {
            seen += 1;
            seen < 3
        })
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_run_stops_on_flag_and_camera_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), vec![], &[("neutral", 0.9)], CapturePolicy::EdgeTriggered);

        let controls = s.controls().clone();
        let mut source = ScriptedSource {
            frames: 100,
            errors_first: 0,
        };
        s.run(&mut source, |_| {
            controls.stop();
            true
        })
        .unwrap();
        assert_eq!(source.frames, 99);

        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path(), vec![], &[("neutral", 0.9)], CapturePolicy::EdgeTriggered);
        let mut source = ScriptedSource {
            frames: 1,
            errors_first: 0,
        };
        let err = s.run(&mut source, |_| true).unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::CaptureFailed(_))));
    }
}
