//! Performance measurement: the in-session benchmark driven over the
//! WebSocket, and the per-model benchmark run from the CLI.

use serde::Serialize;
use smilage_core::{Capability, ModelManager};
use smilage_hw::FrameSource;
use std::time::{Duration, Instant};
use sysinfo::System;

/// System-wide usage at one instant, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UsageSample {
    pub cpu_percent: f32,
    pub mem_percent: f32,
}

/// Reads global CPU and memory usage.
pub struct SystemSampler {
    sys: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        // CPU usage is a delta between refreshes; take the baseline now.
        sys.refresh_cpu();
        Self { sys }
    }

    pub fn sample(&mut self) -> UsageSample {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();

        let total = self.sys.total_memory();
        let mem_percent = if total > 0 {
            (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        UsageSample {
            cpu_percent: self.sys.global_cpu_info().cpu_usage(),
            mem_percent,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResults {
    pub avg_cpu: f32,
    pub avg_mem: f32,
    pub avg_frame_time_ms: f64,
    pub fps: f64,
}

/// Outcome of recording one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkTick {
    /// Fraction of frames recorded so far, in (0, 1].
    pub progress: f32,
    /// Present on the final frame.
    pub results: Option<BenchmarkResults>,
}

/// Collects frame times and usage samples over a fixed number of frames.
#[derive(Debug, Clone)]
pub struct SessionBenchmark {
    target: usize,
    frame_times: Vec<Duration>,
    usage: Vec<UsageSample>,
}

impl SessionBenchmark {
    pub fn new(target_frames: usize) -> Self {
        let target = target_frames.max(1);
        Self {
            target,
            frame_times: Vec::with_capacity(target),
            usage: Vec::with_capacity(target),
        }
    }

    pub fn record(&mut self, frame_time: Duration, sample: UsageSample) -> BenchmarkTick {
        self.frame_times.push(frame_time);
        self.usage.push(sample);

        let recorded = self.frame_times.len();
        let progress = recorded as f32 / self.target as f32;
        let results = self.is_complete().then(|| self.results());
        BenchmarkTick { progress, results }
    }

    pub fn is_complete(&self) -> bool {
        self.frame_times.len() >= self.target
    }

    fn results(&self) -> BenchmarkResults {
        let avg_time = mean(self.frame_times.iter().map(|d| d.as_secs_f64()));
        BenchmarkResults {
            avg_cpu: mean(self.usage.iter().map(|u| u.cpu_percent as f64)) as f32,
            avg_mem: mean(self.usage.iter().map(|u| u.mem_percent as f64)) as f32,
            avg_frame_time_ms: avg_time * 1000.0,
            fps: if avg_time > 0.0 { 1.0 / avg_time } else { 0.0 },
        }
    }
}

/// Timing and confidence summary for one capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityReport {
    pub capability: Capability,
    pub backend: Option<String>,
    pub avg_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
    /// Mean confidence over frames with a known label.
    pub avg_confidence: f32,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelBenchmarkReport {
    pub frames: usize,
    pub capabilities: Vec<CapabilityReport>,
    pub cpu_usage_avg: f32,
    pub memory_usage_avg: f32,
}

#[derive(Debug, Default, Clone)]
struct CapabilityStats {
    times: Vec<Duration>,
    confidences: Vec<f32>,
}

/// Per-capability timings of the active backends.
#[derive(Debug, Default, Clone)]
pub struct ModelBenchmark {
    stats: [CapabilityStats; 3],
    usage: Vec<UsageSample>,
    frames: usize,
}

fn slot(capability: Capability) -> usize {
    match capability {
        Capability::Emotion => 0,
        Capability::Age => 1,
        Capability::Gender => 2,
    }
}

impl ModelBenchmark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time each capability's prediction on `image`, treated as the face.
    pub fn measure(
        &mut self,
        models: &mut ModelManager,
        image: &image::RgbImage,
        sample: UsageSample,
    ) {
        for capability in Capability::ALL {
            let start = Instant::now();
            let prediction = models.predict(capability, image);
            let elapsed = start.elapsed();

            let stats = &mut self.stats[slot(capability)];
            stats.times.push(elapsed);
            if prediction.is_known() {
                stats.confidences.push(prediction.confidence);
            }
        }
        self.usage.push(sample);
        self.frames += 1;
    }

    pub fn report(&self, models: &ModelManager) -> ModelBenchmarkReport {
        let capabilities = Capability::ALL
            .iter()
            .map(|&capability| {
                let stats = &self.stats[slot(capability)];
                let times: Vec<f64> = stats.times.iter().map(|&d| millis(d)).collect();
                let avg = mean(times.iter().copied());
                CapabilityReport {
                    capability,
                    backend: models.active_key(capability).map(str::to_string),
                    avg_time_ms: avg,
                    min_time_ms: times.iter().copied().reduce(f64::min).unwrap_or(0.0),
                    max_time_ms: times.iter().copied().reduce(f64::max).unwrap_or(0.0),
                    avg_confidence: mean(stats.confidences.iter().map(|&c| c as f64)) as f32,
                    fps: if avg > 0.0 { 1000.0 / avg } else { 0.0 },
                }
            })
            .collect();

        ModelBenchmarkReport {
            frames: self.frames,
            capabilities,
            cpu_usage_avg: mean(self.usage.iter().map(|u| u.cpu_percent as f64)) as f32,
            memory_usage_avg: mean(self.usage.iter().map(|u| u.mem_percent as f64)) as f32,
        }
    }
}

/// Consecutive unreadable frames tolerated before the benchmark gives up.
const MAX_CONSECUTIVE_FRAME_ERRORS: usize = 50;

/// Run the per-model benchmark over `frames` frames from `source`.
/// Unreadable frames are skipped and do not count; a run of
/// `MAX_CONSECUTIVE_FRAME_ERRORS` of them in a row aborts with the last error.
pub fn run_model_benchmark(
    models: &mut ModelManager,
    source: &mut dyn FrameSource,
    frames: usize,
) -> Result<ModelBenchmarkReport, smilage_hw::CameraError> {
    let mut sampler = SystemSampler::new();
    let mut bench = ModelBenchmark::new();
    let mut consecutive_errors = 0;
    tracing::info!(frames, "running model benchmark");

    while bench.frames < frames {
        let frame = match source.next_frame() {
            Ok(f) => f,
            Err(e) if e.is_transient() => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                    tracing::warn!(error = %e, consecutive_errors, "camera keeps failing");
                    return Err(e);
                }
                tracing::debug!(error = %e, "skipping unreadable frame");
                continue;
            }
            Err(e) => return Err(e),
        };
        consecutive_errors = 0;
        let sample = sampler.sample();
        bench.measure(models, &frame.image, sample);
    }

    Ok(bench.report(models))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smilage_hw::{CameraError, Frame, FrameError};

    fn usage(cpu: f32, mem: f32) -> UsageSample {
        UsageSample {
            cpu_percent: cpu,
            mem_percent: mem,
        }
    }

    #[test]
    fn test_session_benchmark_progress_and_results() {
        let mut bench = SessionBenchmark::new(4);
        for i in 1..=3 {
            let tick = bench.record(Duration::from_millis(20), usage(10.0, 50.0));
            assert!((tick.progress - i as f32 / 4.0).abs() < 1e-6);
            assert!(tick.results.is_none());
        }
        let tick = bench.record(Duration::from_millis(40), usage(30.0, 50.0));
        assert_eq!(tick.progress, 1.0);
        assert!(bench.is_complete());

        let results = tick.results.unwrap();
        assert!((results.avg_frame_time_ms - 25.0).abs() < 1e-6);
        assert!((results.fps - 40.0).abs() < 1e-6);
        assert!((results.avg_cpu - 15.0).abs() < 1e-4);
        assert!((results.avg_mem - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_frame_target_is_one() {
        let mut bench = SessionBenchmark::new(0);
        let tick = bench.record(Duration::ZERO, UsageSample::default());
        let results = tick.results.unwrap();
        assert_eq!(results.fps, 0.0);
    }

    #[test]
    fn test_results_serialize_field_names() {
        let json = serde_json::to_value(BenchmarkResults {
            avg_cpu: 1.0,
            avg_mem: 2.0,
            avg_frame_time_ms: 3.0,
            fps: 4.0,
        })
        .unwrap();
        for key in ["avg_cpu", "avg_mem", "avg_frame_time_ms", "fps"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_model_benchmark_empty_registry() {
        let mut models = ModelManager::new();
        let mut bench = ModelBenchmark::new();
        let img = image::RgbImage::new(8, 8);
        bench.measure(&mut models, &img, usage(5.0, 40.0));
        bench.measure(&mut models, &img, usage(15.0, 60.0));

        let report = bench.report(&models);
        assert_eq!(report.frames, 2);
        assert_eq!(report.capabilities.len(), 3);
        for cap in &report.capabilities {
            assert_eq!(cap.backend, None);
            // unknown labels contribute no confidence
            assert_eq!(cap.avg_confidence, 0.0);
            assert!(cap.min_time_ms <= cap.max_time_ms);
        }
        assert!((report.cpu_usage_avg - 10.0).abs() < 1e-4);
        assert!((report.memory_usage_avg - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_sampler_reports_percentages() {
        let mut sampler = SystemSampler::new();
        let s = sampler.sample();
        assert!((0.0..=100.0).contains(&s.mem_percent));
        assert!(s.cpu_percent >= 0.0);
    }

    /// Fails `errors_first` reads with a corrupt buffer, then yields frames.
    struct FlakySource {
        errors_first: usize,
    }

    impl FrameSource for FlakySource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.errors_first > 0 {
                self.errors_first -= 1;
                return Err(CameraError::Frame(FrameError::InvalidLength {
                    expected: 4,
                    actual: 0,
                }));
            }
            Ok(Frame::from_image(image::RgbImage::new(8, 8)))
        }
    }

    #[test]
    fn test_model_benchmark_skips_bad_frames() {
        let mut models = ModelManager::new();
        let mut source = FlakySource { errors_first: 3 };
        let report = run_model_benchmark(&mut models, &mut source, 2).unwrap();
        assert_eq!(report.frames, 2);
    }

    #[test]
    fn test_model_benchmark_gives_up_on_broken_camera() {
        let mut models = ModelManager::new();
        let mut source = FlakySource { errors_first: usize::MAX };
        let err = run_model_benchmark(&mut models, &mut source, 2).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(usize::MAX - source.errors_first, MAX_CONSECUTIVE_FRAME_ERRORS);
    }
}
