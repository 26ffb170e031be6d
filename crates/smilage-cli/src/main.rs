use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smilage_core::{largest_face, Capability, FaceDetector, ModelManager, Prediction};
use smilage_engine::backends::{load_face_detector, load_model_manager};
use smilage_engine::benchmark::{run_model_benchmark, ModelBenchmarkReport};
use smilage_engine::overlay::Overlay;
use smilage_engine::session::run_camera;
use smilage_engine::{CaptureSession, Config, Gallery, PolicyKind, SessionControls};
use smilage_hw::Camera;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "smilage", about = "Smile-triggered selfie capture")]
struct Cli {
    /// Camera device (overrides config)
    #[arg(long, global = true)]
    device: Option<String>,
    /// Directory holding model weights (overrides config)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Where selfies are written (overrides config)
    #[arg(long, global = true)]
    captures_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture loop headless until interrupted
    Run {
        /// Majority-vote window for displayed labels (e.g. 5)
        #[arg(long)]
        smooth: Option<usize>,
        /// Smile confidence threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f32>,
        /// Capture policy: "edge" or "cooldown"
        #[arg(long)]
        policy: Option<PolicyKind>,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<usize>,
    },
    /// Time each active model on live camera frames
    Benchmark {
        #[arg(short, long, default_value_t = 30)]
        frames: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify one frame (camera or synthetic) and save it annotated
    Demo {
        /// Skip the camera and use random noise
        #[arg(long)]
        synthetic: bool,
    },
    /// Classify the largest face in an image file
    Predict {
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Manage captured selfies
    Gallery {
        #[command(subcommand)]
        action: GalleryAction,
    },
    /// List registered model backends
    Models,
    /// List video capture devices
    Devices,
}

#[derive(Subcommand)]
enum GalleryAction {
    /// List captures, newest first
    List,
    /// Delete one capture
    Delete { name: String },
    /// Delete every capture
    Clear,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.camera_device = device.clone();
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(dir) = &self.captures_dir {
            config.captures_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    cli.apply_overrides(&mut config);

    match cli.command {
        Commands::Run {
            smooth,
            threshold,
            policy,
            frames,
        } => {
            if let Some(window) = smooth {
                config.smoothing_window = window;
            }
            if let Some(t) = threshold {
                config.smile_threshold = t;
            }
            if let Some(p) = policy {
                config.capture_policy = p;
            }
            config.validate()?;
            run(config, frames).await?;
        }
        Commands::Benchmark { frames, json } => {
            let report = tokio::task::spawn_blocking(move || benchmark(&config, frames)).await??;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_benchmark(&report);
            }
        }
        Commands::Demo { synthetic } => {
            let path = tokio::task::spawn_blocking(move || demo(&config, synthetic)).await??;
            println!("Saved annotated demo to {}", path.display());
        }
        Commands::Predict { image, output } => {
            tokio::task::spawn_blocking(move || predict(&config, &image, output.as_deref()))
                .await??;
        }
        Commands::Gallery { action } => {
            let gallery = Gallery::open(&config.captures_dir)?;
            match action {
                GalleryAction::List => {
                    let names = gallery.list()?;
                    if names.is_empty() {
                        println!("No captures in {}", gallery.dir().display());
                    }
                    for name in names {
                        println!("{name}");
                    }
                }
                GalleryAction::Delete { name } => {
                    gallery.delete(&name)?;
                    println!("Deleted {name}");
                }
                GalleryAction::Clear => {
                    let count = gallery.delete_all()?;
                    println!("Deleted {count} capture(s)");
                }
            }
        }
        Commands::Models => {
            let models = tokio::task::spawn_blocking(move || load_model_manager(&config)).await?;
            for line in model_lines(&models) {
                println!("{line}");
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({})", d.path, d.name, d.driver);
            }
        }
    }

    Ok(())
}

/// Capture loop on a blocking thread; ctrl-c sets the stop flag.
async fn run(config: Config, max_frames: Option<usize>) -> Result<()> {
    let controls = Arc::new(SessionControls::new(config.smile_threshold));
    let mut worker = {
        let controls = Arc::clone(&controls);
        tokio::task::spawn_blocking(move || capture_loop(&config, controls, max_frames))
    };

    let summary = tokio::select! {
        result = &mut worker => result??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping capture");
            controls.stop();
            worker.await??
        }
    };

    println!(
        "Processed {} frame(s), captured {} selfie(s)",
        summary.frames, summary.captures
    );
    Ok(())
}

struct RunSummary {
    frames: usize,
    captures: usize,
}

fn capture_loop(
    config: &Config,
    controls: Arc<SessionControls>,
    max_frames: Option<usize>,
) -> Result<RunSummary> {
    let models = Arc::new(Mutex::new(load_model_manager(config)));
    let mut session = CaptureSession::from_config(config, models, controls)?;
    let mut summary = RunSummary {
        frames: 0,
        captures: 0,
    };

    println!("Capturing from {} (ctrl-c to stop)", config.camera_device);
    run_camera(&mut session, config, |report| {
        summary.frames += 1;
        if let Some(p) = &report.predictions {
            tracing::debug!(
                emotion = %p.emotion.label,
                age = %p.age.label,
                gender = %p.gender.label,
                smile_score = p.smile_score,
                blurry = p.is_blurry,
                "frame"
            );
        }
        if let Some(c) = &report.captured {
            summary.captures += 1;
            println!("Captured {} ({:?})", c.filename, c.reason);
        }
        max_frames.map_or(true, |max| summary.frames < max)
    })?;

    Ok(summary)
}

fn benchmark(config: &Config, frames: usize) -> Result<ModelBenchmarkReport> {
    let mut models = load_model_manager(config);
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)
        .context("could not open camera")?;
    let mut stream = camera.stream()?;
    Ok(run_model_benchmark(&mut models, &mut stream, frames)?)
}

fn print_benchmark(report: &ModelBenchmarkReport) {
    println!("Model performance over {} frame(s)", report.frames);
    for c in &report.capabilities {
        println!();
        println!("{} [{}]", c.capability, c.backend.as_deref().unwrap_or("none"));
        println!("  avg inference time: {:.2} ms", c.avg_time_ms);
        println!("  min inference time: {:.2} ms", c.min_time_ms);
        println!("  max inference time: {:.2} ms", c.max_time_ms);
        println!("  avg confidence:     {:.2}", c.avg_confidence);
        println!("  fps:                {:.2}", c.fps);
    }
    println!();
    println!("avg cpu usage:    {:.2}%", report.cpu_usage_avg);
    println!("avg memory usage: {:.2}%", report.memory_usage_avg);
}

fn synthetic_frame(width: u32, height: u32) -> image::RgbImage {
    use rand::Rng;

    let mut buf = vec![0u8; (width * height * 3) as usize];
    rand::thread_rng().fill(&mut buf[..]);
    image::RgbImage::from_raw(width, height, buf)
        .unwrap_or_else(|| image::RgbImage::new(width, height))
}

fn grab_frame(config: &Config) -> Result<image::RgbImage> {
    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    Ok(camera.capture_frame()?.image)
}

fn prediction_lines(models: &mut ModelManager, face: &image::RgbImage) -> Vec<String> {
    let describe =
        |name: &str, p: &Prediction| format!("{name}: {} ({:.2})", p.label, p.confidence);
    vec![
        describe("Emotion", &models.predict_emotion(face)),
        describe("Age", &models.predict_age(face)),
        describe("Gender", &models.predict_gender(face)),
    ]
}

/// One frame through the registry with the whole frame as the face.
fn demo(config: &Config, synthetic: bool) -> Result<PathBuf> {
    let mut models = load_model_manager(config);

    let mut frame = if synthetic {
        synthetic_frame(config.camera_width, config.camera_height)
    } else {
        grab_frame(config).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "no camera frame, using a synthetic image");
            synthetic_frame(config.camera_width, config.camera_height)
        })
    };

    let lines = prediction_lines(&mut models, &frame);
    for line in &lines {
        println!("{line}");
    }
    Overlay::new(config.font_path.as_deref()).draw_lines(&mut frame, &lines);

    let gallery = Gallery::open(&config.captures_dir)?;
    let path = gallery
        .dir()
        .join(format!("demo_out_{}.jpg", chrono::Utc::now().timestamp()));
    frame.save(&path)?;
    Ok(path)
}

fn predict(config: &Config, image_path: &Path, output: Option<&Path>) -> Result<()> {
    let mut frame = image::open(image_path)
        .with_context(|| format!("could not read {}", image_path.display()))?
        .to_rgb8();
    let mut models = load_model_manager(config);

    let face = match load_face_detector(config) {
        Ok(mut detector) => locate(&mut detector, &frame),
        Err(e) => {
            tracing::warn!(error = %e, "no face detector, classifying the whole image");
            None
        }
    };

    let crop = match &face {
        Some(region) => {
            println!(
                "Face at ({}, {}) {}x{} [{:.2}]",
                region.x, region.y, region.width, region.height, region.confidence
            );
            region.crop(&frame)
        }
        None => frame.clone(),
    };
    let lines = prediction_lines(&mut models, &crop);
    for line in &lines {
        println!("{line}");
    }

    if let Some(out) = output {
        Overlay::new(config.font_path.as_deref()).draw_lines(&mut frame, &lines);
        frame.save(out)?;
        println!("Saved {}", out.display());
    }
    Ok(())
}

fn locate(
    detector: &mut FaceDetector,
    frame: &image::RgbImage,
) -> Option<smilage_core::FaceRegion> {
    match detector.detect(frame) {
        Ok(faces) => {
            if faces.is_empty() {
                println!("No face detected, classifying the whole image");
            }
            largest_face(&faces).copied()
        }
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed");
            None
        }
    }
}

fn model_lines(models: &ModelManager) -> Vec<String> {
    Capability::ALL
        .iter()
        .map(|&capability| {
            let active = models.active_key(capability);
            let keys = models.keys(capability);
            if keys.is_empty() {
                return format!("{capability}: (none)");
            }
            let listed: Vec<String> = keys
                .iter()
                .map(|k| {
                    if Some(k.as_str()) == active {
                        format!("{k}*")
                    } else {
                        k.clone()
                    }
                })
                .collect();
            format!("{capability}: {}", listed.join(", "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smilage_core::{AgeModel, Classifier, ModelError};

    struct Fixed(&'static str);

    impl Classifier for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn classify(&mut self, _face: &image::RgbImage) -> Result<Prediction, ModelError> {
            Ok(Prediction::new(self.0, 0.5))
        }
    }

    impl AgeModel for Fixed {}

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "smilage", "run", "--smooth", "5", "--policy", "edge", "--threshold", "0.6",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                smooth,
                threshold,
                policy,
                frames,
            } => {
                assert_eq!(smooth, Some(5));
                assert_eq!(threshold, Some(0.6));
                assert_eq!(policy, Some(PolicyKind::Edge));
                assert_eq!(frames, None);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_policy() {
        assert!(Cli::try_parse_from(["smilage", "run", "--policy", "sometimes"]).is_err());
    }

    #[test]
    fn test_global_overrides() {
        let cli =
            Cli::try_parse_from(["smilage", "gallery", "list", "--captures-dir", "/tmp/shots"])
                .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.captures_dir, PathBuf::from("/tmp/shots"));
        assert_eq!(config.model_dir, PathBuf::from("models"));
    }

    #[test]
    fn test_synthetic_frame_size() {
        let frame = synthetic_frame(64, 48);
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[test]
    fn test_prediction_lines_with_empty_registry() {
        let mut models = ModelManager::new();
        let lines = prediction_lines(&mut models, &image::RgbImage::new(4, 4));
        assert_eq!(
            lines,
            vec!["Emotion: unknown (0.00)", "Age: unknown (0.00)", "Gender: unknown (0.00)"]
        );
    }

    #[test]
    fn test_model_lines_mark_active() {
        let mut models = ModelManager::new();
        models.register_age("a", Box::new(Fixed("(25-32)")));
        models.register_age("b", Box::new(Fixed("(38-43)")));
        let lines = model_lines(&models);
        assert_eq!(lines[0], "emotion: (none)");
        assert_eq!(lines[1], "age: a*, b");
    }

    #[test]
    fn test_demo_writes_annotated_image() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            model_dir: dir.path().join("models"),
            captures_dir: dir.path().join("captures"),
            camera_width: 32,
            camera_height: 24,
            ..Config::default()
        };
        let path = demo(&config, true).unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("demo_out_"));
    }
}
