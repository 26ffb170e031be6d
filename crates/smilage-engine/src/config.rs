//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `SMILAGE_*` environment variables.

use serde::{Deserialize, Serialize};
use smilage_core::CapturePolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// How smile captures are rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// One capture per smile; re-arms when the smile ends.
    Edge,
    /// Captures while smiling, at most once per cooldown.
    Cooldown,
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" | "edge_triggered" => Ok(PolicyKind::Edge),
            "cooldown" => Ok(PolicyKind::Cooldown),
            other => Err(other.to_string()),
        }
    }
}

/// Runtime configuration shared by the server and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory holding the detector and classifier weights.
    pub model_dir: PathBuf,
    /// Where selfies are written.
    pub captures_dir: PathBuf,
    /// Built frontend served as the HTTP fallback.
    pub static_dir: PathBuf,
    /// TTF font for overlay text. Without one only boxes are drawn.
    pub font_path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Minimum happiness confidence that counts as a smile.
    pub smile_threshold: f32,
    /// Laplacian variance below which a face crop is blurry.
    pub blur_threshold: f64,
    pub capture_policy: PolicyKind,
    pub capture_cooldown_secs: f64,
    /// Majority-vote window for displayed labels; 0 disables smoothing.
    pub smoothing_window: usize,
    pub target_fps: u32,
    pub benchmark_frames: usize,
    /// Backend keys to activate at startup, when registered.
    pub emotion_backend: Option<String>,
    pub age_backend: Option<String>,
    pub gender_backend: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: PathBuf::from("models"),
            captures_dir: PathBuf::from("captures"),
            static_dir: PathBuf::from("frontend/dist"),
            font_path: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["http://localhost:5173".to_string()],
            smile_threshold: 0.7,
            blur_threshold: 100.0,
            capture_policy: PolicyKind::Cooldown,
            capture_cooldown_secs: 3.0,
            smoothing_window: 0,
            target_fps: 30,
            benchmark_frames: 100,
            emotion_backend: None,
            age_backend: None,
            gender_backend: None,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    ///
    /// An explicit `SMILAGE_CONFIG` file must exist; the default location
    /// (`$XDG_CONFIG_HOME/smilage/config.toml`) is optional.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("SMILAGE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match default_config_path(&lookup) {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `SMILAGE_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SMILAGE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        override_parsed(&lookup, "SMILAGE_CAMERA_WIDTH", &mut self.camera_width);
        override_parsed(&lookup, "SMILAGE_CAMERA_HEIGHT", &mut self.camera_height);
        if let Some(v) = lookup("SMILAGE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SMILAGE_CAPTURES_DIR") {
            self.captures_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SMILAGE_STATIC_DIR") {
            self.static_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SMILAGE_FONT_PATH") {
            self.font_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("SMILAGE_HOST") {
            self.host = v;
        }
        override_parsed(&lookup, "SMILAGE_PORT", &mut self.port);
        if let Some(v) = lookup("SMILAGE_CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        override_parsed(&lookup, "SMILAGE_SMILE_THRESHOLD", &mut self.smile_threshold);
        override_parsed(&lookup, "SMILAGE_BLUR_THRESHOLD", &mut self.blur_threshold);
        override_parsed(&lookup, "SMILAGE_CAPTURE_POLICY", &mut self.capture_policy);
        override_parsed(&lookup, "SMILAGE_CAPTURE_COOLDOWN_SECS", &mut self.capture_cooldown_secs);
        override_parsed(&lookup, "SMILAGE_SMOOTHING_WINDOW", &mut self.smoothing_window);
        override_parsed(&lookup, "SMILAGE_TARGET_FPS", &mut self.target_fps);
        override_parsed(&lookup, "SMILAGE_BENCHMARK_FRAMES", &mut self.benchmark_frames);
        if let Some(v) = lookup("SMILAGE_EMOTION_BACKEND") {
            self.emotion_backend = Some(v);
        }
        if let Some(v) = lookup("SMILAGE_AGE_BACKEND") {
            self.age_backend = Some(v);
        }
        if let Some(v) = lookup("SMILAGE_GENDER_BACKEND") {
            self.gender_backend = Some(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.smile_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "smile_threshold",
                value: self.smile_threshold.to_string(),
            });
        }
        if !self.capture_cooldown_secs.is_finite() || self.capture_cooldown_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "capture_cooldown_secs",
                value: self.capture_cooldown_secs.to_string(),
            });
        }
        if self.target_fps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "target_fps",
                value: "0".to_string(),
            });
        }
        if self.benchmark_frames == 0 {
            return Err(ConfigError::InvalidValue {
                key: "benchmark_frames",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        match self.capture_policy {
            PolicyKind::Edge => CapturePolicy::EdgeTriggered,
            PolicyKind::Cooldown => {
                CapturePolicy::Cooldown(Duration::from_secs_f64(self.capture_cooldown_secs))
            }
        }
    }

    /// Time budget of one loop iteration at `target_fps`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    pub fn emotion_model_path(&self) -> PathBuf {
        self.model_dir.join("emotion-ferplus.onnx")
    }

    pub fn age_onnx_path(&self) -> PathBuf {
        self.model_dir.join("age_net.onnx")
    }

    pub fn gender_onnx_path(&self) -> PathBuf {
        self.model_dir.join("gender_net.onnx")
    }

    /// (prototxt, caffemodel) of the Caffe age net.
    pub fn age_caffe_paths(&self) -> (PathBuf, PathBuf) {
        (
            self.model_dir.join("age_deploy.prototxt"),
            self.model_dir.join("age_net.caffemodel"),
        )
    }

    /// (prototxt, caffemodel) of the Caffe gender net.
    pub fn gender_caffe_paths(&self) -> (PathBuf, PathBuf) {
        (
            self.model_dir.join("gender_deploy.prototxt"),
            self.model_dir.join("gender_net.caffemodel"),
        )
    }
}

fn default_config_path<F>(lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let base = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("smilage").join("config.toml"))
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_with(env(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.smile_threshold, 0.7);
        assert_eq!(config.blur_threshold, 100.0);
        assert_eq!(
            config.capture_policy(),
            CapturePolicy::Cooldown(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::load_with(env(&[
            ("SMILAGE_PORT", "9000"),
            ("SMILAGE_CAPTURE_POLICY", "edge"),
            ("SMILAGE_SMILE_THRESHOLD", "0.55"),
            ("SMILAGE_CORS_ORIGINS", "http://a, http://b"),
            ("SMILAGE_EMOTION_BACKEND", "ferplus"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.capture_policy(), CapturePolicy::EdgeTriggered);
        assert!((config.smile_threshold - 0.55).abs() < 1e-6);
        assert_eq!(config.cors_origins, vec!["http://a", "http://b"]);
        assert_eq!(config.emotion_backend.as_deref(), Some("ferplus"));
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let config = Config::load_with(env(&[("SMILAGE_PORT", "not-a-port")])).unwrap();
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "port = 7000\nsmoothing_window = 5\ncapture_policy = \"edge\"\n",
        )
        .unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = Config::load_with(env(&[
            ("SMILAGE_CONFIG", path_str.as_str()),
            ("SMILAGE_SMOOTHING_WINDOW", "3"),
        ]))
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.capture_policy, PolicyKind::Edge);
        assert_eq!(config.smoothing_window, 3);
        // untouched keys keep their defaults
        assert_eq!(config.target_fps, 30);
    }

    #[test]
    fn test_xdg_config_location() {
        let dir = tempfile::tempdir().unwrap();
        let conf_dir = dir.path().join("smilage");
        std::fs::create_dir_all(&conf_dir).unwrap();
        std::fs::write(conf_dir.join("config.toml"), "benchmark_frames = 20\n").unwrap();

        let xdg = dir.path().to_string_lossy().to_string();
        let config = Config::load_with(env(&[("XDG_CONFIG_HOME", xdg.as_str())])).unwrap();
        assert_eq!(config.benchmark_frames, 20);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::load_with(env(&[("SMILAGE_CONFIG", "/nonexistent/smilage.toml")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = Config::load_with(env(&[("SMILAGE_SMILE_THRESHOLD", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "smile_threshold", .. }));
    }

    #[test]
    fn test_frame_interval_and_paths() {
        let config = Config::default();
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(config.emotion_model_path(), PathBuf::from("models/emotion-ferplus.onnx"));
        assert_eq!(
            config.age_caffe_paths().0,
            PathBuf::from("models/age_deploy.prototxt")
        );
    }
}
