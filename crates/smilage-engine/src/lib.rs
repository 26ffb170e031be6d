//! smilage-engine: the capture pipeline shared by the server and the CLI.
//!
//! Ties the detector, the model registry and the capture trigger into a
//! per-frame loop, and provides the pieces around it: layered configuration,
//! backend loading, overlay drawing, the selfie gallery, benchmarks and the
//! WebSocket wire format.

pub mod backends;
pub mod benchmark;
pub mod config;
pub mod gallery;
pub mod messages;
pub mod overlay;
pub mod session;

pub use config::{Config, ConfigError, PolicyKind};
pub use gallery::{Gallery, GalleryError};
pub use session::{CaptureSession, FramePredictions, FrameReport, SessionControls, SessionError};
