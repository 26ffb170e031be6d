//! smilage-hw: camera capture for the selfie pipeline.
//!
//! Provides V4L2-based camera access and conversion of the common webcam
//! pixel formats (YUYV, MJPEG, RGB24) into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
