//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use image::RgbImage;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Frames discarded after the stream starts while auto-exposure settles.
const WARMUP_FRAMES: usize = 5;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
}

impl CameraError {
    /// A single bad buffer; the next read may well succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::Frame(_))
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one JPEG per buffer.
    Mjpeg,
    /// Packed 8-bit RGB (3 bytes/pixel).
    Rgb24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"RGB3" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }

    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        }
    }
}

/// Source of RGB frames for the capture loop.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// V4L2 camera device handle. The device is closed when this is dropped.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and request
    /// `width`×`height`, preferring YUYV, then MJPEG, then RGB24.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut last_error = String::from("no format accepted");
        for wanted in [PixelFormat::Yuyv, PixelFormat::Mjpeg, PixelFormat::Rgb24] {
            let mut fmt = device.format().map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
            fmt.fourcc = wanted.fourcc();
            fmt.width = width;
            fmt.height = height;

            let negotiated = match device.set_format(&fmt) {
                Ok(f) => f,
                Err(e) => {
                    last_error = format!("failed to set {wanted:?}: {e}");
                    continue;
                }
            };

            // Drivers answer with their closest supported format.
            let Some(pixel_format) = PixelFormat::from_fourcc(negotiated.fourcc) else {
                last_error = format!("unsupported pixel format: {:?}", negotiated.fourcc);
                continue;
            };

            tracing::info!(
                width = negotiated.width,
                height = negotiated.height,
                fourcc = ?negotiated.fourcc,
                "negotiated format"
            );

            return Ok(Self {
                device,
                width: negotiated.width,
                height: negotiated.height,
                device_path: device_path.to_string(),
                pixel_format,
            });
        }

        Err(CameraError::FormatNegotiationFailed(format!(
            "{last_error} (need YUYV, MJPG or RGB3)"
        )))
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming. The first few frames are discarded.
    pub fn stream(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let mut frames = FrameStream {
            camera: self,
            stream,
        };
        for _ in 0..WARMUP_FRAMES {
            frames.raw_next()?;
        }
        Ok(frames)
    }

    /// Capture a single frame on a short-lived stream.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        self.stream()?.next_frame()
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<RgbImage, FrameError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb24 => frame::rgb24_to_rgb(buf, self.width, self.height),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// An active capture stream borrowing its camera.
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl FrameStream<'_> {
    fn raw_next(&mut self) -> Result<(&[u8], u32), CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        Ok((buf, meta.sequence))
    }
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let camera = self.camera;
        let (buf, sequence) = self.raw_next()?;
        let image = camera.buf_to_rgb(buf)?;
        Ok(Frame {
            image,
            timestamp: Instant::now(),
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_fourcc_roundtrip() {
        for pf in [PixelFormat::Yuyv, PixelFormat::Mjpeg, PixelFormat::Rgb24] {
            assert_eq!(PixelFormat::from_fourcc(pf.fourcc()), Some(pf));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist", 640, 480).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_frame_errors_are_transient() {
        let err = CameraError::from(FrameError::InvalidLength {
            expected: 4,
            actual: 2,
        });
        assert!(err.is_transient());
    }
}
