//! Flat directory of captured selfies.

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("capture not found: {0}")]
    NotFound(String),
    #[error("invalid capture name: {0}")]
    InvalidName(String),
    #[error("capture already exists: {0}")]
    AlreadyExists(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}

/// File name for a selfie taken at `timestamp` (Unix seconds).
pub fn selfie_filename(timestamp: i64) -> String {
    format!("selfie_{timestamp}.jpg")
}

/// Name for the `n`th extra capture within the same second.
fn suffixed_filename(timestamp: i64, n: u32) -> String {
    format!("selfie_{timestamp}_{n}.jpg")
}

const MAX_NAME_ATTEMPTS: u32 = 100;

pub struct Gallery {
    dir: PathBuf,
}

impl Gallery {
    /// Open the capture directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "opened capture gallery");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `image` as `selfie_<timestamp>.jpg`. Existing files are never
    /// overwritten: later captures in the same second get `_1`, `_2`, ...
    pub fn save(&self, image: &RgbImage, timestamp: i64) -> Result<String, GalleryError> {
        let jpeg = encode_jpeg(image, JPEG_QUALITY)?;

        let mut name = selfie_filename(timestamp);
        let mut attempt = 0;
        let mut file = loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
            {
                Ok(f) => break f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    attempt += 1;
                    if attempt >= MAX_NAME_ATTEMPTS {
                        return Err(GalleryError::AlreadyExists(name));
                    }
                    name = suffixed_filename(timestamp, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(&jpeg)?;

        tracing::info!(file = %name, bytes = jpeg.len(), "selfie captured");
        Ok(name)
    }

    /// Capture file names, newest first.
    pub fn list(&self) -> Result<Vec<String>, GalleryError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Resolve `name` inside the gallery, rejecting anything that could
    /// escape it.
    pub fn path_of(&self, name: &str) -> Result<PathBuf, GalleryError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(GalleryError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    pub fn delete(&self, name: &str) -> Result<(), GalleryError> {
        let path = self.path_of(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(file = name, "deleted capture");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(GalleryError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every capture, returning how many were deleted.
    pub fn delete_all(&self) -> Result<usize, GalleryError> {
        let mut count = 0;
        for name in self.list()? {
            match std::fs::remove_file(self.dir.join(&name)) {
                Ok(()) => count += 1,
                // raced with another delete
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(count, "deleted all captures");
        Ok(count)
    }
}
