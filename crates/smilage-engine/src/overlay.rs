//! Result overlays drawn onto outgoing frames.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use smilage_core::FaceRegion;
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([153, 204, 255]);
const AGE_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const EMOTION_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const GENDER_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const SMILE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BLURRY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BANNER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const BANNER_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BANNER_ALPHA: f32 = 0.6;

const LABEL_SCALE: f32 = 22.0;
const BANNER_SCALE: f32 = 30.0;
/// Baseline spacing of the labels stacked under the face box.
const LINE_STEP: i32 = 25;
/// Banner width when no font is available to measure the text.
const FALLBACK_BANNER_WIDTH: u32 = 260;

/// Labels for one face.
#[derive(Debug, Clone, Copy)]
pub struct FaceAnnotation<'a> {
    pub face: &'a FaceRegion,
    pub age: &'a str,
    pub emotion: &'a str,
    pub gender: &'a str,
    /// Happiness confidence, present only while smiling.
    pub smile_confidence: Option<f32>,
    pub is_blurry: bool,
}

pub struct Overlay {
    font: Option<FontVec>,
}

impl Overlay {
    /// Load the label font. A missing or unreadable font disables text but
    /// keeps boxes and banners.
    pub fn new(font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| {
            let loaded = std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
            match loaded {
                Ok(font) => {
                    tracing::debug!(path = %path.display(), "loaded overlay font");
                    Some(font)
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "overlay font unavailable, drawing boxes only"
                    );
                    None
                }
            }
        });
        Self { font }
    }

    pub fn without_text() -> Self {
        Self { font: None }
    }

    /// Draw `text` with its baseline near `baseline_y`.
    fn label(
        &self,
        img: &mut RgbImage,
        color: Rgb<u8>,
        x: i32,
        baseline_y: i32,
        scale: f32,
        text: &str,
    ) {
        if let Some(font) = &self.font {
            let top = baseline_y - scale as i32;
            draw_text_mut(img, color, x, top, PxScale::from(scale), font, text);
        }
    }

    /// Face box (2 px), age above it, then emotion, gender, smile and blur
    /// notes stacked below.
    pub fn draw_face(&self, img: &mut RgbImage, ann: &FaceAnnotation<'_>) {
        let f = ann.face;
        let (x, y) = (f.x as i32, f.y as i32);
        draw_hollow_rect_mut(img, Rect::at(x, y).of_size(f.width, f.height), BOX_COLOR);
        if f.width > 2 && f.height > 2 {
            draw_hollow_rect_mut(
                img,
                Rect::at(x + 1, y + 1).of_size(f.width - 2, f.height - 2),
                BOX_COLOR,
            );
        }

        let bottom = y + f.height as i32;
        self.label(img, AGE_COLOR, x, y - 10, LABEL_SCALE, &format!("Age: {}", ann.age));
        let emotion = format!("Emotion: {}", ann.emotion);
        self.label(img, EMOTION_COLOR, x, bottom + LINE_STEP, LABEL_SCALE, &emotion);
        let gender = format!("Gender: {}", ann.gender);
        self.label(img, GENDER_COLOR, x, bottom + 2 * LINE_STEP, LABEL_SCALE, &gender);

        let mut line = 3;
        if let Some(conf) = ann.smile_confidence {
            self.label(
                img,
                SMILE_COLOR,
                x,
                bottom + line * LINE_STEP,
                LABEL_SCALE,
                &format!("Smile Detected ({conf:.2})"),
            );
            line += 1;
        }
        if ann.is_blurry {
            self.label(img, BLURRY_COLOR, x, bottom + line * LINE_STEP, LABEL_SCALE, "Blurry");
        }
    }

    /// Centered semi-transparent banner at 10% of the frame height.
    pub fn draw_banner(&self, img: &mut RgbImage, text: &str) {
        let (w, h) = img.dimensions();
        let text_w = match &self.font {
            Some(font) => text_size(PxScale::from(BANNER_SCALE), font, text).0,
            None => FALLBACK_BANNER_WIDTH,
        };

        let text_x = (w as i32 - text_w as i32) / 2;
        let text_y = (h as f32 * 0.1) as i32;
        let x0 = (text_x - 10).max(0) as u32;
        let y0 = (text_y - 40).max(0) as u32;
        let x1 = ((text_x + text_w as i32 + 10).max(0) as u32).min(w);
        let y1 = (text_y.max(0) as u32).min(h);

        blend_rect(img, x0, y0, x1, y1, BANNER_COLOR, BANNER_ALPHA);
        self.label(img, BANNER_TEXT_COLOR, text_x, text_y - 10, BANNER_SCALE, text);
    }

    /// Lines of text in the top-left corner.
    pub fn draw_lines(&self, img: &mut RgbImage, lines: &[String]) {
        for (i, line) in lines.iter().enumerate() {
            self.label(img, EMOTION_COLOR, 10, 30 + i as i32 * 30, LABEL_SCALE, line);
        }
    }
}

/// Alpha-blend `color` over the half-open rectangle [x0, x1) × [y0, y1).
fn blend_rect(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>, alpha: f32) {
    for y in y0..y1.min(img.height()) {
        for x in x0..x1.min(img.width()) {
            let px = img.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = alpha * color.0[c] as f32 + (1.0 - alpha) * px.0[c] as f32;
                px.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
