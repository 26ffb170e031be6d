//! Image quality checks on face crops.

use crate::models::preprocess::to_grayscale;
use image::{GrayImage, RgbImage};

/// Variance of the 4-neighbour Laplacian over interior pixels.
///
/// Sharp crops have strong edges and a high variance; blurred ones sit near
/// zero. Images smaller than 3×3 have no interior and return 0.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }

    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// True when the crop's Laplacian variance falls below `threshold`.
pub fn is_blurry(face: &RgbImage, threshold: f64) -> bool {
    laplacian_variance(&to_grayscale(face)) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_flat_image_has_zero_variance() {
        let gray = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(laplacian_variance(&gray), 0.0);
    }

    #[test]
    fn test_tiny_image_has_zero_variance() {
        assert_eq!(laplacian_variance(&GrayImage::new(2, 10)), 0.0);
    }

    #[test]
    fn test_checkerboard_is_sharp() {
        let gray = GrayImage::from_fn(32, 32, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        });
        assert!(laplacian_variance(&gray) > 1000.0);
    }

    #[test]
    fn test_is_blurry_threshold() {
        let flat = RgbImage::from_pixel(16, 16, Rgb([90, 90, 90]));
        assert!(is_blurry(&flat, 100.0));
        assert!(!is_blurry(&flat, 0.0));

        let sharp = RgbImage::from_fn(16, 16, |x, _| {
            if x % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        assert!(!is_blurry(&sharp, 100.0));
    }
}
