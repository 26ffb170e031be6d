//! Input recipes shared by the classifier backends.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array4;

/// BT.601 luma, the same weights OpenCV's BGR→GRAY conversion uses.
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());
    for (x, y, px) in image.enumerate_pixels() {
        let [r, g, b] = px.0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }
    gray
}

/// Grayscale, bilinear resize to `size`×`size`, raw 0-255 values in a
/// 1×1×size×size tensor. No mean subtraction and no scaling.
pub fn gray_tensor(face: &RgbImage, size: u32) -> Array4<f32> {
    let gray = to_grayscale(face);
    let resized = imageops::resize(&gray, size, size, FilterType::Triangle);

    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, n, n));
    for (x, y, px) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = px.0[0] as f32;
    }
    tensor
}

/// Parameters of an OpenCV-style `blobFromImage` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobRecipe {
    /// Square input size.
    pub size: u32,
    /// Per-channel mean in B, G, R order.
    pub mean_bgr: [f32; 3],
    pub scale: f32,
}

/// Resize to `recipe.size`², keep BGR channel order, subtract the mean and
/// scale, producing a 1×3×size×size NCHW tensor.
pub fn bgr_blob(face: &RgbImage, recipe: &BlobRecipe) -> Array4<f32> {
    let resized = imageops::resize(face, recipe.size, recipe.size, FilterType::Triangle);

    let n = recipe.size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, px) in resized.enumerate_pixels() {
        let [r, g, b] = px.0;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (b as f32 - recipe.mean_bgr[0]) * recipe.scale;
        tensor[[0, 1, y, x]] = (g as f32 - recipe.mean_bgr[1]) * recipe.scale;
        tensor[[0, 2, y, x]] = (r as f32 - recipe.mean_bgr[2]) * recipe.scale;
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_grayscale_weights() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));
        let gray = to_grayscale(&img);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_gray_tensor_shape_and_raw_values() {
        let img = RgbImage::from_pixel(100, 80, Rgb([200, 200, 200]));
        let tensor = gray_tensor(&img, 64);
        assert_eq!(tensor.shape(), &[1, 1, 64, 64]);
        assert_eq!(tensor[[0, 0, 10, 10]], 200.0);
    }

    #[test]
    fn test_bgr_blob_channel_order_and_mean() {
        let recipe = BlobRecipe {
            size: 4,
            mean_bgr: [10.0,
            20.0,
            30.0],
            scale: 1.0,
        };
        let img = RgbImage::from_pixel(8, 8, Rgb([100, 50, 25]));
        let blob = bgr_blob(&img, &recipe);
        assert_eq!(blob.shape(), &[1, 3, 4, 4]);
        // channel 0 is blue
        assert_eq!(blob[[0, 0, 1, 1]], 25.0 - 10.0);
        assert_eq!(blob[[0, 1, 1, 1]], 50.0 - 20.0);
        assert_eq!(blob[[0, 2, 1, 1]], 100.0 - 30.0);
    }
}
