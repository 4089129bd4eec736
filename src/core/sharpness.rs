use crate::error::Result;
use image::{DynamicImage, GrayImage};
use std::path::Path;

// Laplacian kernel, 4-neighbour
const KERNEL: [[f64; 3]; 3] = [[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]];

/// Blur score of an image: variance of the Laplacian response over its
/// grayscale raster. Higher means sharper.
///
/// Only interior pixels of the 8-bit grayscale conversion are filtered; the
/// border is not padded and colour channels are not scored separately. Scores
/// therefore run lower than a full-colour, border-padded Laplacian on the same
/// image, and a `blur_threshold` tuned for that measure has to be recalibrated.
pub fn blur_score(image: &DynamicImage) -> f64 {
    laplacian_variance(&image.to_luma8())
}

/// Decode the file at `path` and compute its blur score.
pub fn blur_score_from_path<P: AsRef<Path>>(path: P) -> Result<f64> {
    let image = image::open(path.as_ref())?;
    Ok(blur_score(&image))
}

fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;

    for y in 1..(height - 1) {
        for x in 1..(width - 1) {
            let mut laplacian = 0.0;

            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    if *weight == 0.0 {
                        continue;
                    }
                    let pixel = image.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1)[0];
                    laplacian += pixel as f64 * weight;
                }
            }

            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use tempfile::TempDir;

    fn checkerboard(size: u32, low: u8, high: u8) -> DynamicImage {
        let img = ImageBuffer::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([high])
            } else {
                Luma([low])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_flat_image_scores_zero() {
        let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(32, 32, Luma([128u8])));
        assert_eq!(blur_score(&img), 0.0);
    }

    #[test]
    fn test_checkerboard_variance() {
        // Every interior response is +-4 * 255
        let score = blur_score(&checkerboard(16, 0, 255));
        let expected = (4.0 * 255.0) * (4.0 * 255.0);
        assert!((score - expected).abs() < 1e-6, "score {score}");
    }

    #[test]
    fn test_contrast_orders_scores() {
        let soft = blur_score(&checkerboard(16, 100, 140));
        let hard = blur_score(&checkerboard(16, 0, 255));
        assert!(soft > 0.0);
        assert!(hard > soft);
    }

    #[test]
    fn test_tiny_image_scores_zero() {
        let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(2, 2, Luma([10u8])));
        assert_eq!(blur_score(&img), 0.0);
    }

    #[test]
    fn test_score_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("board.png");
        checkerboard(16, 0, 255).save(&path).unwrap();

        let from_path = blur_score_from_path(&path).unwrap();
        assert_eq!(from_path, blur_score(&checkerboard(16, 0, 255)));

        assert!(blur_score_from_path(temp_dir.path().join("missing.png")).is_err());
    }
}
