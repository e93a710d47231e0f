//! Thresholding to a black/white image.

use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

use super::foreground_ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarizeMethod {
    AdaptiveGaussian,
    Otsu,
}

/// Threshold with adaptive-Gaussian and Otsu, keeping the first result whose
/// dark-pixel ratio lies inside `band`. Falls back to adaptive-Gaussian.
pub fn binarize(
    image: &GrayImage,
    block_size: u32,
    c: f32,
    band: (f32, f32),
) -> (GrayImage, BinarizeMethod) {
    let adaptive = adaptive_gaussian(image, block_size, c);
    let adaptive_ratio = foreground_ratio(&adaptive);
    if in_band(adaptive_ratio, band) {
        debug!("Binarize: adaptive ratio {:.3} accepted", adaptive_ratio);
        return (adaptive, BinarizeMethod::AdaptiveGaussian);
    }

    let otsu = threshold(image, otsu_level(image));
    let otsu_ratio = foreground_ratio(&otsu);
    if in_band(otsu_ratio, band) {
        debug!(
            "Binarize: adaptive ratio {:.3} rejected, otsu ratio {:.3} accepted",
            adaptive_ratio, otsu_ratio
        );
        return (otsu, BinarizeMethod::Otsu);
    }

    debug!(
        "Binarize: neither ratio healthy (adaptive {:.3}, otsu {:.3}), using adaptive",
        adaptive_ratio, otsu_ratio
    );
    (adaptive, BinarizeMethod::AdaptiveGaussian)
}

/// Pixel is white when brighter than its Gaussian-weighted neighbourhood
/// mean minus `c`.
pub fn adaptive_gaussian(image: &GrayImage, block_size: u32, c: f32) -> GrayImage {
    let block = block_size.max(3) as f32;
    // Same block-size to sigma mapping OpenCV uses for its Gaussian kernels.
    let sigma = 0.3 * ((block - 1.0) * 0.5 - 1.0) + 0.8;
    let blurred = gaussian_blur_f32(image, sigma);

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let value = image.get_pixel(x, y).0[0] as f32;
        let local = blurred.get_pixel(x, y).0[0] as f32;
        if value > local - c {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn in_band(ratio: f32, band: (f32, f32)) -> bool {
    ratio >= band.0 && ratio <= band.1
}
