//! Non-local-means denoising for scanned documents.
//!
//! Each pixel becomes a weighted average of pixels in its search window,
//! weighted by how similar the surrounding patches are. Patch distances are
//! computed one search offset at a time with a summed-area table so the cost
//! is `O(pixels * search_area)` instead of `O(pixels * search_area * patch_area)`.

use image::{GrayImage, Luma};

const PATCH_RADIUS: i64 = 1;
const SEARCH_RADIUS: i64 = 5;

/// Denoise with filter strength `h` (larger removes more noise and detail).
pub fn non_local_means(image: &GrayImage, h: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || h <= 0.0 {
        return image.clone();
    }
    let (w, hgt) = (width as i64, height as i64);
    let len = (width * height) as usize;

    let pixels: Vec<f32> = image.pixels().map(|p| p.0[0] as f32).collect();
    let at = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, hgt - 1);
        pixels[(y * w + x) as usize]
    };

    let h2 = h * h;
    let mut weighted = vec![0f32; len];
    let mut weights = vec![0f32; len];
    let mut diff = vec![0f64; len];
    let mut integral = vec![0f64; ((w + 1) * (hgt + 1)) as usize];

    for dy in -SEARCH_RADIUS..=SEARCH_RADIUS {
        for dx in -SEARCH_RADIUS..=SEARCH_RADIUS {
            for y in 0..hgt {
                for x in 0..w {
                    let d = at(x, y) - at(x + dx, y + dy);
                    diff[(y * w + x) as usize] = (d * d) as f64;
                }
            }
            build_integral(&diff, w, hgt, &mut integral);

            for y in 0..hgt {
                for x in 0..w {
                    let distance = patch_mean(&integral, w, hgt, x, y) as f32;
                    let weight = (-distance / h2).exp();
                    let idx = (y * w + x) as usize;
                    weighted[idx] += weight * at(x + dx, y + dy);
                    weights[idx] += weight;
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let idx = (y * width + x) as usize;
        let value = if weights[idx] > 0.0 {
            weighted[idx] / weights[idx]
        } else {
            pixels[idx]
        };
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

fn build_integral(values: &[f64], w: i64, h: i64, integral: &mut [f64]) {
    let stride = w + 1;
    for x in 0..=w {
        integral[x as usize] = 0.0;
    }
    for y in 0..h {
        let mut row = 0.0;
        integral[((y + 1) * stride) as usize] = 0.0;
        for x in 0..w {
            row += values[(y * w + x) as usize];
            integral[((y + 1) * stride + x + 1) as usize] = integral[(y * stride + x + 1) as usize] + row;
        }
    }
}

/// Mean of the patch centred on (x, y), clipped to the image.
fn patch_mean(integral: &[f64], w: i64, h: i64, x: i64, y: i64) -> f64 {
    let stride = w + 1;
    let x0 = (x - PATCH_RADIUS).max(0);
    let y0 = (y - PATCH_RADIUS).max(0);
    let x1 = (x + PATCH_RADIUS + 1).min(w);
    let y1 = (y + PATCH_RADIUS + 1).min(h);
    let sum = integral[(y1 * stride + x1) as usize] - integral[(y0 * stride + x1) as usize]
        - integral[(y1 * stride + x0) as usize]
        + integral[(y0 * stride + x0) as usize];
    sum / ((x1 - x0) * (y1 - y0)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variance(image: &GrayImage) -> f64 {
        let n = (image.width() * image.height()) as f64;
        let mean = image.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
        image
            .pixels()
            .map(|p| (p.0[0] as f64 - mean).powi(2))
            .sum::<f64>()
            / n
    }

    #[test]
    fn test_flat_image_unchanged() {
        let flat = GrayImage::from_pixel(16, 16, Luma([180]));
        assert_eq!(non_local_means(&flat, 10.0), flat);
    }

    #[test]
    fn test_reduces_salt_noise() {
        let noisy = GrayImage::from_fn(32, 32, |x, y| {
            if (x * 7 + y * 13) % 11 == 0 {
                Luma([200])
            } else {
                Luma([180])
            }
        });
        let clean = non_local_means(&noisy, 30.0);
        assert!(variance(&clean) < variance(&noisy));
    }

    #[test]
    fn test_zero_strength_is_noop() {
        let image = GrayImage::from_fn(8, 8, |x, y| Luma([(x * y) as u8]));
        assert_eq!(non_local_means(&image, 0.0), image);
    }
}
