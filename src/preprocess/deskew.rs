//! Skew detection and correction.

use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use tracing::debug;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// Lines tilted further than this from horizontal are not text baselines.
const MAX_SKEW_DEGREES: f32 = 45.0;

/// Estimate the dominant skew angle in degrees.
///
/// Returns the median tilt of near-horizontal lines found by Hough voting over
/// Canny edges, or `None` when no usable lines exist.
pub fn estimate_skew(image: &GrayImage) -> Option<f32> {
    let (width, height) = image.dimensions();
    if width < 8 || height < 8 {
        return None;
    }

    let edges = canny(image, CANNY_LOW, CANNY_HIGH);
    let options = LineDetectionOptions {
        vote_threshold: (width.min(height) / 3).max(10),
        suppression_radius: 8,
    };
    let lines = detect_lines(&edges, options);

    // Hough angles describe the line normal; a horizontal line has its
    // normal at 90 degrees.
    let mut skews: Vec<f32> = lines
        .iter()
        .map(|line| line.angle_in_degrees as f32 - 90.0)
        .filter(|skew| skew.abs() <= MAX_SKEW_DEGREES)
        .collect();

    if skews.is_empty() {
        return None;
    }

    let median = median(&mut skews);
    debug!(
        "Deskew: {} candidate lines, median skew {:.2} deg",
        skews.len(),
        median
    );
    Some(median)
}

/// Rotate by `-angle` around the centre, or return `None` when the skew is
/// below `min_angle` and the image should be left untouched.
pub fn correct_skew(
    image: &GrayImage,
    angle: f32,
    min_angle: f32,
    background: u8,
) -> Option<GrayImage> {
    if angle.abs() < min_angle {
        return None;
    }
    Some(rotate_about_center(
        image,
        (-angle).to_radians(),
        Interpolation::Bilinear,
        Luma([background]),
    ))
}

/// Full deskew step. Returns the corrected image and the skew it removed, or
/// `None` when no lines were found or the skew is below `min_angle`.
pub fn deskew(image: &GrayImage, min_angle: f32, background: u8) -> Option<(GrayImage, f32)> {
    let Some(angle) = estimate_skew(image) else {
        debug!("Deskew: no lines detected, skipping");
        return None;
    };
    correct_skew(image, angle, min_angle, background).map(|rotated| (rotated, angle))
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
