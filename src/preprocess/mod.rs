//! Receipt image preprocessing for OCR.
//!
//! Runs a fixed sequence of steps over a decoded photo, each one gated by
//! [`PreprocessConfig`]. The steps that actually ran are recorded on the
//! returned [`PreprocessedImage`] so callers can attach them to OCR metadata.

pub mod binarize;
pub mod clahe;
pub mod denoise;
pub mod deskew;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::filter3x3;
use imageproc::morphology::{close, open};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use binarize::BinarizeMethod;

/// 3x3 sharpening kernel (identity plus negated 4-neighbour laplacian).
const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("failed to read image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Step toggles and tuning for [`preprocess`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub resize: bool,
    /// Images shorter than this are upscaled to it.
    pub min_height: u32,
    /// Bound on the long side.
    pub max_long_side: u32,
    /// Bound on the short side.
    pub max_short_side: u32,
    pub contrast: bool,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub sharpen: bool,
    pub deskew: bool,
    /// Skews smaller than this (degrees) are left alone.
    pub deskew_min_angle: f32,
    pub denoise: bool,
    pub denoise_strength: f32,
    pub binarize: bool,
    pub adaptive_block_size: u32,
    pub adaptive_c: f32,
    /// Acceptable dark-pixel ratio band after thresholding.
    pub foreground_band: (f32, f32),
    pub morphology: bool,
    /// Fill value for pixels uncovered by rotation.
    pub background: u8,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            resize: true,
            min_height: 800,
            max_long_side: 1920,
            max_short_side: 1080,
            contrast: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            sharpen: true,
            deskew: true,
            deskew_min_angle: 0.5,
            denoise: true,
            denoise_strength: 10.0,
            binarize: false,
            adaptive_block_size: 11,
            adaptive_c: 2.0,
            foreground_band: (0.15, 0.85),
            morphology: true,
            background: 255,
        }
    }
}

/// A preprocessing step that ran on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessStep {
    Upscale,
    Downscale,
    Grayscale,
    Contrast,
    Sharpen,
    Deskew,
    Denoise,
    BinarizeAdaptive,
    BinarizeOtsu,
    Morphology,
}

/// A decoded photo as received from media intake.
#[derive(Debug, Clone)]
pub struct RawImage {
    image: DynamicImage,
}

impl RawImage {
    /// Decode an image from an in-memory buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self, PreprocessError> {
        let image = image::load_from_memory(bytes)?;
        Self::from_dynamic(image)
    }

    pub fn from_dynamic(image: DynamicImage) -> Result<Self, PreprocessError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PreprocessError::EmptyImage);
        }
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }
}

/// Single-channel image ready for OCR.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub image: GrayImage,
    pub steps: Vec<PreprocessStep>,
    /// Skew that was corrected, in degrees.
    pub skew_corrected: Option<f32>,
}

impl PreprocessedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Run the preprocessing pipeline.
pub fn preprocess(
    raw: RawImage,
    config: &PreprocessConfig,
) -> Result<PreprocessedImage, PreprocessError> {
    let (width, height, channels) = (raw.width(), raw.height(), raw.channels());
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage);
    }
    info!(
        "Preprocessing image: {}x{} ({} channels)",
        width, height, channels
    );

    let mut steps = Vec::new();
    let mut image = raw.image;

    if config.resize {
        let (resized, step) = resize_for_ocr(image, config);
        image = resized;
        if let Some(step) = step {
            steps.push(step);
        }
    }

    let mut gray = if channels == 1 {
        image.into_luma8()
    } else {
        steps.push(PreprocessStep::Grayscale);
        image.to_luma8()
    };

    if config.contrast {
        gray = clahe::equalize(&gray, config.clahe_tiles, config.clahe_clip_limit);
        steps.push(PreprocessStep::Contrast);
    }

    if config.sharpen {
        gray = filter3x3::<_, f32, u8>(&gray, &SHARPEN_KERNEL);
        steps.push(PreprocessStep::Sharpen);
    }

    let mut skew_corrected = None;
    if config.deskew {
        if let Some((rotated, angle)) =
            deskew::deskew(&gray, config.deskew_min_angle, config.background)
        {
            gray = rotated;
            skew_corrected = Some(angle);
            steps.push(PreprocessStep::Deskew);
        }
    }

    if config.denoise {
        gray = denoise::non_local_means(&gray, config.denoise_strength);
        steps.push(PreprocessStep::Denoise);
    }

    if config.binarize {
        let (binary, method) = binarize::binarize(
            &gray,
            config.adaptive_block_size,
            config.adaptive_c,
            config.foreground_band,
        );
        gray = binary;
        steps.push(match method {
            BinarizeMethod::AdaptiveGaussian => PreprocessStep::BinarizeAdaptive,
            BinarizeMethod::Otsu => PreprocessStep::BinarizeOtsu,
        });

        if config.morphology {
            gray = close(&open(&gray, Norm::LInf, 1), Norm::LInf, 1);
            steps.push(PreprocessStep::Morphology);
        }
    }

    debug!(
        "Preprocessing done: {}x{}, steps={:?}",
        gray.width(),
        gray.height(),
        steps
    );

    Ok(PreprocessedImage {
        image: gray,
        steps,
        skew_corrected,
    })
}

/// Upscale short images or downscale oversized ones. At most one applies.
fn resize_for_ocr(
    image: DynamicImage,
    config: &PreprocessConfig,
) -> (DynamicImage, Option<PreprocessStep>) {
    let (width, height) = image.dimensions();

    if height < config.min_height {
        // The upscaled long side never exceeds max_long_side.
        let scale = (config.min_height as f64 / height as f64)
            .min(config.max_long_side as f64 / width.max(height) as f64);
        if scale > 1.0 {
            let new_width = ((width as f64 * scale).round() as u32).max(1);
            let new_height = ((height as f64 * scale).round() as u32).max(1);
            debug!(
                "Upscaling {}x{} -> {}x{}",
                width, height, new_width, new_height
            );
            let resized = image.resize_exact(new_width, new_height, FilterType::CatmullRom);
            return (resized, Some(PreprocessStep::Upscale));
        }
    }

    let (long, short) = if width >= height {
        (width, height)
    } else {
        (height, width)
    };
    if long > config.max_long_side || short > config.max_short_side {
        let scale = (config.max_long_side as f64 / long as f64)
            .min(config.max_short_side as f64 / short as f64);
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        debug!(
            "Downscaling {}x{} -> {}x{}",
            width, height, new_width, new_height
        );
        // thumbnail_exact averages every source pixel into its target cell
        let resized = image.thumbnail_exact(new_width, new_height);
        return (resized, Some(PreprocessStep::Downscale));
    }

    (image, None)
}

/// Fraction of dark (< 128) pixels.
pub(crate) fn foreground_ratio(image: &GrayImage) -> f32 {
    let total = (image.width() as u64 * image.height() as u64).max(1);
    let dark = image.pixels().filter(|p| p.0[0] < 128).count() as u64;
    dark as f32 / total as f32
}
