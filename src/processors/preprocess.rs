//! Glyph preprocessing.
//!
//! [`GlyphPreprocessor`] turns an arbitrary input image into the fixed-size,
//! single-channel glyph the feature extractor consumes, and builds the
//! normalized input tensor. It also prepares the enhanced image handed to the
//! alternate text engine.
//!
//! The pipeline always converts to grayscale first, then applies the
//! configured steps in order. Resizing to the model geometry is appended when
//! the configuration omits it.

use crate::core::config::{PreprocessConfig, PreprocessStep};
use crate::core::errors::{OCRError, OcrResult, ProcessingStage, candle_to_ocr_processing};
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::equalize_histogram;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;

/// Blur applied to the upscaled glyph before it reaches the alternate engine.
const ENGINE_BLUR_SIGMA: f32 = 0.8;

/// Sigma of the Gaussian kernel OpenCV derives for a given block size.
fn kernel_sigma(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

#[derive(Debug, Clone)]
pub struct GlyphPreprocessor {
    config: PreprocessConfig,
    steps: Vec<PreprocessStep>,
    width: u32,
    height: u32,
}

impl GlyphPreprocessor {
    /// Creates a preprocessor producing `width`x`height` glyphs.
    pub fn new(config: PreprocessConfig, width: u32, height: u32) -> Self {
        let mut steps = config.steps.clone();
        if !steps.contains(&PreprocessStep::Resize) {
            steps.push(PreprocessStep::Resize);
        }
        Self {
            config,
            steps,
            width,
            height,
        }
    }

    /// Target geometry as `(width, height)`.
    pub fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Runs the preprocessing pipeline.
    ///
    /// # Errors
    ///
    /// Returns `OCRError::InvalidInput` for images without pixels.
    pub fn process(&self, image: &DynamicImage) -> OcrResult<GrayImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(OCRError::invalid_input(format!(
                "glyph image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }

        let mut gray = image.to_luma8();
        for step in &self.steps {
            gray = match step {
                PreprocessStep::Binarize => self.binarize(&gray),
                PreprocessStep::AdaptiveBinarize => self.adaptive_binarize(&gray),
                PreprocessStep::Denoise => self.denoise(gray),
                PreprocessStep::Center => center(&gray),
                PreprocessStep::Resize => self.resize(&gray),
            };
        }
        Ok(gray)
    }

    fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let threshold = self.config.binarize_threshold;
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let value = gray.get_pixel(x, y)[0];
            Luma([if value < threshold { 0 } else { 255 }])
        })
    }

    /// Gaussian-weighted adaptive threshold, inverted so ink becomes white.
    fn adaptive_binarize(&self, gray: &GrayImage) -> GrayImage {
        let local_mean = gaussian_blur_f32(gray, kernel_sigma(self.config.adaptive_block_size));
        let offset = self.config.adaptive_offset;
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let value = gray.get_pixel(x, y)[0] as i16;
            let threshold = local_mean.get_pixel(x, y)[0] as i16 - offset;
            Luma([if value > threshold { 0 } else { 255 }])
        })
    }

    fn denoise(&self, gray: GrayImage) -> GrayImage {
        let radius = self.config.denoise_radius;
        if radius == 0 {
            return gray;
        }
        let opened = morphology::open(&gray, Norm::LInf, radius);
        morphology::close(&opened, Norm::LInf, radius)
    }

    fn resize(&self, gray: &GrayImage) -> GrayImage {
        if gray.dimensions() == (self.width, self.height) {
            return gray.clone();
        }
        imageops::resize(gray, self.width, self.height, FilterType::Lanczos3)
    }

    /// Stacks preprocessed glyphs into a `(N, 1, H, W)` tensor normalized to `[-1, 1]`.
    ///
    /// # Errors
    ///
    /// Every glyph must already have the preprocessor's geometry.
    pub fn to_tensor(&self, glyphs: &[GrayImage], device: &Device) -> OcrResult<Tensor> {
        let mut data = Vec::with_capacity(glyphs.len() * (self.width * self.height) as usize);
        for glyph in glyphs {
            if glyph.dimensions() != (self.width, self.height) {
                return Err(OCRError::invalid_input(format!(
                    "glyph is {}x{}, expected {}x{}",
                    glyph.width(),
                    glyph.height(),
                    self.width,
                    self.height
                )));
            }
            data.extend(glyph.pixels().map(|p| (p[0] as f32 / 255.0 - 0.5) / 0.5));
        }
        Tensor::from_vec(
            data,
            (glyphs.len(), 1, self.height as usize, self.width as usize),
            device,
        )
        .map_err(|e| candle_to_ocr_processing(ProcessingStage::Normalization, "build input tensor", e))
    }

    /// Prepares a glyph for the alternate text engine: 2x upscale, light blur
    /// and histogram equalization.
    pub fn enhance_for_engine(&self, glyph: &GrayImage) -> GrayImage {
        let upscaled = imageops::resize(
            glyph,
            glyph.width() * 2,
            glyph.height() * 2,
            FilterType::Lanczos3,
        );
        let blurred = gaussian_blur_f32(&upscaled, ENGINE_BLUR_SIGMA);
        equalize_histogram(&blurred)
    }

    /// Encodes a glyph as PNG for the result payload.
    pub fn encode_png(glyph: &GrayImage) -> OcrResult<Vec<u8>> {
        crate::utils::encode_png(glyph)
    }
}

/// Crops the ink bounding box and re-centers it on a black canvas of the same size.
fn center(gray: &GrayImage) -> GrayImage {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    let Some((x0, y0, x1, y1)) = bounds else {
        return gray.clone();
    };

    let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
    let cropped = imageops::crop_imm(gray, x0, y0, w, h).to_image();
    let mut canvas = GrayImage::new(gray.width(), gray.height());
    let offset_x = (gray.width() - w) / 2;
    let offset_y = (gray.height() - h) / 2;
    imageops::replace(&mut canvas, &cropped, offset_x as i64, offset_y as i64);
    canvas
}
