//! Utility functions for image loading and encoding.

use crate::core::OCRError;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;

/// Converts a DynamicImage to a GrayImage.
pub fn dynamic_to_gray(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Loads an image from a file path.
///
/// # Errors
///
/// Returns `OCRError::ImageLoad` if the file cannot be opened or decoded.
pub fn load_image(path: &std::path::Path) -> Result<DynamicImage, OCRError> {
    image::open(path).map_err(OCRError::ImageLoad)
}

/// Decodes an encoded image (PNG, JPEG, ...) from memory.
///
/// # Errors
///
/// Returns `OCRError::ImageLoad` if the format is unknown or the data is corrupt.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage, OCRError> {
    image::load_from_memory(bytes).map_err(OCRError::ImageLoad)
}

/// Encodes a grayscale image as PNG.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, OCRError> {
    let mut buffer = Vec::new();
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(OCRError::ImageLoad)?;
    Ok(buffer)
}

/// Loads a batch of images from file paths.
pub fn load_images_batch<P: AsRef<std::path::Path> + Send + Sync>(
    paths: &[P],
) -> Result<Vec<DynamicImage>, OCRError> {
    load_images_batch_with_threshold(paths, None)
}

/// Loads a batch of images, in parallel once the batch exceeds `parallel_threshold`.
///
/// If `parallel_threshold` is `None`, `DEFAULT_PARALLEL_THRESHOLD` is used.
pub fn load_images_batch_with_threshold<P: AsRef<std::path::Path> + Send + Sync>(
    paths: &[P],
    parallel_threshold: Option<usize>,
) -> Result<Vec<DynamicImage>, OCRError> {
    use crate::core::constants::DEFAULT_PARALLEL_THRESHOLD;

    let threshold = parallel_threshold.unwrap_or(DEFAULT_PARALLEL_THRESHOLD);

    if paths.len() > threshold {
        use rayon::prelude::*;
        paths.par_iter().map(|p| load_image(p.as_ref())).collect()
    } else {
        paths.iter().map(|p| load_image(p.as_ref())).collect()
    }
}
