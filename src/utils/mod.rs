//! Utility functions for the recognition engine.
//!
//! This module provides image loading and encoding helpers and dictionary
//! file readers.

pub mod dict;
pub mod image;

pub use dict::read_character_dict;
pub use image::{
    decode_image_bytes, dynamic_to_gray, encode_png, load_image, load_images_batch,
    load_images_batch_with_threshold,
};
