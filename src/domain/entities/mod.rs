//! Domain entity definitions.

mod image;

pub use image::{CacheKey, ImageSource, LoadedImage};
