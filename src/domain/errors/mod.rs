//! Domain error types.

mod fetch_error;
mod image_cache_error;

pub use fetch_error::FetchError;
pub use image_cache_error::ImageCacheError;
