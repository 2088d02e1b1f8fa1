mod image_cache_port;
mod image_fetcher_port;

pub use image_cache_port::{CacheResult, ImageCachePort};
pub use image_fetcher_port::ImageFetcherPort;
