//! Infrastructure layer with storage and network adapters.

/// Application configuration.
pub mod config;
/// Image caching, storage and fetching.
pub mod image;

pub use config::{AppConfig, CliArgs, Command, LogLevel, StorageManager};
pub use image::{
    CacheStats, DiskCacheError, DiskImageCache, HttpImageFetcher, ImageCache, ImageCacheConfig,
    MemoryImageCache,
};
