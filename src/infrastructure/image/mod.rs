//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with cost-bounded LRU eviction
//! - Disk caching for persistence
//! - HTTP fetching
//! - The memory -> disk -> network lookup pipeline

pub mod disk_cache;
pub mod http_fetcher;
pub mod image_cache;
pub mod memory_cache;

pub use disk_cache::{DiskCacheError, DiskImageCache, default_cache_dir};
pub use http_fetcher::HttpImageFetcher;
pub use image_cache::{ImageCache, ImageCacheConfig};
pub use memory_cache::{CacheStats, MemoryImageCache};
