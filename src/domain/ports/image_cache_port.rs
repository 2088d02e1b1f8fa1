//! Port definition for image caching.

use async_trait::async_trait;

use crate::domain::entities::LoadedImage;
use crate::domain::errors::ImageCacheError;

/// Result type for image lookups.
pub type CacheResult<T> = std::result::Result<T, ImageCacheError>;

/// Port exposed to the application layer for resolving image URLs.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Returns the decoded image for `url`, consulting memory, then disk,
    /// then the network.
    async fn get_image(&self, url: &str) -> CacheResult<LoadedImage>;
}
