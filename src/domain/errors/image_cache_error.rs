//! Image cache error types.

use thiserror::Error;

use super::FetchError;

/// Errors surfaced by an image lookup.
///
/// Disk-tier failures never appear here: they are recovered inside the
/// cache and only logged.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ImageCacheError {
    #[error("invalid image URL: {url}")]
    InvalidUrl { url: String },

    #[error("invalid image data: {reason}")]
    InvalidImageData { reason: String },

    #[error(transparent)]
    Network(#[from] FetchError),
}

impl ImageCacheError {
    /// Creates invalid URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates invalid image data error.
    #[must_use]
    pub fn invalid_image_data(reason: impl Into<String>) -> Self {
        Self::InvalidImageData {
            reason: reason.into(),
        }
    }

    /// Returns whether the error came from the fetcher.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
