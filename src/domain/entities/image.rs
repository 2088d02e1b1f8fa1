//! Domain types for image caching.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Key identifying a cached image.
///
/// The memory tier is keyed by the URL verbatim. The disk tier uses a
/// reversible, filesystem-safe encoding of the same URL (unpadded URL-safe
/// base64 of its UTF-8 bytes), so the encoded form never contains a path
/// separator or a reserved character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key for the given URL string.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Recovers a key from its disk encoding.
    ///
    /// Returns `None` if `disk_key` is not valid base64 or does not decode
    /// to UTF-8.
    #[must_use]
    pub fn from_disk_key(disk_key: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(disk_key).ok()?;
        String::from_utf8(bytes).ok().map(Self)
    }

    /// Returns the URL, which is also the memory-tier key.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.0
    }

    /// Returns the filesystem-safe disk-tier key.
    #[must_use]
    pub fn disk_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory tier.
    MemoryCache,
    /// Decoded from the disk tier.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded image together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The decoded image. Shared with the memory tier.
    pub image: Arc<image::DynamicImage>,
    /// The tier that satisfied the request.
    pub source: ImageSource,
    /// Byte length of the encoded payload the image was decoded from.
    pub cost: usize,
}

impl LoadedImage {
    /// Returns the image dimensions as `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}
