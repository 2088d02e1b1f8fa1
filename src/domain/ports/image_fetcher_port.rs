//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::FetchError;

/// Port for retrieving the encoded bytes behind a URL.
///
/// Retries, if any, are the implementation's business; the cache calls
/// `fetch` at most once per miss.
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Fetches raw bytes for `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
