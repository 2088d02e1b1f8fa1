//! Two-tier image cache orchestrator.
//!
//! Resolves a URL through Memory -> Disk -> Network, backfilling the faster
//! tiers on the way out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage};
use crate::domain::errors::{FetchError, ImageCacheError};
use crate::domain::ports::{CacheResult, ImageCachePort, ImageFetcherPort};

use super::disk_cache::{DiskImageCache, default_cache_dir};
use super::http_fetcher::{DEFAULT_TIMEOUT_SECS, HttpImageFetcher};
use super::memory_cache::{CacheStats, DEFAULT_COST_LIMIT, DEFAULT_COUNT_LIMIT, MemoryImageCache};

/// Configuration for the image cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCacheConfig {
    /// Disk cache directory. Defaults to `<platform cache dir>/ImageCache`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Memory budget in bytes of encoded payload. 0 disables the bound.
    #[serde(default = "default_memory_cost_limit")]
    pub memory_cost_limit: usize,

    /// Maximum images kept in memory. 0 disables the bound.
    #[serde(default = "default_memory_count_limit")]
    pub memory_count_limit: usize,

    /// Network request timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Let concurrent requests for one URL share a single download.
    #[serde(default = "default_true")]
    pub coalesce_fetches: bool,
}

const fn default_memory_cost_limit() -> usize {
    DEFAULT_COST_LIMIT
}

const fn default_memory_count_limit() -> usize {
    DEFAULT_COUNT_LIMIT
}

const fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_true() -> bool {
    true
}

impl ImageCacheConfig {
    /// Returns the configured cache directory or the platform default.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_cost_limit: DEFAULT_COST_LIMIT,
            memory_count_limit: DEFAULT_COUNT_LIMIT,
            fetch_timeout_secs: DEFAULT_TIMEOUT_SECS,
            coalesce_fetches: true,
        }
    }
}

type InFlightMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Image cache backed by a memory tier, a disk tier and a fetcher.
///
/// Cloning is cheap and every clone shares the same tiers, so a single
/// instance can be created at startup and handed to everything that needs
/// images for the rest of the process.
#[derive(Clone)]
pub struct ImageCache {
    memory: Arc<MemoryImageCache>,
    disk: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    in_flight: Option<InFlightMap>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("cache_dir", &self.disk.cache_dir())
            .field("coalesce_fetches", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Creates a cache from configuration and a fetcher.
    #[must_use]
    pub fn new(config: &ImageCacheConfig, fetcher: Arc<dyn ImageFetcherPort>) -> Self {
        Self::with_tiers(
            Arc::new(MemoryImageCache::new(
                config.memory_cost_limit,
                config.memory_count_limit,
            )),
            Arc::new(DiskImageCache::new(config.effective_cache_dir())),
            fetcher,
            config.coalesce_fetches,
        )
    }

    /// Creates a cache that downloads over HTTP.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_http_fetcher(config: &ImageCacheConfig) -> Result<Self, FetchError> {
        let fetcher =
            HttpImageFetcher::with_timeout(Duration::from_secs(config.fetch_timeout_secs))?;
        Ok(Self::new(config, Arc::new(fetcher)))
    }

    /// Creates a cache from explicit tiers.
    #[must_use]
    pub fn with_tiers(
        memory: Arc<MemoryImageCache>,
        disk: Arc<DiskImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
        coalesce_fetches: bool,
    ) -> Self {
        Self {
            memory,
            disk,
            fetcher,
            in_flight: coalesce_fetches.then(|| Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Returns the memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryImageCache {
        &self.memory
    }

    /// Returns the disk tier.
    #[must_use]
    pub fn disk(&self) -> &DiskImageCache {
        &self.disk
    }

    /// Returns memory tier statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Resolves `url` to a decoded image.
    ///
    /// The network leg runs on its own task: if the caller stops waiting,
    /// the download still completes and warms both tiers.
    ///
    /// # Errors
    /// Returns [`ImageCacheError::InvalidUrl`] if `url` is not cached and
    /// does not parse, [`ImageCacheError::InvalidImageData`] if the
    /// downloaded bytes are not an image, and the fetcher's error unchanged
    /// if the download fails.
    pub async fn get_image(&self, url: &str) -> CacheResult<LoadedImage> {
        if let Some((image, cost)) = self.memory.get_entry(url) {
            return Ok(LoadedImage {
                image,
                source: ImageSource::MemoryCache,
                cost,
            });
        }

        let key = CacheKey::new(url);

        if let Some(loaded) = self.load_from_disk(&key).await {
            return Ok(loaded);
        }

        if let Err(e) = reqwest::Url::parse(url) {
            debug!(url = %url, error = %e, "Rejecting malformed image URL");
            return Err(ImageCacheError::invalid_url(url));
        }

        let this = self.clone();
        let task = tokio::spawn(async move { this.load_from_network(key).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(FetchError::transport(format!("image task cancelled: {e}")).into()),
        }
    }

    async fn load_from_disk(&self, key: &CacheKey) -> Option<LoadedImage> {
        let bytes = self.disk.get_bytes(key).await?;
        let cost = bytes.len();

        match decode(Bytes::from(bytes)).await {
            Ok(image) => {
                debug!(url = %key, "Decoded image from disk cache");
                self.memory.put(key.url(), image.clone(), cost);
                Some(LoadedImage {
                    image,
                    source: ImageSource::DiskCache,
                    cost,
                })
            }
            Err(reason) => {
                warn!(url = %key, error = %reason, "Cached image is corrupt, refetching");
                None
            }
        }
    }

    async fn load_from_network(&self, key: CacheKey) -> CacheResult<LoadedImage> {
        let _guard = match &self.in_flight {
            Some(in_flight) => {
                let guard = InFlightGuard::acquire(in_flight, key.url()).await;
                // Another request may have finished the download while we waited.
                if let Some((image, cost)) = self.memory.get_entry(key.url()) {
                    return Ok(LoadedImage {
                        image,
                        source: ImageSource::MemoryCache,
                        cost,
                    });
                }
                // The memory tier may have refused or evicted it; the file stays.
                if let Some(loaded) = self.load_from_disk(&key).await {
                    return Ok(loaded);
                }
                Some(guard)
            }
            None => None,
        };

        let bytes = self.fetcher.fetch(key.url()).await?;
        let cost = bytes.len();

        let image = decode(bytes.clone()).await.map_err(|reason| {
            warn!(url = %key, error = %reason, "Downloaded bytes are not an image");
            ImageCacheError::invalid_image_data(reason)
        })?;

        self.memory.put(key.url(), image.clone(), cost);

        if let Err(e) = self.disk.put_bytes(&key, &bytes).await {
            warn!(url = %key, error = %e, "Failed to cache image on disk");
        }

        debug!(url = %key, source = "network", cost = cost, "Image loaded successfully");

        Ok(LoadedImage {
            image,
            source: ImageSource::Network,
            cost,
        })
    }
}

#[async_trait]
impl ImageCachePort for ImageCache {
    async fn get_image(&self, url: &str) -> CacheResult<LoadedImage> {
        Self::get_image(self, url).await
    }
}

async fn decode(bytes: Bytes) -> Result<Arc<DynamicImage>, String> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| format!("decode task failed: {e}"))?
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

/// Holds the per-URL download lock and drops the map entry once no other
/// request is waiting on it.
struct InFlightGuard {
    map: InFlightMap,
    url: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InFlightGuard {
    async fn acquire(map: &InFlightMap, url: &str) -> Self {
        let lock = map.lock().entry(url.to_string()).or_default().clone();
        let guard = lock.clone().lock_owned().await;
        Self {
            map: map.clone(),
            url: url.to_string(),
            lock,
            guard: Some(guard),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.map.lock();
        // One reference in the map, one here: nobody else is queued.
        if map
            .get(&self.url)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2)
        {
            map.remove(&self.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mock::MockImageFetcher;
    use futures_util::future::join_all;
    use std::io::Cursor;
    use tempfile::TempDir;

    const URL: &str = "https://picsum.photos/id/237/200/300";

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn create_test_cache(fetcher: MockImageFetcher) -> (ImageCache, Arc<MockImageFetcher>, TempDir) {
        create_test_cache_with(fetcher, MemoryImageCache::new(0, 0), true)
    }

    fn create_test_cache_with(
        fetcher: MockImageFetcher,
        memory: MemoryImageCache,
        coalesce: bool,
    ) -> (ImageCache, Arc<MockImageFetcher>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher);
        let cache = ImageCache::with_tiers(
            Arc::new(memory),
            Arc::new(DiskImageCache::new(temp_dir.path().join("ImageCache"))),
            fetcher.clone(),
            coalesce,
        );
        (cache, fetcher, temp_dir)
    }

    #[tokio::test]
    async fn test_memory_hit_short_circuits_fetcher() {
        let png = png_bytes(4, 3);
        let (cache, fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png.clone()));

        let first = cache.get_image(URL).await.unwrap();
        let second = cache.get_image(URL).await.unwrap();

        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert_eq!(second.dimensions(), (4, 3));
        assert_eq!(second.cost, png.len());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_network_result_is_written_to_both_tiers() {
        let png = png_bytes(2, 2);
        let (cache, _fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png.clone()));

        cache.get_image(URL).await.unwrap();

        let key = CacheKey::new(URL);
        assert!(cache.memory().contains(URL));
        assert_eq!(cache.disk().get_bytes(&key).await.unwrap(), png);
        assert_eq!(
            cache.disk().path_for(&key),
            cache.disk().cache_dir().join(key.disk_key())
        );
    }

    #[tokio::test]
    async fn test_disk_hit_repopulates_memory() {
        let png = png_bytes(5, 5);
        let (cache, fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png_bytes(1, 1)));
        cache
            .disk()
            .put_bytes(&CacheKey::new(URL), &png)
            .await
            .unwrap();

        let loaded = cache.get_image(URL).await.unwrap();

        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(loaded.dimensions(), (5, 5));
        assert_eq!(fetcher.calls(), 0);
        assert!(cache.memory().contains(URL));
        assert_eq!(cache.memory().total_cost(), png.len());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_fetching() {
        let (cache, fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png_bytes(1, 1)));

        let result = cache.get_image("not a url").await;

        assert!(matches!(result, Err(ImageCacheError::InvalidUrl { .. })));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_network_payload_is_not_cached() {
        let (cache, fetcher, _temp) =
            create_test_cache(MockImageFetcher::returning(&b"definitely not an image"[..]));

        let result = cache.get_image(URL).await;

        assert!(matches!(
            result,
            Err(ImageCacheError::InvalidImageData { .. })
        ));
        assert_eq!(fetcher.calls(), 1);
        assert!(!cache.memory().contains(URL));
        assert!(!cache.disk().contains(&CacheKey::new(URL)).await);
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_falls_back_to_network() {
        let png = png_bytes(6, 2);
        let (cache, fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png.clone()));
        let key = CacheKey::new(URL);
        std::fs::create_dir_all(cache.disk().cache_dir()).unwrap();
        std::fs::write(cache.disk().path_for(&key), b"garbage").unwrap();

        let loaded = cache.get_image(URL).await.unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(loaded.dimensions(), (6, 2));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.disk().get_bytes(&key).await.unwrap(), png);
    }

    #[tokio::test]
    async fn test_network_error_passes_through_without_caching() {
        let (cache, _fetcher, _temp) =
            create_test_cache(MockImageFetcher::failing(FetchError::Status { status: 503 }));

        let result = cache.get_image(URL).await;

        match result {
            Err(ImageCacheError::Network(e)) => assert_eq!(e, FetchError::Status { status: 503 }),
            other => panic!("expected network error, got {other:?}"),
        }
        assert!(cache.memory().is_empty());
        assert!(cache.disk().is_empty().await);
    }

    #[tokio::test]
    async fn test_disk_write_failure_still_returns_image() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let fetcher = Arc::new(MockImageFetcher::returning(png_bytes(3, 3)));
        let cache = ImageCache::with_tiers(
            Arc::new(MemoryImageCache::default()),
            Arc::new(DiskImageCache::new(blocker.join("ImageCache"))),
            fetcher.clone(),
            true,
        );

        let first = cache.get_image(URL).await.unwrap();
        let second = cache.get_image(URL).await.unwrap();

        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_memory_eviction_keeps_disk_entry() {
        let other = "https://picsum.photos/id/1/200/300";
        let (cache, fetcher, _temp) = create_test_cache_with(
            MockImageFetcher::returning(png_bytes(2, 2))
                .with_response(other, Ok(png_bytes(9, 1).into())),
            MemoryImageCache::new(0, 1),
            true,
        );

        cache.get_image(URL).await.unwrap();
        let evictor = cache.get_image(other).await.unwrap();
        assert_eq!(evictor.dimensions(), (9, 1));
        assert!(!cache.memory().contains(URL));
        assert!(cache.disk().contains(&CacheKey::new(URL)).await);

        let loaded = cache.get_image(URL).await.unwrap();

        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert_eq!(loaded.dimensions(), (2, 2));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_fetch() {
        let png = png_bytes(8, 8);
        let (cache, fetcher, _temp) = create_test_cache(
            MockImageFetcher::returning(png.clone()).with_delay(Duration::from_millis(100)),
        );

        let results = join_all((0..8).map(|_| {
            let cache = cache.clone();
            async move { cache.get_image(URL).await }
        }))
        .await;

        let images: Vec<LoadedImage> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(fetcher.calls(), 1);
        assert!(
            images
                .iter()
                .all(|loaded| Arc::ptr_eq(&loaded.image, &images[0].image))
        );
        assert_eq!(
            cache.disk().get_bytes(&CacheKey::new(URL)).await.unwrap(),
            png
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_reuse_disk_entry_when_memory_refuses_image() {
        let png = png_bytes(6, 5);
        // A cost limit of one byte keeps every image out of memory.
        let (cache, fetcher, _temp) = create_test_cache_with(
            MockImageFetcher::returning(png.clone()).with_delay(Duration::from_millis(200)),
            MemoryImageCache::new(1, 0),
            true,
        );

        let results = join_all((0..5).map(|_| {
            let cache = cache.clone();
            async move { cache.get_image(URL).await }
        }))
        .await;

        let images: Vec<LoadedImage> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(fetcher.calls(), 1);
        assert!(images.iter().all(|loaded| loaded.dimensions() == (6, 5)));
        let from_network = images
            .iter()
            .filter(|loaded| loaded.source == ImageSource::Network)
            .count();
        let from_disk = images
            .iter()
            .filter(|loaded| loaded.source == ImageSource::DiskCache)
            .count();
        assert_eq!((from_network, from_disk), (1, 4));
        assert!(cache.memory().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_without_coalescing() {
        let png = png_bytes(8, 8);
        let (cache, fetcher, _temp) = create_test_cache_with(
            MockImageFetcher::returning(png.clone()).with_delay(Duration::from_millis(100)),
            MemoryImageCache::default(),
            false,
        );

        let results = join_all((0..8).map(|_| {
            let cache = cache.clone();
            async move { cache.get_image(URL).await }
        }))
        .await;

        for result in results {
            let loaded = result.unwrap();
            assert_eq!(loaded.dimensions(), (8, 8));
            assert_eq!(loaded.image.as_bytes(), DynamicImage::new_rgb8(8, 8).as_bytes());
        }
        assert!((1..=8).contains(&fetcher.calls()));
        assert_eq!(
            cache.disk().get_bytes(&CacheKey::new(URL)).await.unwrap(),
            png
        );
    }

    #[tokio::test]
    async fn test_in_flight_entries_are_released() {
        let (cache, _fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png_bytes(1, 1)));

        cache.get_image(URL).await.unwrap();

        let in_flight = cache.in_flight.as_ref().unwrap();
        assert!(in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_request_still_warms_cache() {
        let (cache, fetcher, _temp) = create_test_cache(
            MockImageFetcher::returning(png_bytes(2, 2)).with_delay(Duration::from_millis(300)),
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(100), cache.get_image(URL)).await;
        assert!(abandoned.is_err());

        // The detached download finishes on its own schedule; wait for it, bounded.
        for _ in 0..500 {
            if cache.memory().contains(URL) && cache.disk().contains(&CacheKey::new(URL)).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(cache.memory().contains(URL));
        assert!(cache.disk().contains(&CacheKey::new(URL)).await);
        let loaded = cache.get_image(URL).await.unwrap();
        assert_eq!(loaded.source, ImageSource::MemoryCache);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_port_object_resolves_images() {
        let (cache, _fetcher, _temp) = create_test_cache(MockImageFetcher::returning(png_bytes(1, 1)));
        let port: Arc<dyn ImageCachePort> = Arc::new(cache);

        let loaded = port.get_image(URL).await.unwrap();

        assert_eq!(loaded.dimensions(), (1, 1));
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: ImageCacheConfig = toml::from_str("").unwrap();
        assert_eq!(config, ImageCacheConfig::default());
        assert!(config.coalesce_fetches);
    }
}
