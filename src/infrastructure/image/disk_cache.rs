//! Disk-based image cache holding raw encoded bytes, one file per URL.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;

/// Name of the cache directory under the platform cache root.
pub const CACHE_DIR_NAME: &str = "ImageCache";

/// Longest file name most filesystems accept.
const MAX_FILE_NAME_LEN: usize = 255;

/// Prefix of in-progress writes. Never produced by the key encoding.
const TEMP_PREFIX: &str = ".tmp";

/// Errors from disk-tier writes.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DiskCacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("disk key for {url} is {len} bytes, longer than a file name")]
    KeyTooLong { url: String, len: usize },
    #[error("cannot store an empty key")]
    EmptyKey,
    #[error("disk write task failed: {0}")]
    TaskFailed(String),
}

/// Unbounded disk cache that persists raw image bytes.
///
/// The directory is created lazily by the first write and may be missing
/// until then; reads against a missing directory are plain misses.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    dir_ready: AtomicBool,
}

impl DiskImageCache {
    /// Creates a disk cache rooted at `cache_dir`. Touches no files.
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            dir_ready: AtomicBool::new(false),
        }
    }

    /// Creates a cache in the default location (`<cache root>/ImageCache`).
    #[must_use]
    pub fn default_location() -> Self {
        Self::new(default_cache_dir())
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the file path for a key.
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.disk_key())
    }

    /// Creates the cache directory if it does not exist yet.
    ///
    /// Safe to call concurrently and repeatedly. A failure is not remembered,
    /// so the next call tries again.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn ensure_dir(&self) -> Result<(), DiskCacheError> {
        if self.dir_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
            warn!(path = %self.cache_dir.display(), error = %e, "Failed to create cache directory");
            e
        })?;

        if !self.dir_ready.swap(true, Ordering::AcqRel) {
            debug!(path = %self.cache_dir.display(), "Cache directory ready");
        }
        Ok(())
    }

    /// Reads the raw bytes stored for `key`.
    ///
    /// Any failure, including a missing file or directory, is a miss.
    pub async fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.readable_path(key)?;

        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(url = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(url = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                warn!(url = %key, path = %path.display(), error = %e, "Failed to read cached image");
                None
            }
        }
    }

    /// Stores raw bytes for `key`, replacing any previous entry.
    ///
    /// The bytes are written to a temporary file in the cache directory and
    /// renamed over the target, so readers see either the old file or the
    /// complete new one. If the directory was removed since it was created,
    /// it is created again and the write retried once.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the file cannot
    /// be written.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), DiskCacheError> {
        let disk_key = key.disk_key();
        if key.url().is_empty() {
            return Err(DiskCacheError::EmptyKey);
        }
        if disk_key.len() > MAX_FILE_NAME_LEN {
            return Err(DiskCacheError::KeyTooLong {
                url: key.url().to_string(),
                len: disk_key.len(),
            });
        }

        self.ensure_dir().await?;

        let path = self.cache_dir.join(&disk_key);
        let data: Arc<[u8]> = Arc::from(bytes);

        match self.write_file(&path, data.clone()).await {
            Err(DiskCacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                // Directory vanished after it was created.
                debug!(path = %self.cache_dir.display(), "Cache directory missing, recreating");
                self.dir_ready.store(false, Ordering::Release);
                self.ensure_dir().await?;
                self.write_file(&path, data).await?;
            }
            result => result?,
        }

        debug!(url = %key, path = %path.display(), size = bytes.len(), "Stored image in disk cache");
        Ok(())
    }

    /// Writes `data` to a temp file next to `target` and renames it into place.
    async fn write_file(&self, target: &Path, data: Arc<[u8]>) -> Result<(), DiskCacheError> {
        let dir = self.cache_dir.clone();
        let target = target.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), DiskCacheError> {
            let mut file = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&dir)?;
            file.write_all(&data)?;
            file.as_file().sync_all()?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| DiskCacheError::TaskFailed(e.to_string()))?
    }

    /// Removes the entry for `key`. A missing entry is not an error.
    pub async fn remove(&self, key: &CacheKey) {
        let Some(path) = self.readable_path(key) else {
            return;
        };
        match fs::remove_file(&path).await {
            Ok(()) => debug!(url = %key, "Removed image from disk cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(url = %key, error = %e, "Failed to remove cached image"),
        }
    }

    /// Checks if an entry exists for `key`.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        match self.readable_path(key) {
            Some(path) => fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Returns the number of cached files, ignoring in-progress writes.
    pub async fn len(&self) -> usize {
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return 0;
        };

        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_temp = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(TEMP_PREFIX));
            if !is_temp && entry.file_type().await.is_ok_and(|t| t.is_file()) {
                count += 1;
            }
        }
        count
    }

    /// Returns true if no files are cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Path for a key that could exist on disk.
    fn readable_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let disk_key = key.disk_key();
        if disk_key.is_empty() || disk_key.len() > MAX_FILE_NAME_LEN {
            return None;
        }
        Some(self.cache_dir.join(disk_key))
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "postapp", "post-image-cache").map_or_else(
        || {
            std::env::temp_dir()
                .join("post-image-cache")
                .join(CACHE_DIR_NAME)
        },
        |dirs| dirs.cache_dir().join(CACHE_DIR_NAME),
    )
}
