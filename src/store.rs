//! Local storage for generated videos.
//!
//! `AssetStore` is the gallery directory the application owns: destination
//! paths are allocated there under collision-free names, and finished
//! videos can be listed and removed. `GenerationCache` is a separate
//! content cache keyed by a request fingerprint, so repeating an identical
//! request reuses the previous video instead of calling providers again.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::generation::GenerationRequest;

/// A finished video in the gallery.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// The writable directory generated videos land in.
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    /// Create a store over the given directory.
    /// Does not create the directory - call `ensure_dir_exists()` to create it.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Create a store over the default gallery directory.
    /// Default: `<data dir>/video-forge/generated/`.
    pub fn with_default_dir() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("generated_videos"))
            .join("video-forge")
            .join("generated");
        Self::new(dir)
    }

    /// Create a store over the default directory and ensure it exists.
    /// This is the preferred constructor for production use.
    pub fn with_default_dir_initialized() -> Result<Self, std::io::Error> {
        let store = Self::with_default_dir();
        store.ensure_dir_exists()?;
        Ok(store)
    }

    /// Create a store over a custom directory and ensure it exists.
    pub fn new_initialized(dir: PathBuf) -> Result<Self, std::io::Error> {
        let store = Self::new(dir);
        store.ensure_dir_exists()?;
        Ok(store)
    }

    /// Ensure the gallery directory exists, creating it if necessary.
    pub fn ensure_dir_exists(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Allocate a collision-free destination path for a new video.
    ///
    /// Names are random 128-bit identifiers, so two generations can never
    /// collide regardless of prompt or timing.
    pub fn allocate(&self) -> PathBuf {
        self.dir
            .join(format!("{}.mp4", uuid::Uuid::new_v4().simple()))
    }

    /// List finished videos, newest first, up to `limit`.
    pub fn list(&self, limit: usize) -> Result<Vec<AssetRecord>, std::io::Error> {
        let mut records: Vec<AssetRecord> = Vec::new();

        if !self.dir.exists() {
            return Ok(records);
        }

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    records.push(AssetRecord {
                        path,
                        size_bytes: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }

        records.sort_by(|a, b| b.modified.cmp(&a.modified));
        records.truncate(limit);
        Ok(records)
    }

    /// Delete a video from the gallery.
    pub fn remove(&self, path: &Path) -> Result<(), std::io::Error> {
        std::fs::remove_file(path)
    }

    /// Get the gallery directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Persistent disk cache mapping request fingerprints to finished videos.
pub struct GenerationCache {
    cache_dir: PathBuf,
}

impl GenerationCache {
    /// Create a cache over the given directory.
    /// Does not create the directory - call `ensure_dir_exists()` to create it.
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Create a cache over the default directory.
    /// Default: `<cache dir>/video-forge/videos/`.
    pub fn with_default_dir() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("video-forge")
            .join("videos");
        Self::new(cache_dir)
    }

    /// Create a cache over the default directory and ensure it exists.
    pub fn with_default_dir_initialized() -> Result<Self, std::io::Error> {
        let cache = Self::with_default_dir();
        cache.ensure_dir_exists()?;
        Ok(cache)
    }

    /// Create a cache over a custom directory and ensure it exists.
    pub fn new_initialized(cache_dir: PathBuf) -> Result<Self, std::io::Error> {
        let cache = Self::new(cache_dir);
        cache.ensure_dir_exists()?;
        Ok(cache)
    }

    /// Ensure the cache directory exists, creating it if necessary.
    pub fn ensure_dir_exists(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.cache_dir)
    }

    /// Deterministic fingerprint of everything that shapes the output:
    /// prompt, dimensions, duration, pinned seed, and the source image
    /// bytes. Returns a 32-character hex string.
    ///
    /// Requests with an unpinned seed still fingerprint identically; the
    /// cache deliberately treats re-rolls of the same inputs as hits.
    pub fn fingerprint(request: &GenerationRequest) -> Result<String, std::io::Error> {
        let mut hasher = Sha256::new();
        hasher.update(request.prompt().as_bytes());
        hasher.update(request.width().to_le_bytes());
        hasher.update(request.height().to_le_bytes());
        hasher.update(request.duration_secs().to_le_bytes());
        if let Some(seed) = request.seed() {
            hasher.update(seed.to_le_bytes());
        }
        hasher.update(std::fs::read(request.source_image())?);
        let result = hasher.finalize();
        // First 16 bytes keep filenames short.
        Ok(hex::encode(&result[..16]))
    }

    /// Get the cached video for a fingerprint, if present.
    pub fn get(&self, fingerprint: &str) -> Option<PathBuf> {
        let video_path = self.cache_dir.join(format!("{}.mp4", fingerprint));
        if video_path.exists() {
            Some(video_path)
        } else {
            None
        }
    }

    /// Store a finished video under a fingerprint.
    pub fn store(&self, fingerprint: &str, video_path: &Path) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let cached_path = self.cache_dir.join(format!("{}.mp4", fingerprint));
        std::fs::copy(video_path, &cached_path)?;
        Ok(cached_path)
    }

    /// Store a video and evict old entries if the cache grew past the cap.
    pub fn store_with_cleanup(
        &self,
        fingerprint: &str,
        video_path: &Path,
        max_size_mb: u64,
    ) -> Result<PathBuf, std::io::Error> {
        let cached_path = self.store(fingerprint, video_path)?;
        self.cleanup_if_needed(max_size_mb)?;
        Ok(cached_path)
    }

    /// Remove old entries if the cache exceeds `max_size_mb`.
    /// Deletes oldest files first (by modification time) until under limit.
    pub fn cleanup_if_needed(&self, max_size_mb: u64) -> Result<(), std::io::Error> {
        let max_size_bytes = max_size_mb * 1024 * 1024;

        if !self.cache_dir.exists() {
            return Ok(());
        }

        let mut files: Vec<(PathBuf, std::fs::Metadata)> = Vec::new();
        let mut total_size: u64 = 0;

        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) == Some("mp4") {
                if let Ok(metadata) = entry.metadata() {
                    if metadata.is_file() {
                        total_size += metadata.len();
                        files.push((path, metadata));
                    }
                }
            }
        }

        if total_size <= max_size_bytes {
            return Ok(());
        }

        files.sort_by(|a, b| {
            let time_a = a.1.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let time_b = b.1.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            time_a.cmp(&time_b)
        });

        for (path, metadata) in files {
            if total_size <= max_size_bytes {
                break;
            }
            let file_size = metadata.len();
            if std::fs::remove_file(&path).is_ok() {
                log::debug!("Evicted cached video {}", path.display());
                total_size = total_size.saturating_sub(file_size);
            }
        }

        Ok(())
    }

    /// Get the cache directory path.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request_with_image(prompt: &str, image: &Path) -> GenerationRequest {
        GenerationRequest::new(prompt, image, 704, 512, 2).unwrap()
    }

    #[test]
    fn test_allocate_produces_unique_mp4_names() {
        let store = AssetStore::new(PathBuf::from("/tmp/gallery"));
        let a = store.allocate();
        let b = store.allocate();

        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(a.starts_with("/tmp/gallery"));
    }

    #[test]
    fn test_list_filters_and_limits() {
        let dir = TempDir::new().unwrap();
        let store = AssetStore::new_initialized(dir.path().to_path_buf()).unwrap();

        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            std::fs::write(dir.path().join(name), b"video").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"not a video").unwrap();

        let all = store.list(10).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.size_bytes == 5));

        let limited = store.list(2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let store = AssetStore::new(PathBuf::from("/tmp/video-forge-does-not-exist"));
        assert!(store.list(10).unwrap().is_empty());
    }

    #[test]
    fn test_remove_deletes_gallery_entry() {
        let dir = TempDir::new().unwrap();
        let store = AssetStore::new_initialized(dir.path().to_path_buf()).unwrap();

        let video = dir.path().join("a.mp4");
        std::fs::write(&video, b"video").unwrap();
        assert_eq!(store.list(10).unwrap().len(), 1);

        store.remove(&video).unwrap();
        assert!(store.list(10).unwrap().is_empty());
        assert!(store.remove(&video).is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("in.png");
        std::fs::write(&image, b"image-bytes").unwrap();

        let request = request_with_image("a calm lake", &image);
        let first = GenerationCache::fingerprint(&request).unwrap();
        let second = GenerationCache::fingerprint(&request).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn test_fingerprint_varies_with_inputs() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("in.png");
        std::fs::write(&image, b"image-bytes").unwrap();

        let base = GenerationCache::fingerprint(&request_with_image("a calm lake", &image)).unwrap();

        let other_prompt =
            GenerationCache::fingerprint(&request_with_image("a stormy sea", &image)).unwrap();
        assert_ne!(base, other_prompt);

        std::fs::write(&image, b"different-image-bytes").unwrap();
        let other_image =
            GenerationCache::fingerprint(&request_with_image("a calm lake", &image)).unwrap();
        assert_ne!(base, other_image);
    }

    #[test]
    fn test_cache_get_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = GenerationCache::new_initialized(dir.path().join("cache")).unwrap();

        assert!(cache.get("aaaa").is_none());

        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"video-bytes").unwrap();
        let cached = cache.store("aaaa", &video).unwrap();

        assert_eq!(cache.get("aaaa"), Some(cached.clone()));
        assert_eq!(std::fs::read(cached).unwrap(), b"video-bytes");
    }

    #[test]
    fn test_cleanup_evicts_down_to_cap() {
        let dir = TempDir::new().unwrap();
        let cache = GenerationCache::new_initialized(dir.path().to_path_buf()).unwrap();

        // Three 1 MiB entries against a 2 MiB cap.
        let payload = vec![0u8; 1024 * 1024];
        for name in ["a", "b", "c"] {
            std::fs::write(dir.path().join(format!("{name}.mp4")), &payload).unwrap();
        }

        cache.cleanup_if_needed(2).unwrap();

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("mp4"))
            .collect();
        assert_eq!(remaining.len(), 2);
    }
}
