//! Persistent JPEG thumbnail store
//!
//! Layout: `<root>/<parentDirName>_<hash>/<fileName>.jpg`. The contents are fully
//! regenerable, so every failure here degrades to a cache miss and nothing is
//! reported to the caller except through logs.

use crate::generate::encode_jpeg;
use crate::CacheKey;
use anyhow::{Context, Result};
use image::DynamicImage;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

/// File count and total size of the disk cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub files: usize,
    pub bytes: u64,
}

/// On-disk thumbnail cache rooted at a single directory
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    jpeg_quality: u8,
}

impl DiskCache {
    /// Open a disk cache, creating the root directory if needed
    pub fn new(root: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory: {}", root.display()))?;
        Ok(Self { root, jpeg_quality })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the thumbnail for `key` lives on disk
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.partition())
            .join(format!("{}.jpg", key.file_name()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Load and decode a cached thumbnail. Missing, unreadable or corrupt files are a miss.
    pub fn load(&self, key: &CacheKey) -> Option<DynamicImage> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(_) => {
                trace!(key = %key, "Disk cache miss");
                return None;
            }
        };

        match image::load_from_memory(&data) {
            Ok(img) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(img)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache file, treating as miss");
                None
            }
        }
    }

    /// Encode and write a thumbnail. Failures are logged and dropped.
    pub fn store(&self, key: &CacheKey, image: &DynamicImage) {
        if let Err(e) = self.try_store(key, image) {
            warn!(key = %key, error = %format!("{:#}", e), "Failed to write disk cache");
        }
    }

    fn try_store(&self, key: &CacheKey, image: &DynamicImage) -> Result<PathBuf> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .context("Cache path has no parent directory")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let data = encode_jpeg(image, self.jpeg_quality)?;

        // Write beside the target and rename, so readers never see a partial file
        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        temp.write_all(&data)
            .context("Failed to write thumbnail data")?;
        temp.persist(&path)
            .with_context(|| format!("Failed to move thumbnail into {}", path.display()))?;

        debug!(key = %key, bytes = data.len(), "Stored thumbnail on disk");
        Ok(path)
    }

    /// Remove a single cached thumbnail
    pub fn remove(&self, key: &CacheKey) -> bool {
        fs::remove_file(self.path_for(key)).is_ok()
    }

    /// Delete everything and recreate an empty root
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove cache directory: {}", self.root.display()))?;
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to recreate cache directory: {}", self.root.display()))?;
        Ok(())
    }

    /// Count cached files and their total size
    pub fn usage(&self) -> DiskUsage {
        let mut usage = DiskUsage::default();
        accumulate_usage(&self.root, &mut usage);
        usage
    }
}

fn accumulate_usage(dir: &Path, usage: &mut DiskUsage) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            accumulate_usage(&path, usage);
        } else if let Ok(metadata) = entry.metadata() {
            usage.files += 1;
            usage.bytes += metadata.len();
        }
    }
}
