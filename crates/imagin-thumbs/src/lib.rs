//! Asynchronous thumbnail cache and generation pipeline for Imagin Bridge
//!
//! This crate turns an image or camera-RAW file path into a bounded-size preview,
//! serving requests from an in-memory LRU cache, a persistent on-disk JPEG cache,
//! or on-demand generation. Requests for the same file are coalesced, visible
//! thumbnails are scheduled ahead of background prefetch, and unstarted work can
//! be cancelled while the user scrolls.
//!
//! # Features
//!
//! - **Two-tier caching**: counted LRU in memory + JPEG files on disk, partitioned per folder
//! - **Priority scheduling**: High (visible), Medium (near viewport), Low (prefetch)
//! - **Coalescing and cancellation**: one active request per file, best-effort cancel
//! - **RAW support**: embedded preview extraction through a pluggable [`RawDecoder`]
//! - **Main-thread delivery**: completions routed through a [`Dispatcher`]

pub mod dispatch;
pub mod disk;
pub mod generate;
pub mod memory;
pub mod raw;
pub mod scheduler;
pub mod service;

pub use dispatch::{main_thread_queue, Dispatcher, InlineDispatcher, MainThreadDispatcher, MainThreadQueue};
pub use disk::{DiskCache, DiskUsage};
pub use generate::{is_raw_file, resize_to_fit, ThumbnailGenerator, RAW_EXTENSIONS};
pub use memory::MemoryCache;
pub use raw::{DecoderChain, EmbeddedJpegDecoder, ExiftoolDecoder, RawDecoder};
pub use scheduler::{RequestHandler, RequestScheduler, SubmitOutcome, ThumbnailRequest};
pub use service::{CacheStats, ThumbnailLookup, ThumbnailService};

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A decoded, size-bounded thumbnail shared between the cache and callers
pub type Thumbnail = Arc<DynamicImage>;

/// Completion callback for an asynchronous thumbnail request
pub type Completion = Box<dyn FnOnce(Option<Thumbnail>) + Send + 'static>;

/// Standard configuration for the thumbnail pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Longest edge of a generated thumbnail, in pixels
    pub max_dimension: u32,
    /// JPEG quality used for the disk cache (1-100)
    pub jpeg_quality: u8,
    /// Maximum number of decoded thumbnails kept in memory
    pub memory_capacity: usize,
    /// Pause after each serviced request so bursty scrolling doesn't starve the UI
    pub throttle_ms: u64,
    /// Disk cache root; `None` uses the platform cache directory
    pub cache_root: Option<PathBuf>,
    /// Folder name under the platform cache directory
    pub app_id: String,
    /// Deliver the winning result to callers whose request was coalesced or preempted
    pub notify_superseded: bool,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_dimension: 256,
            jpeg_quality: 80,
            memory_capacity: 200,
            throttle_ms: 10,
            cache_root: None,
            app_id: "ro.imagin.Bridge-Replacement".to_string(),
            notify_superseded: false,
        }
    }
}

impl ThumbnailConfig {
    /// Resolve the disk cache root: `<cache_dir>/<app_id>/<max_dimension>` unless overridden
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(root) = &self.cache_root {
            return Ok(root.clone());
        }
        let base = dirs::cache_dir().context("Unable to find platform cache directory")?;
        Ok(base.join(&self.app_id).join(self.max_dimension.to_string()))
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

/// Scheduling priority of a thumbnail request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Background prefetch
    Low = 1,
    /// Near the viewport
    #[default]
    Medium = 2,
    /// Currently visible
    High = 3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => bail!("Invalid priority: {}. Valid options: low, medium, high", s),
        }
    }
}

/// Identifies one logical thumbnail.
///
/// The file name alone collides for same-named files in different folders, so the
/// key also carries the folder partition `<dirName>_<hash>` used by the disk cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    partition: String,
    file_name: String,
}

impl CacheKey {
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let dir_name = parent
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());

        Self {
            partition: format!("{}_{}", dir_name, directory_hash(parent)),
            file_name,
        }
    }

    /// Disk cache subdirectory for the source file's folder
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Original file name, used as the disk cache file stem
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.file_name)
    }
}

/// Stable 8-hex-character hash of a directory path (SHA-256 prefix)
pub fn directory_hash(dir: &Path) -> String {
    let digest = Sha256::digest(dir.to_string_lossy().as_bytes());
    hex::encode(&digest[..4])
}
