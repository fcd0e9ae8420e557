//! Thumbnail service: the entry point for UI code
//!
//! Resolves a path to a thumbnail from memory when possible and otherwise hands
//! the request to the scheduler, whose handler checks the disk cache, falls back to
//! generation, and populates both cache tiers on success.

use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::disk::DiskCache;
use crate::generate::ThumbnailGenerator;
use crate::memory::MemoryCache;
use crate::raw::{DecoderChain, RawDecoder};
use crate::scheduler::{RequestHandler, RequestScheduler, ThumbnailRequest};
use crate::{CacheKey, Priority, Thumbnail, ThumbnailConfig};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

/// Result of a [`ThumbnailService::request`] call
#[derive(Debug, Clone)]
pub enum ThumbnailLookup {
    /// Served from memory; the completion will not be called
    Cached(Thumbnail),
    /// Scheduled; the completion fires later unless the request is superseded or cancelled
    Queued,
}

impl ThumbnailLookup {
    pub fn cached(self) -> Option<Thumbnail> {
        match self {
            ThumbnailLookup::Cached(image) => Some(image),
            ThumbnailLookup::Queued => None,
        }
    }
}

/// Cache statistics for monitoring and debugging
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub memory_items: usize,
    pub memory_capacity: usize,
    pub pending_requests: usize,
    pub disk_files: usize,
    pub disk_bytes: u64,
}

impl CacheStats {
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_capacity == 0 {
            0.0
        } else {
            (self.memory_items as f64 / self.memory_capacity as f64) * 100.0
        }
    }
}

/// Disk → generate → populate, run on the scheduler's worker
struct ThumbnailPipeline {
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    generator: ThumbnailGenerator,
}

impl RequestHandler for ThumbnailPipeline {
    fn handle(&self, request: &ThumbnailRequest) -> Option<Thumbnail> {
        let key = request.key();

        if let Some(image) = self.disk.load(key) {
            let image = Arc::new(image);
            self.memory.put(key.clone(), Arc::clone(&image));
            return Some(image);
        }

        // Failures aren't cached: the source may become readable later
        let image = self.generator.generate(request.path())?;
        self.disk.store(key, &image);

        let image = Arc::new(image);
        self.memory.put(key.clone(), Arc::clone(&image));
        Some(image)
    }
}

/// Main thumbnail service. Construct once at startup and share by `Arc`.
pub struct ThumbnailService {
    config: ThumbnailConfig,
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    scheduler: RequestScheduler,
}

impl ThumbnailService {
    /// Create a service with the default RAW decoders.
    ///
    /// Completions run inline on the `thumbs-worker` thread, not on the caller's
    /// thread. UI code that must handle results on its own thread should build the
    /// service with [`ThumbnailService::with_parts`] and the dispatcher half of
    /// [`main_thread_queue`](crate::main_thread_queue), then drain the queue from its event loop.
    pub fn new(config: ThumbnailConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(DecoderChain::default()), Arc::new(InlineDispatcher))
    }

    /// Create a service with an explicit RAW decoder and completion dispatcher
    pub fn with_parts(
        config: ThumbnailConfig,
        raw_decoder: Arc<dyn RawDecoder>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        let disk = DiskCache::new(&cache_dir, config.jpeg_quality)?;
        let memory = Arc::new(MemoryCache::new(config.memory_capacity));

        let pipeline = ThumbnailPipeline {
            memory: Arc::clone(&memory),
            disk: disk.clone(),
            generator: ThumbnailGenerator::new(raw_decoder, config.max_dimension),
        };
        let scheduler = RequestScheduler::new(
            Arc::new(pipeline),
            dispatcher,
            config.throttle(),
            config.notify_superseded,
        );

        info!(
            cache_dir = %cache_dir.display(),
            max_dimension = config.max_dimension,
            memory_capacity = config.memory_capacity,
            "Thumbnail service ready"
        );

        Ok(Self {
            config,
            memory,
            disk,
            scheduler,
        })
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// Return the thumbnail from memory, or schedule it and call `completion` later
    pub fn request<F>(&self, path: impl AsRef<Path>, priority: Priority, completion: F) -> ThumbnailLookup
    where
        F: FnOnce(Option<Thumbnail>) + Send + 'static,
    {
        let path = path.as_ref();
        let key = CacheKey::from_path(path);

        if let Some(image) = self.memory.get(&key) {
            return ThumbnailLookup::Cached(image);
        }

        let outcome = self
            .scheduler
            .submit(path.to_path_buf(), key, priority, Box::new(completion));
        trace!(path = %path.display(), %priority, ?outcome, "Thumbnail requested");
        ThumbnailLookup::Queued
    }

    /// Await a thumbnail. Resolves to `None` on failure, cancellation or supersession.
    ///
    /// With a main-thread dispatcher the queue must be drained for this to resolve.
    pub async fn load(&self, path: impl AsRef<Path>, priority: Priority) -> Option<Thumbnail> {
        let (sender, receiver) = oneshot::channel();
        let lookup = self.request(path, priority, move |image| {
            let _ = sender.send(image);
        });

        match lookup {
            ThumbnailLookup::Cached(image) => Some(image),
            ThumbnailLookup::Queued => receiver.await.ok().flatten(),
        }
    }

    /// Memory-only lookup; never touches the disk
    pub fn peek(&self, path: impl AsRef<Path>) -> Option<Thumbnail> {
        self.memory.get(&CacheKey::from_path(path.as_ref()))
    }

    /// Cancel unstarted requests for paths that scrolled out of view
    pub fn cancel<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let keys: Vec<CacheKey> = paths
            .iter()
            .map(|path| CacheKey::from_path(path.as_ref()))
            .collect();
        self.scheduler.cancel(&keys)
    }

    pub fn clear_memory(&self) {
        self.memory.clear();
        debug!("Cleared memory thumbnail cache");
    }

    pub fn clear_disk(&self) -> Result<()> {
        self.disk.clear()?;
        debug!(root = %self.disk.root().display(), "Cleared disk thumbnail cache");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let usage = self.disk.usage();
        CacheStats {
            memory_items: self.memory.len(),
            memory_capacity: self.memory.capacity(),
            pending_requests: self.scheduler.pending_count(),
            disk_files: usage.files,
            disk_bytes: usage.bytes,
        }
    }

    /// Block until every scheduled request has been serviced; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }
}
