//! Thumbnail generation from standard images and camera RAW files
//!
//! RAW files are recognised by extension and handed to a [`RawDecoder`] that pulls
//! out the camera's embedded preview; everything else is decoded directly with the
//! `image` crate. Either way the result is scaled to fit a square bound.

use crate::raw::RawDecoder;
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Camera RAW extensions, lowercase
pub const RAW_EXTENSIONS: &[&str] = &[
    "arw", "orf", "rw2", "cr2", "cr3", "crw", "nef", "nrw", "srf", "sr2", "raw", "raf", "pef",
    "ptx", "dng", "3fr", "fff", "iiq", "mef", "mos", "x3f", "srw", "dcr", "kdc", "k25", "kc2",
    "mrw", "erf", "bay", "ndd", "sti", "rwl", "r3d",
];

/// Check whether a file is a camera RAW format by extension (case-insensitive)
pub fn is_raw_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RAW_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Produces size-bounded thumbnails from source files
#[derive(Clone)]
pub struct ThumbnailGenerator {
    raw_decoder: Arc<dyn RawDecoder>,
    max_dimension: u32,
}

impl ThumbnailGenerator {
    pub fn new(raw_decoder: Arc<dyn RawDecoder>, max_dimension: u32) -> Self {
        Self {
            raw_decoder,
            max_dimension,
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Generate a thumbnail, or `None` if the source can't be decoded
    pub fn generate(&self, source: &Path) -> Option<DynamicImage> {
        match self.decode_source(source) {
            Ok(img) => {
                let (width, height) = img.dimensions();
                let thumbnail = resize_to_fit(&img, self.max_dimension);
                debug!(
                    path = %source.display(),
                    from = ?(width, height),
                    to = ?thumbnail.dimensions(),
                    "Generated thumbnail"
                );
                Some(thumbnail)
            }
            Err(e) => {
                warn!(path = %source.display(), error = %format!("{:#}", e), "Thumbnail generation failed");
                None
            }
        }
    }

    fn decode_source(&self, source: &Path) -> Result<DynamicImage> {
        if is_raw_file(source) {
            debug!(path = %source.display(), "Extracting embedded preview from RAW file");
            let preview = self
                .raw_decoder
                .extract_embedded_preview(source)
                .with_context(|| format!("No embedded preview in {}", source.display()))?;

            image::load_from_memory(&preview)
                .with_context(|| format!("Failed to decode embedded preview for {}", source.display()))
        } else {
            ImageReader::open(source)
                .with_context(|| format!("Failed to open {}", source.display()))?
                .with_guessed_format()?
                .decode()
                .with_context(|| format!("Failed to decode {}", source.display()))
        }
    }
}

impl fmt::Debug for ThumbnailGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailGenerator")
            .field("max_dimension", &self.max_dimension)
            .finish()
    }
}

/// Scale an image to fit within `max_dimension` x `max_dimension`, preserving aspect ratio.
///
/// Both axes use `min(max/width, max/height)`, so small images are scaled up too.
pub fn resize_to_fit(img: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let scale = f64::min(
        max_dimension as f64 / width as f64,
        max_dimension as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_dimension.max(1));
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dimension.max(1));

    if (new_width, new_height) == (width, height) {
        return img.clone();
    }

    img.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Encode image as JPEG with specified quality
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .context("Failed to encode JPEG")?;
    Ok(buffer)
}
