//! Embedded preview extraction for camera RAW files
//!
//! Decoding sensor data is out of scope; every RAW format we care about ships a
//! camera-rendered JPEG preview, and that is what thumbnails are built from.

use anyhow::{bail, Context, Result};
use image::{ImageFormat, ImageReader};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, trace};

/// Extracts the encoded preview image embedded in a RAW file.
///
/// Implementations may be slow and are always called off the caller's thread.
pub trait RawDecoder: Send + Sync {
    fn extract_embedded_preview(&self, path: &Path) -> Option<Vec<u8>>;
}

impl<F> RawDecoder for F
where
    F: Fn(&Path) -> Option<Vec<u8>> + Send + Sync,
{
    fn extract_embedded_preview(&self, path: &Path) -> Option<Vec<u8>> {
        self(path)
    }
}

/// Preview extraction through exiftool's binary tag output
#[derive(Debug, Clone)]
pub struct ExiftoolDecoder {
    program: PathBuf,
    tags: Vec<&'static str>,
}

impl ExiftoolDecoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            // Largest useful preview first; JpgFromRaw is full size on some bodies
            tags: vec!["PreviewImage", "JpgFromRaw", "ThumbnailImage"],
        }
    }

    fn extract_tag(&self, path: &Path, tag: &str) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .arg("-b") // Binary output
            .arg(format!("-{}", tag))
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {} on {}", self.program.display(), path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("exiftool failed for {}: {}", path.display(), stderr.trim());
        }

        if output.stdout.is_empty() {
            bail!("No {} found in {}", tag, path.display());
        }

        Ok(output.stdout)
    }
}

impl Default for ExiftoolDecoder {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl RawDecoder for ExiftoolDecoder {
    fn extract_embedded_preview(&self, path: &Path) -> Option<Vec<u8>> {
        for tag in &self.tags {
            match self.extract_tag(path, tag) {
                Ok(data) => {
                    trace!(path = %path.display(), tag, bytes = data.len(), "exiftool preview");
                    return Some(data);
                }
                Err(e) => debug!(path = %path.display(), tag, error = %e, "exiftool extraction failed"),
            }
        }
        None
    }
}

/// Scans the file for embedded JPEG streams and returns the largest readable one.
///
/// Works without external tools, at the cost of reading up to `max_bytes` of the file.
#[derive(Debug, Clone)]
pub struct EmbeddedJpegDecoder {
    max_bytes: usize,
    min_size: usize,
}

const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_CANDIDATES: usize = 16;

impl EmbeddedJpegDecoder {
    pub fn new(max_bytes: usize, min_size: usize) -> Self {
        Self { max_bytes, min_size }
    }

    fn read_head(&self, path: &Path) -> Result<Vec<u8>> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut data = Vec::new();
        file.take(self.max_bytes as u64)
            .read_to_end(&mut data)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(data)
    }

    /// Find `(start, end)` byte ranges that look like complete JPEG streams
    fn candidates(&self, data: &[u8]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut offset = 0;
        // First EOI at or after the previous start; still the first one for any later start before it
        let mut known_eoi: Option<usize> = None;

        while ranges.len() < MAX_CANDIDATES {
            let Some(start) = find(&data[offset..], &JPEG_SOI).map(|pos| offset + pos) else {
                break;
            };
            let eoi = match known_eoi {
                Some(pos) if pos >= start => Some(pos),
                _ => find(&data[start..], &JPEG_EOI).map(|pos| start + pos),
            };
            // No EOI left, so no later SOI can complete either
            let Some(eoi) = eoi else {
                break;
            };
            known_eoi = Some(eoi);

            let end = eoi + JPEG_EOI.len();
            if end - start >= self.min_size {
                ranges.push((start, end));
            }
            offset = start + 1;
        }

        ranges
    }
}

impl Default for EmbeddedJpegDecoder {
    fn default() -> Self {
        Self::new(32 * 1024 * 1024, 10_000)
    }
}

impl RawDecoder for EmbeddedJpegDecoder {
    fn extract_embedded_preview(&self, path: &Path) -> Option<Vec<u8>> {
        let data = match self.read_head(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Embedded JPEG scan failed");
                return None;
            }
        };

        let mut ranges = self.candidates(&data);
        ranges.sort_by_key(|(start, end)| std::cmp::Reverse(end - start));

        ranges.into_iter().find_map(|(start, end)| {
            let jpeg = &data[start..end];
            let readable = ImageReader::with_format(Cursor::new(jpeg), ImageFormat::Jpeg)
                .into_dimensions()
                .is_ok();
            readable.then(|| jpeg.to_vec())
        })
    }
}

/// Tries each decoder in order; the first preview wins
#[derive(Clone)]
pub struct DecoderChain {
    decoders: Vec<Arc<dyn RawDecoder>>,
}

impl DecoderChain {
    pub fn new(decoders: Vec<Arc<dyn RawDecoder>>) -> Self {
        Self { decoders }
    }
}

impl Default for DecoderChain {
    /// exiftool when installed, the byte scanner otherwise
    fn default() -> Self {
        Self::new(vec![
            Arc::new(ExiftoolDecoder::default()),
            Arc::new(EmbeddedJpegDecoder::default()),
        ])
    }
}

impl RawDecoder for DecoderChain {
    fn extract_embedded_preview(&self, path: &Path) -> Option<Vec<u8>> {
        self.decoders
            .iter()
            .find_map(|decoder| decoder.extract_embedded_preview(path))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
