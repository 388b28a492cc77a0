//! Domain types for decoded images and load results.

use std::sync::Arc;

use serde::Serialize;

use super::CacheKey;
use crate::domain::format::ImageFormat;

/// A decoded bitmap shared between caches and waiters.
pub type Bitmap = Arc<image::DynamicImage>;

/// Approximate memory footprint of a `width` x `height` RGBA bitmap.
#[must_use]
pub const fn memory_footprint(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * 4
}

/// Memory-cache cost of a decoded bitmap.
#[must_use]
pub fn bitmap_cost(image: &image::DynamicImage) -> u64 {
    memory_footprint(image.width(), image.height())
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    /// Loaded from the in-memory cache.
    #[serde(rename = "memory")]
    MemoryCache,
    /// Loaded from the disk cache.
    #[serde(rename = "disk")]
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

/// A successfully loaded image, delivered to every waiter of a task.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    /// Cache key the image was loaded under.
    pub key: CacheKey,
    /// The final bitmap, after all transforms.
    pub image: Bitmap,
    /// Which tier produced the image.
    pub source: ImageSource,
    /// Encoded format of the source bytes, when they were inspected.
    pub format: Option<ImageFormat>,
}

impl ImageResponse {
    /// Creates a response without format information.
    #[must_use]
    pub const fn new(key: CacheKey, image: Bitmap, source: ImageSource) -> Self {
        Self {
            key,
            image,
            source,
            format: None,
        }
    }

    /// Attaches the detected source format.
    #[must_use]
    pub const fn with_format(mut self, format: Option<ImageFormat>) -> Self {
        self.format = format;
        self
    }

    /// Width of the delivered bitmap.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height of the delivered bitmap.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_footprint() {
        assert_eq!(memory_footprint(100, 50), 20_000);
        assert_eq!(memory_footprint(0, 50), 0);
    }

    #[test]
    fn test_footprint_does_not_overflow_u32() {
        assert_eq!(memory_footprint(65_536, 65_536), 17_179_869_184);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ImageSource::MemoryCache.to_string(), "memory");
        assert_eq!(ImageSource::DiskCache.to_string(), "disk");
        assert_eq!(ImageSource::Network.to_string(), "network");
    }
}
