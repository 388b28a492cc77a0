//! Domain layer with core entities, errors, and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Encoded image format detection.
pub mod format;
/// Port definitions.
pub mod ports;

pub use entities::{Bitmap, CacheKey, CachePolicy, ImageResponse, ImageSource, Priority, Request};
pub use errors::{FetchError, LoadError, TransformError};
pub use format::ImageFormat;
pub use ports::{Fetcher, Transform};
