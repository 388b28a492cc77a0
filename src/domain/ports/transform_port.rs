//! Port definition for bitmap transforms.

use crate::domain::errors::TransformError;

/// A pure bitmap-to-bitmap operation applied after decoding.
pub trait Transform: Send + Sync {
    /// Stable identifier encoding every parameter that affects the output.
    /// Contributes to the cache key.
    fn identifier(&self) -> String;

    /// Applies the transform.
    ///
    /// # Errors
    /// Returns error if the transform cannot be applied to this image.
    fn process(&self, image: image::DynamicImage) -> Result<image::DynamicImage, TransformError>;
}
