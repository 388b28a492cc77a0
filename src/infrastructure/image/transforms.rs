//! Built-in bitmap transforms.

use bitflags::bitflags;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::domain::errors::TransformError;
use crate::domain::ports::Transform;

/// How `Resize` maps the source onto the target box.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Scale to cover the box, cropping the overflow.
    #[default]
    Fill,
    /// Scale to fit inside the box, padding with transparency.
    Fit,
    /// Scale each axis independently.
    Stretch,
}

impl std::fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fill => "fill",
            Self::Fit => "fit",
            Self::Stretch => "stretch",
        })
    }
}

/// Resizes to an exact output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    width: u32,
    height: u32,
    mode: ResizeMode,
}

impl Resize {
    /// Creates a resize to `width` x `height`.
    #[must_use]
    pub const fn new(width: u32, height: u32, mode: ResizeMode) -> Self {
        Self {
            width,
            height,
            mode,
        }
    }

    /// Fill-mode resize.
    #[must_use]
    pub const fn fill(width: u32, height: u32) -> Self {
        Self::new(width, height, ResizeMode::Fill)
    }
}

impl Transform for Resize {
    fn identifier(&self) -> String {
        format!("resize_{}x{}_{}", self.width, self.height, self.mode)
    }

    fn process(&self, image: DynamicImage) -> Result<DynamicImage, TransformError> {
        if self.width == 0 || self.height == 0 {
            return Err(TransformError::invalid(
                "resize",
                format!("target size {}x{} has a zero dimension", self.width, self.height),
            ));
        }

        Ok(match self.mode {
            ResizeMode::Fill => image.resize_to_fill(self.width, self.height, FilterType::Lanczos3),
            ResizeMode::Stretch => image.resize_exact(self.width, self.height, FilterType::Lanczos3),
            ResizeMode::Fit => {
                let scaled = image.resize(self.width, self.height, FilterType::Lanczos3);
                let mut canvas = RgbaImage::new(self.width, self.height);
                let x = (self.width - scaled.width()) / 2;
                let y = (self.height - scaled.height()) / 2;
                imageops::overlay(&mut canvas, &scaled.to_rgba8(), i64::from(x), i64::from(y));
                DynamicImage::ImageRgba8(canvas)
            }
        })
    }
}

/// Gaussian blur.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blur {
    sigma: f32,
}

impl Blur {
    /// Creates a blur with standard deviation `sigma`.
    #[must_use]
    pub const fn new(sigma: f32) -> Self {
        Self { sigma }
    }
}

impl Transform for Blur {
    fn identifier(&self) -> String {
        format!("blur_{}", self.sigma)
    }

    fn process(&self, image: DynamicImage) -> Result<DynamicImage, TransformError> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(TransformError::invalid(
                "blur",
                format!("sigma must be a non-negative number, got {}", self.sigma),
            ));
        }
        if self.sigma == 0.0 {
            return Ok(image);
        }
        Ok(image.blur(self.sigma))
    }
}

bitflags! {
    /// Set of corners to round.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Corners: u8 {
        /// Top-left corner.
        const TOP_LEFT = 1;
        /// Top-right corner.
        const TOP_RIGHT = 1 << 1;
        /// Bottom-left corner.
        const BOTTOM_LEFT = 1 << 2;
        /// Bottom-right corner.
        const BOTTOM_RIGHT = 1 << 3;
        /// All four corners.
        const ALL = Self::TOP_LEFT.bits()
            | Self::TOP_RIGHT.bits()
            | Self::BOTTOM_LEFT.bits()
            | Self::BOTTOM_RIGHT.bits();
    }
}

/// Clips the selected corners to quarter circles of `radius` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundedCorners {
    radius: u32,
    corners: Corners,
}

impl RoundedCorners {
    /// Rounds every corner.
    #[must_use]
    pub const fn new(radius: u32) -> Self {
        Self::with_corners(radius, Corners::ALL)
    }

    /// Rounds only `corners`.
    #[must_use]
    pub const fn with_corners(radius: u32, corners: Corners) -> Self {
        Self { radius, corners }
    }
}

impl Transform for RoundedCorners {
    fn identifier(&self) -> String {
        format!("rounded_{}_{}", self.radius, self.corners.bits())
    }

    fn process(&self, image: DynamicImage) -> Result<DynamicImage, TransformError> {
        let (width, height) = image.dimensions();
        let radius = self.radius.min(width / 2).min(height / 2);
        if radius == 0 || self.corners.is_empty() {
            return Ok(image);
        }

        let mut pixels = image.to_rgba8();
        let r = f64::from(radius);

        // (corner, x range start, y range start, circle centre)
        let regions = [
            (Corners::TOP_LEFT, 0, 0, (r, r)),
            (Corners::TOP_RIGHT, width - radius, 0, (f64::from(width) - r, r)),
            (Corners::BOTTOM_LEFT, 0, height - radius, (r, f64::from(height) - r)),
            (
                Corners::BOTTOM_RIGHT,
                width - radius,
                height - radius,
                (f64::from(width) - r, f64::from(height) - r),
            ),
        ];

        for (corner, x0, y0, (cx, cy)) in regions {
            if !self.corners.contains(corner) {
                continue;
            }
            for y in y0..y0 + radius {
                for x in x0..x0 + radius {
                    let dx = f64::from(x) + 0.5 - cx;
                    let dy = f64::from(y) + 0.5 - cy;
                    if dx.hypot(dy) > r {
                        pixels.get_pixel_mut(x, y).0[3] = 0;
                    }
                }
            }
        }

        Ok(DynamicImage::ImageRgba8(pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use test_case::test_case;

    fn opaque(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255])))
    }

    #[test_case(ResizeMode::Fill ; "fill")]
    #[test_case(ResizeMode::Fit ; "fit")]
    #[test_case(ResizeMode::Stretch ; "stretch")]
    fn test_resize_output_matches_target(mode: ResizeMode) {
        let out = Resize::new(40, 20, mode).process(opaque(100, 100)).unwrap();
        assert_eq!(out.dimensions(), (40, 20));
    }

    #[test]
    fn test_resize_fit_pads_with_transparency() {
        let out = Resize::new(40, 20, ResizeMode::Fit)
            .process(opaque(100, 100))
            .unwrap()
            .to_rgba8();

        assert_eq!(out.get_pixel(0, 10).0[3], 0);
        assert_eq!(out.get_pixel(20, 10).0[3], 255);
    }

    #[test]
    fn test_resize_zero_dimension_fails() {
        let result = Resize::fill(0, 10).process(opaque(4, 4));
        assert!(matches!(result, Err(TransformError::InvalidParameter { .. })));
    }

    #[test]
    fn test_identifiers_encode_parameters() {
        assert_eq!(Resize::fill(100, 100).identifier(), "resize_100x100_fill");
        assert_eq!(Resize::new(100, 50, ResizeMode::Fit).identifier(), "resize_100x50_fit");
        assert_eq!(Blur::new(2.5).identifier(), "blur_2.5");
        assert_eq!(RoundedCorners::new(10).identifier(), "rounded_10_15");
        assert_eq!(
            RoundedCorners::with_corners(10, Corners::TOP_LEFT | Corners::TOP_RIGHT).identifier(),
            "rounded_10_3"
        );
        assert_ne!(Blur::new(2.0).identifier(), Blur::new(3.0).identifier());
    }

    #[test_case(-1.0 ; "negative")]
    #[test_case(f32::NAN ; "nan")]
    #[test_case(f32::INFINITY ; "infinite")]
    fn test_blur_rejects_bad_sigma(sigma: f32) {
        assert!(Blur::new(sigma).process(opaque(4, 4)).is_err());
    }

    #[test]
    fn test_blur_keeps_dimensions() {
        let out = Blur::new(1.5).process(opaque(16, 12)).unwrap();
        assert_eq!(out.dimensions(), (16, 12));
    }

    #[test]
    fn test_rounded_corners_clears_outer_pixels() {
        let out = RoundedCorners::new(8).process(opaque(32, 32)).unwrap().to_rgba8();

        for (x, y) in [(0, 0), (31, 0), (0, 31), (31, 31)] {
            assert_eq!(out.get_pixel(x, y).0[3], 0, "corner ({x}, {y})");
        }
        assert_eq!(out.get_pixel(16, 16).0[3], 255);
        assert_eq!(out.get_pixel(16, 0).0[3], 255);
        assert_eq!(out.get_pixel(7, 7).0[3], 255);
    }

    #[test]
    fn test_rounded_corners_subset() {
        let out = RoundedCorners::with_corners(8, Corners::TOP_LEFT)
            .process(opaque(32, 32))
            .unwrap()
            .to_rgba8();

        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(31, 0).0[3], 255);
        assert_eq!(out.get_pixel(31, 31).0[3], 255);
    }

    #[test]
    fn test_rounded_radius_clamped_to_half_size() {
        let out = RoundedCorners::new(1_000).process(opaque(10, 10)).unwrap();
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(out.to_rgba8().get_pixel(5, 5).0[3], 255);
    }
}
