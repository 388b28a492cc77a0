//! Domain entity definitions.

mod image;
mod request;

pub use image::{Bitmap, ImageResponse, ImageSource, bitmap_cost, memory_footprint};
pub use request::{CacheKey, CachePolicy, KEY_SEPARATOR, Priority, Request};
