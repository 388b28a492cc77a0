//! imgkit - image loading with request coalescing and two-tier caching.
//!
//! A [`LoadManager`](infrastructure::image::LoadManager) turns a
//! [`Request`](domain::Request) (URL plus ordered transforms) into a bitmap,
//! consulting an in-memory cache, then a disk cache, then the network.
//! Concurrent requests for the same key share one pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing caller-side services.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, fetchers and configuration.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "imgkit";
