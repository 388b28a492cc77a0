mod fetcher_port;
mod transform_port;

pub use fetcher_port::Fetcher;
pub use transform_port::Transform;

#[cfg(test)]
pub use fetcher_port::MockFetcher;

#[cfg(test)]
pub mod mock {
    pub use super::fetcher_port::mock::{StubFetcher, png_bytes};
    pub use super::transform_port::mock::{BlockingTransform, FailingTransform, TagTransform};
}
