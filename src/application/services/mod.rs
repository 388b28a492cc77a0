//! Services layered over the load manager.

/// Bounded retry around loads.
pub mod retry;

pub use retry::RetryPolicy;
