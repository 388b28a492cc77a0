//! Application layer with caller-side services.

/// Services layered over the load manager.
pub mod services;

pub use services::RetryPolicy;
