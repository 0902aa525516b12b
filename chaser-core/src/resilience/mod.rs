//! Reconnect and retry primitives

pub mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};
