//! MyFlix core library.
//!
//! Catalog model, caption parsing, channel access, snapshot cache, range
//! streaming and rate limiting, independent of any transport or web stack.

/// Snapshot persistence and cache-first catalog access.
pub mod cache;
/// Caption parsing.
pub mod caption;
/// Catalog records.
pub mod catalog;
/// Configuration management.
pub mod config;
/// Per-client rate limiting.
pub mod ratelimit;
/// Channel client seam and catalog source.
pub mod source;
/// Range-aware media streaming.
pub mod streaming;
/// Temp directory housekeeping.
pub mod temp;
/// Utility functions.
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
