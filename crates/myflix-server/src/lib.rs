//! MyFlix server: process setup shared by the binaries.

/// Composition root and background tasks.
pub mod app;
/// Redacting log setup.
pub mod logging;
