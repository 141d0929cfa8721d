//! # vmclone Common
//!
//! Shared utilities for the vmclone crates.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use vmclone_common::{init, LogFormat};
//!
//! init("info", LogFormat::Pretty).unwrap();
//! tracing::info!(vm = "web01", "Cloning");
//! ```

pub mod logging;

// Re-export logging functions
pub use logging::{init, init_logging, init_logging_json, LogFormat};
