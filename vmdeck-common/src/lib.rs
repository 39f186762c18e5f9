//! # vmdeck Common
//!
//! Shared utilities for the vmdeck components.
//!
//! ## Logging
//!
//! ```rust
//! use vmdeck_common::init_logging;
//!
//! // Initialize with level; RUST_LOG overrides it when set
//! init_logging("info").unwrap();
//! tracing::info!(vm = "web-01", "VM started");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
