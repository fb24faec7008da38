//! Batchline Common Library
//!
//! Shared error handling and logging bootstrap for the batchline workspace.
//!
//! # Overview
//!
//! This crate provides the pieces every workspace member needs:
//!
//! - **Error Handling**: the `BatchlineError` type and `Result` alias
//! - **Logging**: tracing subscriber initialization driven by `LogConfig`
//!
//! # Example
//!
//! ```no_run
//! use batchline_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("batchline starting");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{BatchlineError, Result};
