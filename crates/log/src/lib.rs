//! Dualslot Log
//!
//! Subscriber setup shared by the dualslot binaries. Everything goes to
//! stderr so stdout stays free for machine-readable reports.
//!
//! ```rust,no_run
//! use dualslot_log::{Config, LoggerBuilder};
//!
//! let _guard = LoggerBuilder::from_config(Config::from_env()).build()?;
//! tracing::info!("ready");
//! # Ok::<(), dualslot_log::LogError>(())
//! ```
#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, DisplayConfig, Format};
pub use error::{LogError, LogResult};

/// Initialize logging from the environment
///
/// # Errors
///
/// See [`LoggerBuilder::build`].
pub fn auto_init() -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(Config::from_env()).build()
}
