//! Unpeek Telemetry - logging setup for unpeek event channels.
//!
//! Channels log through `tracing`: `trace!` per delivery, `debug!` on
//! registration and teardown, `warn!` on replaced callbacks, dropped async
//! writes and protocol violations. This crate installs a subscriber for them.
//!
//! # Example
//!
//! ```rust,no_run
//! use unpeek_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), unpeek_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Pretty)
//!     .with_channel_tracing();
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

#[cfg(feature = "config")]
mod config_bridge;
mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    CHANNEL_TARGET, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
