#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for unpeek event channels.
//!
//! # Usage
//!
//! ```rust,no_run
//! use unpeek_config::Config;
//!
//! let config = Config::load(Some(std::path::Path::new("unpeek.toml"))).unwrap();
//! println!("toast channel sticky: {}", config.channel("toast").sticky);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Config file** passed to [`Config::load`]
//! 2. **Environment variables** (`UNPEEK_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! This crate has **no dependencies on other internal unpeek crates**.
//! Conversion into channel and logging types happens in bridge modules in
//! the consuming crates, behind their `config` features.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load configuration from defaults, `file` and `UNPEEK_*` env vars.
    ///
    /// See [`loader::load`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed or the final
    /// configuration fails validation.
    pub fn load(file: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(file)
    }

    /// Parse configuration from a TOML string on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the string is malformed or invalid.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        loader::load_str(content)
    }
}
