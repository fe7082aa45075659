//! Configuration struct definitions.
//!
//! Every section derives `Default` and uses `#[serde(default)]`, so a config
//! file only needs to name the fields it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging and tracing.
    pub logging: LoggingSection,
    /// Designated execution context.
    pub context: ContextSection,
    /// Per-channel settings, keyed by channel name.
    pub channels: BTreeMap<String, ChannelSection>,
}

impl Config {
    /// Settings for the channel `name`, falling back to defaults.
    #[must_use]
    pub fn channel(&self, name: &str) -> ChannelSection {
        self.channels.get(name).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["unpeek_channel=trace"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextSection
// ---------------------------------------------------------------------------

/// Designated execution context configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// Queue depth at which the context logs a backlog warning.
    pub queue_warn_threshold: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            queue_warn_threshold: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelSection
// ---------------------------------------------------------------------------

/// Settings for one named event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSection {
    /// Whether late subscribers receive the latest unconsumed emission.
    pub sticky: bool,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self { sticky: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [logging]
            level = "debug"

            [channels.toast]
            sticky = false
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.context.queue_warn_threshold, 1024);
        assert!(!config.channel("toast").sticky);
        assert!(config.channel("unknown").sticky);
    }
}
