//! Layered configuration loading.
//!
//! 1. Parse the embedded `defaults.toml` → base
//! 2. Merge the config file, if one was given and exists
//! 3. Apply `UNPEEK_*` env var fallbacks for fields the file left unset
//! 4. Deserialize and validate

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum accepted config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load configuration from defaults, `file` and the process environment.
///
/// A missing file is skipped, not an error.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable or malformed, an env
/// var has the wrong type, or the result fails validation.
pub fn load(file: Option<&Path>) -> ConfigResult<Config> {
    load_with_env(file, &collect_env_vars())
}

/// Like [`load`], with an explicit environment.
///
/// # Errors
///
/// As for [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    file: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let overlay = match file {
        Some(path) => try_load_file(path)?,
        None => None,
    };
    if let (Some(overlay), Some(path)) = (&overlay, file) {
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded config file");
    }

    let env_count = apply_env_fallbacks(&mut merged, overlay.as_ref(), env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    finish(merged, "<merged config>")
}

/// Parse a config from a TOML string on top of the defaults.
///
/// The environment is not consulted.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the string is malformed or fails validation.
pub fn load_str(content: &str) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let overlay: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: "<string>".to_owned(),
        source: e,
    })?;
    deep_merge(&mut merged, &overlay);
    finish(merged, "<string>")
}

fn finish(merged: toml::Value, label: &str) -> ConfigResult<Config> {
    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: label.to_owned(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per field; scalars and arrays from the overlay replace the
/// base value.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config = load_with_env(None, &no_env()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with_env(Some(&dir.path().join("absent.toml")), &no_env()).unwrap();
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_layer_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[logging]\nformat = \"json\"\n\n[channels.toast]\nsticky = false"
        )
        .unwrap();

        let config = load_with_env(Some(file.path()), &no_env()).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(!config.channel("toast").sticky);
    }

    #[test]
    fn test_env_applies_only_where_file_is_silent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"").unwrap();
        let env: HashMap<String, String> = [
            ("UNPEEK_LOG_LEVEL".to_owned(), "trace".to_owned()),
            ("UNPEEK_LOG_FORMAT".to_owned(), "pretty".to_owned()),
        ]
        .into_iter()
        .collect();

        let config = load_with_env(Some(file.path()), &env).unwrap();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging\nlevel = ").unwrap();
        let err = load_with_env(Some(file.path()), &no_env()).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => {
                assert_eq!(path, file.path().display().to_string());
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_value_fails_validation() {
        let err = load_str("[logging]\nlevel = \"loud\"").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = load_str("[context]\nqueue_warn_threshold = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
