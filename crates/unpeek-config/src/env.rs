//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override: they only apply to fields that
//! no config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: FieldKind,
}

#[derive(Clone, Copy)]
enum FieldKind {
    String,
    Integer,
    List,
}

/// All supported `UNPEEK_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "UNPEEK_LOG_LEVEL",
        field_path: "logging.level",
        kind: FieldKind::String,
    },
    EnvMapping {
        var_name: "UNPEEK_LOG_FORMAT",
        field_path: "logging.format",
        kind: FieldKind::String,
    },
    EnvMapping {
        var_name: "UNPEEK_LOG_DIRECTIVES",
        field_path: "logging.directives",
        kind: FieldKind::List,
    },
    EnvMapping {
        var_name: "UNPEEK_QUEUE_WARN_THRESHOLD",
        field_path: "context.queue_warn_threshold",
        kind: FieldKind::Integer,
    },
];

/// Snapshot the process environment, keeping only `UNPEEK_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("UNPEEK_"))
        .collect()
}

/// Apply env var fallbacks to every field `file_layer` leaves unset.
///
/// Returns the number of env vars applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a numeric variable does not parse.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    file_layer: Option<&toml::Value>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if file_layer.is_some_and(|layer| contains_path(layer, mapping.field_path)) {
            continue;
        }
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        let value = coerce(mapping, raw)?;
        set_path(merged, mapping.field_path, value);
        count = count.saturating_add(1);
    }

    Ok(count)
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    match mapping.kind {
        FieldKind::String => Ok(toml::Value::String(raw.trim().to_owned())),
        FieldKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| ConfigError::EnvError {
                var_name: mapping.var_name.to_owned(),
                message: format!("expected an integer, got '{raw}': {e}"),
            }),
        FieldKind::List => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
    }
}

fn contains_path(root: &toml::Value, path: &str) -> bool {
    let mut current = root;
    for segment in path.split('.') {
        match current.as_table().and_then(|t| t.get(segment)) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

/// Set a dotted field, creating intermediate tables as needed.
fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn base() -> toml::Value {
        toml::from_str("[logging]\nlevel = \"info\"\n").unwrap()
    }

    #[test]
    fn test_env_fills_unset_field() {
        let mut merged = base();
        let applied = apply_env_fallbacks(
            &mut merged,
            None,
            &env(&[("UNPEEK_LOG_LEVEL", "debug"), ("UNPEEK_QUEUE_WARN_THRESHOLD", "64")]),
        )
        .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["context"]["queue_warn_threshold"].as_integer(), Some(64));
    }

    #[test]
    fn test_file_value_beats_env() {
        let mut merged = base();
        let file: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        let applied = apply_env_fallbacks(
            &mut merged,
            Some(&file),
            &env(&[("UNPEEK_LOG_LEVEL", "debug")]),
        )
        .unwrap();
        assert_eq!(applied, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("info"));
    }

    #[test]
    fn test_directives_split_on_commas() {
        let mut merged = base();
        apply_env_fallbacks(
            &mut merged,
            None,
            &env(&[("UNPEEK_LOG_DIRECTIVES", "unpeek_channel=trace, tokio=warn,")]),
        )
        .unwrap();
        let directives = merged["logging"]["directives"].as_array().unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[1].as_str(), Some("tokio=warn"));
    }

    #[test]
    fn test_bad_integer_is_env_error() {
        let mut merged = base();
        let err = apply_env_fallbacks(
            &mut merged,
            None,
            &env(&[("UNPEEK_QUEUE_WARN_THRESHOLD", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { .. }));
    }
}
