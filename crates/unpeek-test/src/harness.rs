//! Test harness helpers.

use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};
use tracing_subscriber::EnvFilter;
use unpeek_channel::{EventChannel, InlineDispatcher};

/// Create a temporary directory, removed when dropped.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created.
#[must_use]
pub fn test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Create a temporary file with the given content.
///
/// # Panics
///
/// Panics if the file cannot be created or written.
#[must_use]
pub fn test_file(content: &str) -> NamedTempFile {
    write_temp(tempfile::Builder::new(), content)
}

/// Create a temporary `.toml` config file with the given content.
///
/// # Panics
///
/// Panics if the file cannot be created or written.
#[must_use]
pub fn config_file(content: &str) -> NamedTempFile {
    let mut builder = tempfile::Builder::new();
    builder.suffix(".toml");
    write_temp(builder, content)
}

fn write_temp(builder: tempfile::Builder<'_, '_>, content: &str) -> NamedTempFile {
    use std::io::Write;

    let mut file = builder.tempfile().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file.flush().expect("Failed to flush temp file");
    file
}

/// A sticky channel that runs everything on the calling thread.
#[must_use]
pub fn inline_channel<T: Clone + Send + 'static>() -> EventChannel<T> {
    EventChannel::new(Arc::new(InlineDispatcher))
}

/// A non-sticky channel that runs everything on the calling thread.
#[must_use]
pub fn inline_non_sticky_channel<T: Clone + Send + 'static>() -> EventChannel<T> {
    EventChannel::non_sticky(Arc::new(InlineDispatcher))
}

/// Set up test logging with the given filter.
///
/// Output goes through the test writer, so it is only shown for failing
/// tests. Safe to call from every test; only the first call installs.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

/// Set up test logging with channel tracing enabled.
pub fn setup_test_logging_default() {
    setup_test_logging("warn,unpeek_channel=trace");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_file() {
        let file = test_file("hello world");
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_config_file_has_toml_extension() {
        let file = config_file("[logging]\nlevel = \"debug\"\n");
        assert!(file.path().to_string_lossy().ends_with(".toml"));
    }

    #[test]
    fn test_inline_channels() {
        setup_test_logging_default();
        assert!(inline_channel::<u8>().is_sticky());
        assert!(!inline_non_sticky_channel::<u8>().is_sticky());
        assert!(test_dir().path().exists());
    }
}
