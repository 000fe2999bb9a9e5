//! Runtime settings.
//!
//! Pure data; argument parsing lives in the CLI crate and hands a
//! [`Settings`] value to the library.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::pipe;

/// Log verbosity. `Fatal` exists for compatibility with the catalog
/// service's level names and behaves like `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Catalog service host.
    pub host: String,
    /// Catalog service port.
    pub port: u16,
    /// API key passed to the catalog service.
    pub api_key: String,
    /// Where the FUSE tree is exposed.
    pub mount_point: PathBuf,
    /// Root for user-created files.
    pub cache_dir: PathBuf,
    /// Profile filter passed through to the catalog service.
    pub stream_group_profile_ids: String,
    /// Request the short catalog form.
    pub is_short: bool,
    /// File suffixes (without dot) exposed by directory listings.
    pub enabled_types: HashSet<String>,
    pub log_level: LogLevel,
    /// Log file location.
    pub log_file: PathBuf,
    /// Stream pipe capacity in bytes.
    pub pipe_capacity: usize,
}

impl Settings {
    pub fn default_enabled_types() -> HashSet<String> {
        ["xml", "m3u", "strm"].iter().map(|s| s.to_string()).collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7095,
            api_key: String::new(),
            mount_point: PathBuf::from("/mnt/smfs"),
            cache_dir: PathBuf::from("/tmp/smfs_storage"),
            stream_group_profile_ids: "0".to_string(),
            is_short: true,
            enabled_types: Self::default_enabled_types(),
            log_level: LogLevel::Info,
            log_file: PathBuf::from("logs/smfs.log"),
            pipe_capacity: pipe::DEFAULT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/smfs_storage"));
        assert_eq!(settings.enabled_types, Settings::default_enabled_types());
        assert!(settings.is_short);
        assert_eq!(settings.pipe_capacity, 4 * 1024 * 1024);
    }

    #[test]
    fn fatal_filters_like_error() {
        assert_eq!(LogLevel::Fatal.as_filter(), "error");
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
    }
}
