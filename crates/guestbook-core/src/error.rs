//! Error types for configuration loading.
//!
//! Configuration problems are never fatal for live refresh. Callers log
//! them and fall back to defaults, so each variant carries enough context
//! to make that log line useful on its own.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience type for functions that can fail while loading configuration.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Things that can go wrong when reading settings or resolving paths.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Couldn't read the settings file from disk.
    #[error("failed to read settings '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file exists but isn't valid JSON for our schema.
    #[error("malformed settings '{path}': {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configured database path has no file name component
    /// (e.g. `/` or `..`), so there is nothing to watch.
    #[error("database path '{0}' does not name a file")]
    InvalidPath(PathBuf),

    /// The working directory couldn't be determined while resolving
    /// a relative database path.
    #[error("cannot resolve '{path}' against the working directory: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Creates an IO error with the path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error with the path for context.
    pub fn malformed(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Malformed {
            path: path.into(),
            source,
        }
    }
}
