//! Errors raised while setting up a watch.
//!
//! None of these are fatal. The lifecycle controller logs them and keeps
//! the application running without live refresh.

use guestbook_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    /// The configured path couldn't be turned into a watch target.
    #[error("invalid watch target: {0}")]
    InvalidTarget(#[from] ConfigError),

    /// The directory that should contain the database doesn't exist.
    #[error("directory '{0}' does not exist")]
    MissingDirectory(PathBuf),

    /// `start` was called before a change handler was registered.
    #[error("no change handler registered")]
    NoHandler,

    /// The OS refused to set up the watch (permissions, inotify limits, ...).
    #[error("failed to watch '{path}': {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl WatchError {
    pub fn notify(path: impl Into<PathBuf>, source: notify::Error) -> Self {
        Self::Notify {
            path: path.into(),
            source,
        }
    }
}
