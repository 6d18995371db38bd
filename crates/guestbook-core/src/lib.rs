//! Guestbook Core - shared configuration for live refresh
//!
//! This crate knows where the guestbook's data lives and how the
//! live-refresh subsystem is tuned. It parses the host application's
//! connection string, loads `appsettings.json`, and resolves the single
//! file the watcher observes.
//!
//! # Example
//!
//! ```no_run
//! use guestbook_core::Settings;
//! use std::path::Path;
//!
//! let settings = Settings::load_or_default(Path::new("appsettings.json"));
//! let target = settings.watch_target().unwrap();
//! println!("watching {} in {}", target.file_name, target.directory.display());
//! ```

pub mod config;
pub mod error;

pub use config::{
    extract_database_path, ConnectionStrings, LiveRefreshSettings, Settings, WatchTarget,
    CONNECTION_ENV, DEFAULT_CONNECTION_STRING, DEFAULT_DATABASE_PATH, DEFAULT_DEBOUNCE_MS,
    DEFAULT_HUB_PATH, SETTINGS_FILE,
};
pub use error::{ConfigError, Result};

/// Name of the event pushed to clients when the database file changes.
pub const DATABASE_CHANGED_EVENT: &str = "DatabaseChanged";
