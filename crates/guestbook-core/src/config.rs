//! Settings and watch-target resolution.
//!
//! The guestbook stores its data in a single SQLite-style file whose
//! location comes from an ADO-style connection string
//! (`Data Source=guestbook.db;Cache=Shared`). Everything live refresh
//! needs to know is derived from that string plus a few knobs in the
//! `LiveRefresh` section of `appsettings.json`.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Database file used when the connection string doesn't name one.
pub const DEFAULT_DATABASE_PATH: &str = "guestbook.db";

/// Connection string used when none is configured at all.
pub const DEFAULT_CONNECTION_STRING: &str = "Data Source=guestbook.db";

/// Settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = "appsettings.json";

/// Environment variable that overrides the configured connection string.
pub const CONNECTION_ENV: &str = "ConnectionStrings__DefaultConnection";

/// Path the real-time endpoint is exposed at.
pub const DEFAULT_HUB_PATH: &str = "/databaseHub";

/// Minimum spacing between two forwarded change notifications.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

const DATA_SOURCE_KEY: &str = "Data Source";

/// Extracts the database path from a connection string.
///
/// Segments are `;`-separated `key=value` pairs. The `Data Source` key is
/// matched case-insensitively after trimming. A segment only counts if it
/// splits into exactly one key and one value, and an empty value is treated
/// like a missing one. Anything else falls back to [`DEFAULT_DATABASE_PATH`].
///
/// ```
/// use guestbook_core::extract_database_path;
/// use std::path::PathBuf;
///
/// let path = extract_database_path("Mode=ReadWrite; data source = app/guestbook.db");
/// assert_eq!(path, PathBuf::from("app/guestbook.db"));
/// ```
pub fn extract_database_path(connection_string: &str) -> PathBuf {
    for segment in connection_string.split(';') {
        let parts: Vec<&str> = segment.split('=').collect();
        if parts.len() != 2 {
            continue;
        }
        if !parts[0].trim().eq_ignore_ascii_case(DATA_SOURCE_KEY) {
            continue;
        }
        let value = parts[1].trim();
        if value.is_empty() {
            break;
        }
        return PathBuf::from(value);
    }

    debug!(
        "No usable Data Source in connection string, using {}",
        DEFAULT_DATABASE_PATH
    );
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

/// The file live refresh keeps an eye on.
///
/// Computed once at startup and never changed afterwards. The OS watch is
/// placed on `directory` and events are filtered down to `file_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    /// Absolute, lexically normalized path of the database file.
    pub path: PathBuf,

    /// Directory that contains the file.
    pub directory: PathBuf,

    /// Bare file name used as the event filter.
    pub file_name: String,
}

impl WatchTarget {
    /// Resolves `path` against the current working directory.
    pub fn resolve(path: &Path) -> Result<Self> {
        if path.is_absolute() {
            return Self::resolve_from(path, Path::new("/"));
        }
        let cwd = std::env::current_dir().map_err(|source| ConfigError::WorkingDir {
            path: path.to_path_buf(),
            source,
        })?;
        Self::resolve_from(path, &cwd)
    }

    /// Resolves `path` against an explicit base directory.
    ///
    /// The file doesn't have to exist yet; normalization is purely lexical.
    pub fn resolve_from(path: &Path, base: &Path) -> Result<Self> {
        let joined = base.join(path);
        let absolute = normalize(&joined);

        let file_name = absolute
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| ConfigError::InvalidPath(path.to_path_buf()))?;

        let directory = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            path: absolute,
            directory,
            file_name,
        })
    }

    /// Whether an event path refers to the watched file.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| n == self.file_name.as_str())
            .unwrap_or(false)
    }
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Top-level settings, shaped like the host application's `appsettings.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    #[serde(default)]
    pub connection_strings: ConnectionStrings,

    #[serde(default)]
    pub live_refresh: LiveRefreshSettings,
}

/// The `ConnectionStrings` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionStrings {
    pub default_connection: Option<String>,
}

/// The `LiveRefresh` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LiveRefreshSettings {
    /// Address the hub listens on.
    pub listen: SocketAddr,

    /// Path of the real-time endpoint.
    pub hub_path: String,

    /// Debounce interval in milliseconds.
    pub debounce_ms: u64,

    /// Seconds between server pings on idle connections.
    pub keep_alive_secs: u64,

    /// Seconds a new connection gets to complete the hub handshake.
    pub handshake_timeout_secs: u64,
}

impl Default for LiveRefreshSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            keep_alive_secs: 15,
            handshake_timeout_secs: 15,
        }
    }
}

impl LiveRefreshSettings {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Settings {
    /// Loads settings from a JSON file.
    ///
    /// A missing file is not an error: it simply means "all defaults".
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_json(&raw).map_err(|e| ConfigError::malformed(path, e))
    }

    /// Loads settings, logging and swallowing any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{}; falling back to default settings", e);
                Self::default()
            }
        }
    }

    /// Parses settings from a JSON string.
    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Applies the `ConnectionStrings__DefaultConnection` environment override.
    pub fn with_env_overrides(self) -> Self {
        let value = std::env::var(CONNECTION_ENV).ok();
        self.with_connection_override(value)
    }

    /// Replaces the connection string when `value` is non-blank.
    pub fn with_connection_override(mut self, value: Option<String>) -> Self {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.connection_strings.default_connection = Some(value);
        }
        self
    }

    /// The effective connection string.
    pub fn connection_string(&self) -> &str {
        self.connection_strings
            .default_connection
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_STRING)
    }

    /// The database path named by the effective connection string.
    pub fn database_path(&self) -> PathBuf {
        extract_database_path(self.connection_string())
    }

    /// Resolves the watch target for the configured database.
    pub fn watch_target(&self) -> Result<WatchTarget> {
        WatchTarget::resolve(&self.database_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extract_simple() {
        assert_eq!(
            extract_database_path("Data Source=guestbook.db"),
            PathBuf::from("guestbook.db")
        );
    }

    #[test]
    fn test_extract_case_insensitive_and_trimmed() {
        let path = extract_database_path("Cache=Shared;  DATA SOURCE  =  /srv/app/data.db ;Mode=Rw");
        assert_eq!(path, PathBuf::from("/srv/app/data.db"));
    }

    #[test]
    fn test_extract_missing_key_falls_back() {
        assert_eq!(
            extract_database_path("Server=localhost;Database=gb"),
            PathBuf::from(DEFAULT_DATABASE_PATH)
        );
        assert_eq!(extract_database_path(""), PathBuf::from(DEFAULT_DATABASE_PATH));
    }

    #[test]
    fn test_extract_unparsable_segment_falls_back() {
        // Extra '=' means the segment doesn't split into key and value.
        assert_eq!(
            extract_database_path("Data Source=a=b"),
            PathBuf::from(DEFAULT_DATABASE_PATH)
        );
        assert_eq!(
            extract_database_path("Data Source=   "),
            PathBuf::from(DEFAULT_DATABASE_PATH)
        );
    }

    #[test]
    fn test_resolve_relative() {
        let target =
            WatchTarget::resolve_from(Path::new("data/./guestbook.db"), Path::new("/srv/app"))
                .unwrap();
        assert_eq!(target.path, PathBuf::from("/srv/app/data/guestbook.db"));
        assert_eq!(target.directory, PathBuf::from("/srv/app/data"));
        assert_eq!(target.file_name, "guestbook.db");
    }

    #[test]
    fn test_resolve_parent_components() {
        let target =
            WatchTarget::resolve_from(Path::new("../shared/gb.db"), Path::new("/srv/app")).unwrap();
        assert_eq!(target.path, PathBuf::from("/srv/shared/gb.db"));
        assert_eq!(target.directory, PathBuf::from("/srv/shared"));
    }

    #[test]
    fn test_resolve_without_file_name() {
        let err = WatchTarget::resolve_from(Path::new(".."), Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath(_)));
    }

    #[test]
    fn test_target_matches_file_name_only() {
        let target =
            WatchTarget::resolve_from(Path::new("guestbook.db"), Path::new("/srv")).unwrap();
        assert!(target.matches(Path::new("/srv/guestbook.db")));
        assert!(!target.matches(Path::new("/srv/guestbook.db-journal")));
        assert!(!target.matches(Path::new("/srv")));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.connection_string(), DEFAULT_CONNECTION_STRING);
        assert_eq!(settings.database_path(), PathBuf::from("guestbook.db"));
        assert_eq!(settings.live_refresh.debounce_interval(), Duration::from_millis(500));
        assert_eq!(settings.live_refresh.hub_path, "/databaseHub");
    }

    #[test]
    fn test_settings_from_json() {
        let settings = Settings::from_json(
            r#"{
                "ConnectionStrings": { "DefaultConnection": "Data Source=app.db" },
                "LiveRefresh": { "DebounceMs": 250, "Listen": "0.0.0.0:8080" },
                "Logging": { "LogLevel": { "Default": "Information" } }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.database_path(), PathBuf::from("app.db"));
        assert_eq!(settings.live_refresh.debounce_ms, 250);
        assert_eq!(settings.live_refresh.listen.port(), 8080);
        // Unspecified fields keep their defaults
        assert_eq!(settings.live_refresh.keep_alive_secs, 15);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("appsettings.json")).unwrap();
        assert!(settings.connection_strings.default_connection.is_none());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appsettings.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));

        let settings = Settings::load_or_default(&path);
        assert_eq!(settings.connection_string(), DEFAULT_CONNECTION_STRING);
    }

    #[test]
    fn test_connection_override() {
        let settings = Settings::default()
            .with_connection_override(Some("Data Source=other.db".to_string()));
        assert_eq!(settings.database_path(), PathBuf::from("other.db"));

        let unchanged = settings.with_connection_override(Some("   ".to_string()));
        assert_eq!(unchanged.database_path(), PathBuf::from("other.db"));
    }
}
