//! Database file change detection.
//!
//! Uses the notify crate to watch the directory that holds the database
//! and raise a "changed" signal whenever the database file itself is
//! written to or changes size. Sibling files (journals, WAL) are ignored.

use crate::error::WatchError;
use guestbook_core::WatchTarget;
use notify::event::{MetadataKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the OS told us about the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File content was written.
    Data,
    /// Write time or size metadata changed.
    Metadata,
    /// The platform reported a modification without details.
    Unspecified,
}

/// A single "the database file was touched" signal.
#[derive(Debug, Clone)]
pub struct ChangeSignal {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Callback invoked for every change signal.
///
/// Runs on the OS watcher thread, possibly concurrently with itself.
pub type ChangeHandler = Arc<dyn Fn(ChangeSignal) + Send + Sync + 'static>;

struct ActiveWatch {
    target: WatchTarget,
    // Dropping the watcher releases the OS handle.
    _watcher: RecommendedWatcher,
}

/// Watches a single file for writes and size changes.
///
/// Owns the OS watch handle exclusively. The handle is released on
/// [`stop`](Self::stop), on a restart, and when the detector is dropped.
#[derive(Default)]
pub struct ChangeDetector {
    handler: Option<ChangeHandler>,
    active: Option<ActiveWatch>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for change signals, replacing any previous one.
    ///
    /// Takes effect on the next [`start`](Self::start).
    pub fn on_change<F>(&mut self, handler: F)
    where
        F: Fn(ChangeSignal) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
    }

    /// Starts watching `path`.
    ///
    /// Relative paths are resolved against the working directory. The
    /// directory has to exist; the file itself doesn't. If a watch is
    /// already active it is released first.
    pub fn start(&mut self, path: &Path) -> Result<&WatchTarget, WatchError> {
        let handler = self.handler.clone().ok_or(WatchError::NoHandler)?;
        self.start_with(path, handler)
    }

    /// Starts watching `path` and returns the signals as a blocking stream.
    ///
    /// The stream ends once the returned detector is stopped or dropped.
    /// It can't be restarted; build a new one instead.
    pub fn stream(path: &Path) -> Result<(Self, ChangeStream), WatchError> {
        let (tx, rx) = channel();
        let mut detector = Self::new();
        detector.start_with(
            path,
            Arc::new(move |signal: ChangeSignal| {
                if tx.send(signal).is_err() {
                    debug!("Change stream receiver dropped");
                }
            }),
        )?;
        Ok((detector, ChangeStream { receiver: rx }))
    }

    fn start_with(
        &mut self,
        path: &Path,
        handler: ChangeHandler,
    ) -> Result<&WatchTarget, WatchError> {
        self.stop();

        let target = WatchTarget::resolve(path)?;
        if !target.directory.is_dir() {
            return Err(WatchError::MissingDirectory(target.directory));
        }

        let filter = target.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(kind) = classify(&event.kind) else {
                        return;
                    };
                    for path in event.paths.into_iter().filter(|p| filter.matches(p)) {
                        debug!("Database file changed: {}", path.display());
                        let shown = path.display().to_string();
                        let signal = ChangeSignal { path, kind };
                        if catch_unwind(AssertUnwindSafe(|| (*handler)(signal))).is_err() {
                            error!("Change handler panicked while handling {}", shown);
                        }
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            })
            .map_err(|e| WatchError::notify(&target.directory, e))?;

        watcher
            .watch(&target.directory, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::notify(&target.directory, e))?;

        info!("Watching {} for changes", target.path.display());

        let active = self.active.insert(ActiveWatch {
            target,
            _watcher: watcher,
        });
        Ok(&active.target)
    }

    /// Stops watching and releases the OS handle.
    ///
    /// Returns `false` if nothing was being watched.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                info!("Stopped watching {}", active.target.path.display());
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The file currently being watched.
    pub fn target(&self) -> Option<&WatchTarget> {
        self.active.as_ref().map(|a| &a.target)
    }
}

/// Keeps only writes and size/write-time changes.
fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Modify(ModifyKind::Data(_)) => Some(ChangeKind::Data),
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime | MetadataKind::Any)) => {
            Some(ChangeKind::Metadata)
        }
        EventKind::Modify(ModifyKind::Any) => Some(ChangeKind::Unspecified),
        _ => None,
    }
}

/// Change signals from a detector created with [`ChangeDetector::stream`].
///
/// Iterating blocks until the next signal and finishes when the detector
/// goes away.
pub struct ChangeStream {
    receiver: Receiver<ChangeSignal>,
}

impl ChangeStream {
    /// Returns any pending signals without blocking.
    pub fn poll(&self) -> Vec<ChangeSignal> {
        self.receiver.try_iter().collect()
    }

    /// Waits for the next signal with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeSignal> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl Iterator for ChangeStream {
    type Item = ChangeSignal;

    fn next(&mut self) -> Option<ChangeSignal> {
        self.receiver.recv().ok()
    }
}
