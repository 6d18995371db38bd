//! Live-refresh lifecycle.
//!
//! Ties the pieces together: the detector reports database writes, the
//! gate thins them out, and the broadcaster tells every browser to
//! reload. Live refresh is a nice-to-have, so nothing in here is allowed
//! to take the application down. If the watch can't be set up the
//! controller still runs, just without a watcher.

use crate::broadcast::{dispatch, Broadcaster};
use guestbook_core::{extract_database_path, Settings, WatchTarget, DATABASE_CHANGED_EVENT};
use guestbook_watcher::{ChangeDetector, DebounceGate};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

/// Where the controller is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Runs one change event through the gate and, if it passes, out to clients.
///
/// Returns whether the event was forwarded.
pub fn relay(gate: &DebounceGate, broadcaster: &dyn Broadcaster, event: &str) -> bool {
    if !gate.try_pass() {
        debug!("Suppressed {} inside debounce window", event);
        return false;
    }
    info!("Database file changed, notifying clients");
    dispatch(broadcaster, event);
    true
}

struct Inner {
    state: LifecycleState,
    detector: Option<ChangeDetector>,
}

/// Starts and stops live refresh as a unit.
pub struct LifecycleController {
    connection_string: String,
    gate: Arc<DebounceGate>,
    broadcaster: Arc<dyn Broadcaster>,
    inner: Mutex<Inner>,
}

impl LifecycleController {
    /// Creates a controller from loaded settings.
    pub fn new(settings: &Settings, broadcaster: Arc<dyn Broadcaster>) -> Self {
        let gate = DebounceGate::new(settings.live_refresh.debounce_interval());
        Self::with_gate(settings.connection_string(), Arc::new(gate), broadcaster)
    }

    /// Creates a controller with an explicit gate.
    pub fn with_gate(
        connection_string: impl Into<String>,
        gate: Arc<DebounceGate>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            connection_string: connection_string.into(),
            gate,
            broadcaster,
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                detector: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts watching the configured database.
    ///
    /// Always ends in [`LifecycleState::Running`]. A watch that can't be
    /// set up is logged and the controller runs degraded. Calling this
    /// while already running does nothing.
    pub fn start(&self) -> LifecycleState {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Stopped {
            debug!("Live refresh already started");
            return inner.state;
        }
        inner.state = LifecycleState::Starting;

        let path = extract_database_path(&self.connection_string);
        info!("Starting database watcher for: {}", path.display());

        let mut detector = ChangeDetector::new();
        let gate = self.gate.clone();
        let broadcaster = self.broadcaster.clone();
        detector.on_change(move |_signal| {
            relay(&gate, broadcaster.as_ref(), DATABASE_CHANGED_EVENT);
        });

        match detector.start(&path).map(|target| target.path.clone()) {
            Ok(watched) => {
                debug!("Live refresh attached to {}", watched.display());
                inner.detector = Some(detector);
            }
            Err(e) => error!("Live refresh disabled, database watcher failed: {}", e),
        }

        inner.state = LifecycleState::Running;
        inner.state
    }

    /// Stops watching and releases the OS handle. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state == LifecycleState::Stopped {
            debug!("Live refresh already stopped");
            return;
        }
        inner.state = LifecycleState::Stopping;

        info!("Stopping database watcher");
        if let Some(mut detector) = inner.detector.take() {
            detector.stop();
        }

        inner.state = LifecycleState::Stopped;
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Whether a live watcher is attached (false when running degraded).
    pub fn is_watching(&self) -> bool {
        self.lock()
            .detector
            .as_ref()
            .map(ChangeDetector::is_active)
            .unwrap_or(false)
    }

    /// The file being watched, if any.
    pub fn target(&self) -> Option<WatchTarget> {
        self.lock()
            .detector
            .as_ref()
            .and_then(|d| d.target().cloned())
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastError;
    use guestbook_watcher::ManualClock;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl Recording {
        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl Broadcaster for Recording {
        fn broadcast_all(&self, event: &str) -> Result<(), BroadcastError> {
            self.events.lock().unwrap().push(event.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Flaky {
        calls: AtomicUsize,
    }

    impl Broadcaster for Flaky {
        fn broadcast_all(&self, _event: &str) -> Result<(), BroadcastError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(BroadcastError::Transport("socket gone".to_string()));
            }
            Ok(())
        }
    }

    fn connection_for(path: &std::path::Path) -> String {
        format!("Data Source={}", path.display())
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn test_relay_follows_gate() {
        let clock = Arc::new(ManualClock::new());
        let gate = DebounceGate::with_clock(Duration::from_millis(500), clock.clone());
        let recording = Recording::default();

        let mut forwarded = Vec::new();
        for t in [0, 100, 200, 600] {
            clock.set(Duration::from_millis(t));
            if relay(&gate, &recording, DATABASE_CHANGED_EVENT) {
                forwarded.push(t);
            }
        }

        assert_eq!(forwarded, vec![0, 600]);
        assert_eq!(
            *recording.events.lock().unwrap(),
            vec!["DatabaseChanged".to_string(), "DatabaseChanged".to_string()]
        );
    }

    #[test]
    #[traced_test]
    fn test_relay_keeps_going_after_broadcast_failure() {
        let clock = Arc::new(ManualClock::new());
        let gate = DebounceGate::with_clock(Duration::from_millis(500), clock.clone());
        let flaky = Flaky::default();

        assert!(relay(&gate, &flaky, DATABASE_CHANGED_EVENT));
        clock.advance(Duration::from_secs(1));
        assert!(relay(&gate, &flaky, DATABASE_CHANGED_EVENT));

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert!(logs_contain("socket gone"));
    }

    #[test]
    #[traced_test]
    fn test_start_with_missing_directory_runs_degraded() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("nowhere").join("guestbook.db");
        let controller = LifecycleController::with_gate(
            connection_for(&db),
            Arc::new(DebounceGate::new(Duration::from_millis(500))),
            Arc::new(Recording::default()),
        );

        assert_eq!(controller.start(), LifecycleState::Running);
        assert!(!controller.is_watching());
        assert!(controller.target().is_none());
        assert!(logs_contain("Live refresh disabled"));

        controller.stop();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempdir().unwrap();
        let controller = LifecycleController::with_gate(
            connection_for(&dir.path().join("guestbook.db")),
            Arc::new(DebounceGate::new(Duration::from_millis(500))),
            Arc::new(Recording::default()),
        );

        controller.stop();
        assert_eq!(controller.state(), LifecycleState::Stopped);

        controller.start();
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(!controller.is_watching());
    }

    #[test]
    fn test_start_twice_is_noop() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("guestbook.db");
        let controller = LifecycleController::with_gate(
            connection_for(&db),
            Arc::new(DebounceGate::new(Duration::from_millis(500))),
            Arc::new(Recording::default()),
        );

        assert_eq!(controller.start(), LifecycleState::Running);
        assert_eq!(controller.start(), LifecycleState::Running);
        assert!(controller.is_watching());
        assert_eq!(controller.target().unwrap().file_name, "guestbook.db");
    }

    #[test]
    fn test_restart_reacquires_watch() {
        let dir = tempdir().unwrap();
        let controller = LifecycleController::with_gate(
            connection_for(&dir.path().join("guestbook.db")),
            Arc::new(DebounceGate::new(Duration::from_millis(500))),
            Arc::new(Recording::default()),
        );

        for _ in 0..3 {
            controller.start();
            assert!(controller.is_watching());
            controller.stop();
            assert!(!controller.is_watching());
        }
    }

    #[test]
    fn test_burst_of_writes_notifies_once() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("guestbook.db");
        fs::write(&db, b"").unwrap();

        let recording = Arc::new(Recording::default());
        let controller = LifecycleController::with_gate(
            connection_for(&db),
            Arc::new(DebounceGate::new(Duration::from_secs(30))),
            recording.clone(),
        );
        controller.start();
        assert!(controller.is_watching());

        for i in 0..5 {
            fs::write(&db, format!("row {}", i)).unwrap();
        }

        assert!(wait_for(|| recording.count() >= 1));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(recording.count(), 1);
    }

    #[test]
    fn test_no_events_after_stop() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("guestbook.db");
        fs::write(&db, b"").unwrap();

        let recording = Arc::new(Recording::default());
        let controller = LifecycleController::with_gate(
            connection_for(&db),
            Arc::new(DebounceGate::new(Duration::from_millis(1))),
            recording.clone(),
        );
        controller.start();
        controller.stop();

        fs::write(&db, b"late write").unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(recording.count(), 0);
    }
}
