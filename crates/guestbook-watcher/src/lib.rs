//! Guestbook Watcher - file watching and debouncing
//!
//! This crate handles the file system side of live refresh:
//! - Watching the database file for writes and size changes
//! - Collapsing bursts of changes into one notification per interval
//!
//! It never reads the file. It only knows that the file was touched.

mod debounce;
mod detector;
mod error;

pub use debounce::{Clock, DebounceGate, ManualClock, MonotonicClock};
pub use detector::{ChangeDetector, ChangeHandler, ChangeKind, ChangeSignal, ChangeStream};
pub use error::WatchError;
