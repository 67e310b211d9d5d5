//! Always-listening recognition session.

pub mod coordinator;
mod dispatcher;
pub mod listener;
mod scheduler;
pub mod state;
pub mod tracker;
mod watchdog;

pub use coordinator::{Session, SessionConfig};
pub use listener::{CollectorListener, SessionEvent, SessionListener};
pub use state::SessionState;
pub use tracker::UtteranceTracker;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
