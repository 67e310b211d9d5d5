use crate::error::EarshotError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Consumer of session events.
///
/// All callbacks of one session run on the session's delivery thread, one
/// at a time, in the order the session produced them. Callbacks may call
/// back into the session (`start_listening`, `stop_listening`, `close`).
pub trait SessionListener: Send + Sync {
    /// The model is loaded. Fired once.
    fn on_ready(&self);

    /// Partial hypothesis for the utterance in progress, verbatim.
    fn on_partial_result(&self, text: &str);

    /// Final transcript. At most one per utterance.
    fn on_final_result(&self, text: &str);

    /// Provisioning failed (fatal) or the engine failed (listening resumes).
    fn on_error(&self, error: &EarshotError);
}

/// Implement SessionListener for Arc<T> so one listener can be shared.
impl<T: SessionListener + ?Sized> SessionListener for Arc<T> {
    fn on_ready(&self) {
        (**self).on_ready()
    }

    fn on_partial_result(&self, text: &str) {
        (**self).on_partial_result(text)
    }

    fn on_final_result(&self, text: &str) {
        (**self).on_final_result(text)
    }

    fn on_error(&self, error: &EarshotError) {
        (**self).on_error(error)
    }
}

/// A delivered callback, as recorded by [`CollectorListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ready,
    Partial(String),
    Final(String),
    Error(String),
}

/// Listener that records every callback.
///
/// Also notices overlapping callbacks, which the delivery thread must
/// never produce.
#[derive(Debug, Default)]
pub struct CollectorListener {
    events: Mutex<Vec<SessionEvent>>,
    changed: Condvar,
    in_callback: AtomicBool,
    overlaps: AtomicUsize,
}

impl CollectorListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn finals(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Final(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn partials(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Partial(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == SessionEvent::Ready)
            .count()
    }

    /// Number of times a callback started while another was running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Block until `predicate` holds for the recorded events or `timeout` passes.
    ///
    /// Returns whether the predicate held.
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[SessionEvent]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if predicate(&events) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = self
                .changed
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn record(&self, event: SessionEvent) {
        if self.in_callback.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.changed.notify_all();
        self.in_callback.store(false, Ordering::SeqCst);
    }
}

impl SessionListener for CollectorListener {
    fn on_ready(&self) {
        self.record(SessionEvent::Ready);
    }

    fn on_partial_result(&self, text: &str) {
        self.record(SessionEvent::Partial(text.to_string()));
    }

    fn on_final_result(&self, text: &str) {
        self.record(SessionEvent::Final(text.to_string()));
    }

    fn on_error(&self, error: &EarshotError) {
        self.record(SessionEvent::Error(error.to_string()));
    }
}
