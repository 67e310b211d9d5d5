//! Per-utterance partial tracking.
//!
//! Remembers the latest promotable partial of the current utterance and
//! whether a final has already gone out for it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct UtteranceTracker {
    last_partial_text: String,
    last_partial_at: Option<Instant>,
    final_dispatched: bool,
}

impl UtteranceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything about the previous utterance.
    pub fn reset(&mut self) {
        self.last_partial_text.clear();
        self.last_partial_at = None;
        self.final_dispatched = false;
    }

    /// Record a partial. Blank text carries nothing to promote and is skipped.
    pub fn observe_partial(&mut self, text: &str, now: Instant) {
        if text.trim().is_empty() {
            return;
        }
        self.last_partial_text.clear();
        self.last_partial_text.push_str(text);
        self.last_partial_at = Some(now);
    }

    /// Mark this utterance's final as sent.
    ///
    /// Returns `false` if it had already been marked.
    pub fn mark_final_dispatched(&mut self) -> bool {
        !std::mem::replace(&mut self.final_dispatched, true)
    }

    pub fn final_dispatched(&self) -> bool {
        self.final_dispatched
    }

    pub fn last_partial(&self) -> Option<&str> {
        if self.last_partial_text.is_empty() {
            None
        } else {
            Some(&self.last_partial_text)
        }
    }

    /// True once the latest partial has gone `timeout` without a final.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        if self.final_dispatched || self.last_partial_text.is_empty() {
            return false;
        }
        self.last_partial_at
            .is_some_and(|at| now.saturating_duration_since(at) >= timeout)
    }

    /// If the partial is stale, mark the final dispatched and hand out its text.
    pub fn take_promotable(&mut self, now: Instant, timeout: Duration) -> Option<String> {
        if !self.is_stale(now, timeout) {
            return None;
        }
        self.final_dispatched = true;
        Some(self.last_partial_text.clone())
    }

    /// Promote any pending partial regardless of age.
    ///
    /// Used when the engine itself gave up on the utterance.
    pub fn promote_pending(&mut self) -> Option<String> {
        if self.final_dispatched || self.last_partial_text.is_empty() {
            return None;
        }
        self.final_dispatched = true;
        Some(self.last_partial_text.clone())
    }
}
