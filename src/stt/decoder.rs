//! Decoding of recognition engine payloads.
//!
//! Engines report hypotheses as small JSON objects. Partials carry the
//! text in a `partial` field, finals in a `text` field; any other fields
//! (word timings, confidences) are ignored. A payload that cannot be
//! decoded is logged and dropped, it never fails the session.

use serde::Deserialize;
use tracing::{debug, warn};

/// A decoded engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Hypothesis for speech still in progress.
    Partial { text: String },
    /// Confirmed transcript for a completed utterance.
    Final { text: String },
    /// Malformed payload or no text field.
    Ignored,
}

#[derive(Debug, Deserialize)]
struct PartialPayload {
    partial: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FinalPayload {
    text: Option<String>,
}

/// Decode a partial-hypothesis payload.
pub fn decode_partial(payload: &str) -> EngineEvent {
    match serde_json::from_str::<PartialPayload>(payload) {
        Ok(PartialPayload {
            partial: Some(text),
        }) => EngineEvent::Partial { text },
        Ok(PartialPayload { partial: None }) => {
            debug!(payload, "Partial payload has no text");
            EngineEvent::Ignored
        }
        Err(e) => {
            warn!(error = %e, payload, "Failed to parse partial payload");
            EngineEvent::Ignored
        }
    }
}

/// Decode a final-result payload.
pub fn decode_final(payload: &str) -> EngineEvent {
    match serde_json::from_str::<FinalPayload>(payload) {
        Ok(FinalPayload { text: Some(text) }) => EngineEvent::Final { text },
        Ok(FinalPayload { text: None }) => {
            debug!(payload, "Final payload has no text");
            EngineEvent::Ignored
        }
        Err(e) => {
            warn!(error = %e, payload, "Failed to parse final payload");
            EngineEvent::Ignored
        }
    }
}
