use crate::error::{EarshotError, Result};
use crate::models::Model;
use std::sync::Arc;

/// Receiver for the raw events of one engine instance.
///
/// Engines call these from their own delivery thread. Calls for one engine
/// instance are serialized, but they may overlap with calls made by other
/// threads into the session.
pub trait EngineListener: Send + Sync {
    /// Partial hypothesis payload, e.g. `{"partial": "turn on"}`.
    fn on_partial(&self, payload: &str);

    /// Final result payload, e.g. `{"text": "turn on the lights"}`.
    fn on_final(&self, payload: &str);

    /// Intermediate result emitted mid-stream by some engines. Unused.
    fn on_result(&self, _payload: &str) {}

    /// The engine failed while listening.
    fn on_error(&self, cause: EarshotError);

    /// The engine gave up waiting for speech without producing a final.
    fn on_timeout(&self);
}

/// One running recognizer, bound to a single utterance.
///
/// `stop` and `release` are independent: the session calls both, in that
/// order, even when the first fails.
pub trait EngineHandle: Send {
    /// Begin capturing audio and delivering events to `listener`.
    fn start(&mut self, listener: Arc<dyn EngineListener>) -> Result<()>;

    /// Stop capturing audio and delivering events.
    fn stop(&mut self) -> Result<()>;

    /// Free the recognizer.
    fn release(&mut self) -> Result<()>;
}

/// Factory for recognizer instances.
///
/// This trait allows swapping implementations (real engine vs scripted).
pub trait RecognitionEngine: Send + Sync {
    /// Create a recognizer for `model` at `sample_rate` Hz.
    fn create(&self, model: &Arc<dyn Model>, sample_rate: u32) -> Result<Box<dyn EngineHandle>>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

/// Implement RecognitionEngine for Arc<T> to allow sharing with tests and callers.
impl<T: RecognitionEngine> RecognitionEngine for Arc<T> {
    fn create(&self, model: &Arc<dyn Model>, sample_rate: u32) -> Result<Box<dyn EngineHandle>> {
        (**self).create(model, sample_rate)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
