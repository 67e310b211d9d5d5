//! Recognition engine boundary.

pub mod decoder;
pub mod engine;
pub mod scripted;

pub use decoder::{EngineEvent, decode_final, decode_partial};
pub use engine::{EngineHandle, EngineListener, RecognitionEngine};
pub use scripted::{ScriptEvent, ScriptStep, ScriptedEngine, UtteranceScript};
