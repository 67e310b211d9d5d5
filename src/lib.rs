//! earshot - always-listening speech recognition sessions
//!
//! Keeps a streaming recognizer running across utterances and turns its
//! partial/final hypotheses into at most one final per utterance.

// Library code propagates errors instead of panicking
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod command;
pub mod config;
pub mod defaults;
pub mod error;
pub mod models;
#[cfg(feature = "cli")]
pub mod output;
pub mod session;
pub mod stt;

// Engine and model boundaries
pub use models::{Model, ModelProvider, ProvisionRequest};
pub use stt::engine::{EngineHandle, EngineListener, RecognitionEngine};

// Session
pub use session::{Session, SessionConfig, SessionListener, SessionState};

// Command routing
pub use command::{Action, CommandHandler, CommandListener, match_action};

// Error handling
pub use error::{EarshotError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
