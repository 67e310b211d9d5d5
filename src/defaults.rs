//! Default configuration constants for earshot.
//!
//! The session timing values are fixed for the recognition engines we drive;
//! tests may shorten them through `SessionConfig`, the config file cannot.

use std::time::Duration;

/// Audio sample rate in Hz handed to the recognition engine.
///
/// 16kHz is what the small Vosk-style acoustic models are trained on.
pub const SAMPLE_RATE: u32 = 16000;

/// How long a partial transcript may sit unchanged before it is promoted
/// to a final result.
///
/// Engines driven by a silence endpointer sometimes never emit a final for
/// a short command ("turn on the") once the speaker stops.
pub const SILENCE_TIMEOUT_MS: u64 = 900;

/// Interval between silence watchdog checks. The first check runs one
/// period after listening starts.
pub const WATCHDOG_PERIOD_MS: u64 = 150;

/// Grace delay before the engine is re-armed after an utterance ends.
///
/// Gives the engine time to release the audio device.
pub const RESTART_DELAY_MS: u64 = 50;

/// Name of the bundled model asset directory.
///
/// Must match the asset folder name exactly.
pub const MODEL_ASSET: &str = "vosk-model-small-en-us-0.15";

/// Cache directory name the model asset is unpacked into.
pub const MODEL_CACHE_KEY: &str = "model";

/// Default log filter when neither the config nor `RUST_LOG` sets one.
pub const LOG_LEVEL: &str = "info";

/// Silence promotion timeout as a `Duration`.
pub const fn silence_timeout() -> Duration {
    Duration::from_millis(SILENCE_TIMEOUT_MS)
}

/// Watchdog poll period as a `Duration`.
pub const fn watchdog_period() -> Duration {
    Duration::from_millis(WATCHDOG_PERIOD_MS)
}

/// Restart grace delay as a `Duration`.
pub const fn restart_delay() -> Duration {
    Duration::from_millis(RESTART_DELAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_polls_several_times_per_timeout() {
        assert!(WATCHDOG_PERIOD_MS * 2 <= SILENCE_TIMEOUT_MS);
    }

    #[test]
    fn test_restart_delay_shorter_than_watchdog_period() {
        assert!(restart_delay() < watchdog_period());
    }

    #[test]
    fn test_duration_helpers_match_constants() {
        assert_eq!(silence_timeout(), Duration::from_millis(900));
        assert_eq!(watchdog_period(), Duration::from_millis(150));
        assert_eq!(restart_delay(), Duration::from_millis(50));
    }
}
