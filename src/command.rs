//! Voice command routing.
//!
//! Maps final transcripts to a small set of device actions. Routing can be
//! gated on a wake word: until one of the configured wake words shows up in
//! a partial or final, finals are passed through but not routed.

use crate::error::EarshotError;
use crate::session::SessionListener;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Action a transcript asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
    TakePicture,
    OpenSettings,
    Hello,
    Unknown,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::TakePicture => "take-picture",
            Action::OpenSettings => "open-settings",
            Action::Hello => "hello",
            Action::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

const START_VERBS: &[&str] = &["start", "go", "begin"];
const STOP_VERBS: &[&str] = &["stop", "halt", "cancel"];
const PICTURE_PHRASES: &[&str] = &["take picture", "take a picture", "capture", "snap"];
const SETTINGS_PHRASES: &[&str] = &["open settings", "settings"];
const GREETINGS: &[&str] = &["hello", "hi"];

/// Lowercase words of `text`, split on anything that is not alphanumeric
/// or an apostrophe.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether `phrase` occurs in `words` as a run of whole words.
fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
}

/// Map a transcript to an action.
///
/// Start and stop must lead the utterance ("go ahead", "cancel that");
/// the others may appear anywhere. Matching is case-insensitive and on
/// whole words, so "this" is not a greeting.
pub fn match_action(text: &str) -> Action {
    let words = words(text);
    let Some(first) = words.first() else {
        return Action::Unknown;
    };

    if START_VERBS.contains(&first.as_str()) {
        Action::Start
    } else if STOP_VERBS.contains(&first.as_str()) {
        Action::Stop
    } else if PICTURE_PHRASES.iter().any(|p| contains_phrase(&words, p)) {
        Action::TakePicture
    } else if SETTINGS_PHRASES.iter().any(|p| contains_phrase(&words, p)) {
        Action::OpenSettings
    } else if GREETINGS.iter().any(|p| contains_phrase(&words, p)) {
        Action::Hello
    } else {
        Action::Unknown
    }
}

/// Word index just past the last occurrence of `phrase` in `words`.
fn phrase_end(words: &[String], phrase: &str) -> Option<usize> {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() || needle.len() > words.len() {
        return None;
    }
    words
        .windows(needle.len())
        .rposition(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
        .map(|start| start + needle.len())
}

/// Whether any of `wake_words` occurs in `text`.
pub fn contains_wake_word(text: &str, wake_words: &[String]) -> bool {
    let words = words(text);
    wake_words
        .iter()
        .any(|wake| contains_phrase(&words, &wake.to_lowercase()))
}

/// The words following the last wake word in `text`, lowercased and joined
/// by single spaces. `None` if `text` carries no wake word.
pub fn command_after_wake_word(text: &str, wake_words: &[String]) -> Option<String> {
    let words = words(text);
    let end = wake_words
        .iter()
        .filter_map(|wake| phrase_end(&words, &wake.to_lowercase()))
        .max()?;
    Some(words[end..].join(" "))
}

/// Receiver of routed commands.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, action: Action, text: &str);
}

/// Implement CommandHandler for Arc<T> so handlers can be shared.
impl<T: CommandHandler + ?Sized> CommandHandler for Arc<T> {
    fn handle(&self, action: Action, text: &str) {
        (**self).handle(action, text)
    }
}

/// Session listener that forwards every callback to `inner` and routes
/// finals to a [`CommandHandler`].
///
/// A wake word heard in a partial or a final arms routing for the rest of
/// the session. When a final carries the wake word itself, only the words
/// after it are routed ("hey nova take a picture"); a bare wake word routes
/// nothing. Partials are only ever inspected for the wake word, so the
/// outcome is the same whether or not the engine emitted partials first.
pub struct CommandListener {
    inner: Arc<dyn SessionListener>,
    handler: Arc<dyn CommandHandler>,
    wake_words: Vec<String>,
    awake: AtomicBool,
}

impl CommandListener {
    /// With no wake words every final is routed.
    pub fn new(
        inner: Arc<dyn SessionListener>,
        handler: Arc<dyn CommandHandler>,
        wake_words: Vec<String>,
    ) -> Self {
        let awake = AtomicBool::new(wake_words.is_empty());
        Self {
            inner,
            handler,
            wake_words,
            awake,
        }
    }

    pub fn is_awake(&self) -> bool {
        self.awake.load(Ordering::SeqCst)
    }

    fn wake_on(&self, text: &str) {
        if self.is_awake() || !contains_wake_word(text, &self.wake_words) {
            return;
        }
        if !self.awake.swap(true, Ordering::SeqCst) {
            info!("Wake word heard, routing commands");
        }
    }
}

impl SessionListener for CommandListener {
    fn on_ready(&self) {
        self.inner.on_ready();
    }

    fn on_partial_result(&self, text: &str) {
        self.wake_on(text);
        self.inner.on_partial_result(text);
    }

    fn on_final_result(&self, text: &str) {
        self.inner.on_final_result(text);

        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.wake_on(text);
        if !self.is_awake() {
            debug!(text, "Not awake, final not routed");
            return;
        }
        let command = match command_after_wake_word(text, &self.wake_words) {
            Some(rest) if rest.is_empty() => {
                debug!(text, "Bare wake word, nothing to route");
                return;
            }
            Some(rest) => rest,
            None => text.to_string(),
        };
        let action = match_action(&command);
        debug!(%action, text = %command, "Routing command");
        self.handler.handle(action, &command);
    }

    fn on_error(&self, error: &EarshotError) {
        self.inner.on_error(error);
    }
}
