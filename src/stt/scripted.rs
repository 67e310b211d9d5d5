//! Scripted recognition engine.
//!
//! Replays pre-recorded event sequences instead of recognizing audio. Each
//! engine instance the session creates consumes the next utterance script;
//! once the scripts run out, new instances stay silent until stopped.
//!
//! Scripts load from JSON lines, one utterance per line:
//!
//! ```text
//! {"steps": [{"after_ms": 120, "event": {"type": "partial", "text": "turn on"}},
//!            {"after_ms": 200, "event": {"type": "final", "text": "turn on the lights"}}]}
//! ```
//!
//! `after_ms` is relative to the previous step. Blank lines and lines
//! starting with `#` are skipped.

use crate::error::{EarshotError, Result};
use crate::models::Model;
use crate::stt::engine::{EngineHandle, EngineListener, RecognitionEngine};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// An event the scripted engine emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// Partial hypothesis, encoded as `{"partial": text}`.
    Partial { text: String },
    /// Final result, encoded as `{"text": text}`.
    Final { text: String },
    /// Intermediate result, encoded as `{"text": text}`.
    Result { text: String },
    /// Partial callback with a raw payload.
    RawPartial { payload: String },
    /// Final callback with a raw payload.
    RawFinal { payload: String },
    /// Runtime error.
    Error { message: String },
    /// Timeout without a final.
    Timeout,
}

/// One scripted event and the delay preceding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Delay since the previous step (or since start).
    #[serde(default)]
    pub after_ms: u64,
    pub event: ScriptEvent,
}

impl ScriptStep {
    pub fn new(after_ms: u64, event: ScriptEvent) -> Self {
        Self { after_ms, event }
    }
}

/// Events emitted by one engine instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UtteranceScript {
    pub steps: Vec<ScriptStep>,
}

impl UtteranceScript {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    /// Number of final results this script produces.
    pub fn final_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.event, ScriptEvent::Final { .. }))
            .count()
    }
}

/// Parse a JSON-lines script.
pub fn parse_script(text: &str) -> Result<Vec<UtteranceScript>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| EarshotError::ScriptParse {
                line: index + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Counters describing what the session did with the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub created: usize,
    pub started: usize,
    pub stopped: usize,
    pub released: usize,
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<UtteranceScript>>,
    create_failures: AtomicUsize,
    start_failures: AtomicUsize,
    stop_fails: AtomicBool,
    created: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    released: AtomicUsize,
    current: Mutex<Option<Arc<dyn EngineListener>>>,
}

/// Consume one unit from a failure budget.
fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Recognition engine replaying utterance scripts.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<UtteranceScript>) -> Self {
        let engine = Self::default();
        *engine
            .shared
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = scripts.into();
        engine
    }

    /// Engine whose instances never emit anything by themselves.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Load a JSON-lines script from `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::new(parse_script(&text)?))
    }

    /// Fail the next `count` calls to `create`.
    pub fn with_create_failures(self, count: usize) -> Self {
        self.shared.create_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` calls to `start`.
    pub fn with_start_failures(self, count: usize) -> Self {
        self.shared.start_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Make every `stop` call fail. `release` still shuts the instance down.
    pub fn with_stop_failure(self) -> Self {
        self.shared.stop_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Scripts not yet consumed by an engine instance.
    pub fn remaining(&self) -> usize {
        self.shared
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            created: self.shared.created.load(Ordering::SeqCst),
            started: self.shared.started.load(Ordering::SeqCst),
            stopped: self.shared.stopped.load(Ordering::SeqCst),
            released: self.shared.released.load(Ordering::SeqCst),
        }
    }

    /// Listener of the most recently started instance.
    ///
    /// Lets tests inject events by hand.
    pub fn current_listener(&self) -> Option<Arc<dyn EngineListener>> {
        self.shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn create(&self, model: &Arc<dyn Model>, sample_rate: u32) -> Result<Box<dyn EngineHandle>> {
        if sample_rate == 0 {
            return Err(EarshotError::EngineStart {
                message: "sample rate must be positive".to_string(),
            });
        }
        if take_one(&self.shared.create_failures) {
            return Err(EarshotError::EngineStart {
                message: "recognizer allocation failed".to_string(),
            });
        }

        let script = self
            .shared
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();
        let index = self.shared.created.fetch_add(1, Ordering::SeqCst);
        debug!(
            instance = index,
            model = model.name(),
            steps = script.steps.len(),
            "Created scripted recognizer"
        );

        Ok(Box::new(ScriptedHandle {
            shared: self.shared.clone(),
            script: Some(script),
            stop_tx: None,
            worker: None,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedHandle {
    shared: Arc<Shared>,
    script: Option<UtteranceScript>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptedHandle {
    fn shutdown(&mut self) {
        // Disconnecting the stop channel wakes the worker
        self.stop_tx.take();
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
            && worker.join().is_err()
        {
            debug!("Scripted recognizer thread panicked");
        }
    }
}

impl EngineHandle for ScriptedHandle {
    fn start(&mut self, listener: Arc<dyn EngineListener>) -> Result<()> {
        if take_one(&self.shared.start_failures) {
            return Err(EarshotError::EngineStart {
                message: "audio device busy".to_string(),
            });
        }
        let Some(script) = self.script.take() else {
            return Err(EarshotError::EngineStart {
                message: "recognizer already started".to_string(),
            });
        };

        self.shared.started.fetch_add(1, Ordering::SeqCst);
        *self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener.clone());

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("earshot-scripted".to_string())
            .spawn(move || play(script, listener, stop_rx))?;

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.stopped.fetch_add(1, Ordering::SeqCst);
        if self.shared.stop_fails.load(Ordering::SeqCst) {
            return Err(EarshotError::EngineTeardown {
                message: "stop rejected".to_string(),
            });
        }
        self.shutdown();
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
        self.shutdown();
        Ok(())
    }
}

/// Worker loop: emit each step after its delay until stopped.
fn play(script: UtteranceScript, listener: Arc<dyn EngineListener>, stop_rx: Receiver<()>) {
    for step in script.steps {
        match stop_rx.recv_timeout(Duration::from_millis(step.after_ms)) {
            Err(RecvTimeoutError::Timeout) => emit(&step.event, listener.as_ref()),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
    trace!("Script exhausted, waiting for stop");
    // Returns on stop or when the handle is dropped
    stop_rx.recv().ok();
}

fn emit(event: &ScriptEvent, listener: &dyn EngineListener) {
    match event {
        ScriptEvent::Partial { text } => {
            listener.on_partial(&serde_json::json!({ "partial": text }).to_string())
        }
        ScriptEvent::Final { text } => {
            listener.on_final(&serde_json::json!({ "text": text }).to_string())
        }
        ScriptEvent::Result { text } => {
            listener.on_result(&serde_json::json!({ "text": text }).to_string())
        }
        ScriptEvent::RawPartial { payload } => listener.on_partial(payload),
        ScriptEvent::RawFinal { payload } => listener.on_final(payload),
        ScriptEvent::Error { message } => listener.on_error(EarshotError::EngineRuntime {
            message: message.clone(),
        }),
        ScriptEvent::Timeout => listener.on_timeout(),
    }
}
