//! Session coordinator.
//!
//! Owns the recognizer for the current utterance and turns its event stream
//! into at most one final per utterance. After every utterance (final,
//! engine timeout, engine error or a silence-promoted partial) the
//! recognizer is torn down and a fresh one is started after a short grace
//! delay, so the session keeps listening until stopped.
//!
//! Every recognizer instance is tagged with a generation. Events, watchdog
//! ticks and scheduled restarts carry the generation they belong to and are
//! dropped once it has been superseded.

use crate::config::ModelConfig;
use crate::defaults;
use crate::error::{EarshotError, Result};
use crate::models::{Model, ModelProvider, ProvisionRequest};
use crate::session::dispatcher::{Delivery, Dispatcher};
use crate::session::listener::SessionListener;
use crate::session::lock;
use crate::session::scheduler::{RestartScheduler, RestartTarget};
use crate::session::state::SessionState;
use crate::session::tracker::UtteranceTracker;
use crate::session::watchdog::{Tick, Watchdog, WatchdogTarget};
use crate::stt::decoder::{EngineEvent, decode_final, decode_partial};
use crate::stt::engine::{EngineHandle, EngineListener, RecognitionEngine};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model asset to provision
    pub asset_id: String,
    /// Cache directory name for the unpacked asset
    pub cache_key: String,
    /// Sample rate handed to the recognizer, in Hz
    pub sample_rate: u32,
    /// Age at which an unanswered partial is promoted to a final
    pub silence_timeout: Duration,
    /// Interval between silence checks
    pub watchdog_period: Duration,
    /// Pause between the end of an utterance and the next recognizer
    pub restart_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            asset_id: defaults::MODEL_ASSET.to_string(),
            cache_key: defaults::MODEL_CACHE_KEY.to_string(),
            sample_rate: defaults::SAMPLE_RATE,
            silence_timeout: defaults::silence_timeout(),
            watchdog_period: defaults::watchdog_period(),
            restart_delay: defaults::restart_delay(),
        }
    }
}

impl SessionConfig {
    /// Session for the configured model with the default timings.
    pub fn from_model_config(model: &ModelConfig) -> Self {
        Self {
            asset_id: model.asset.clone(),
            cache_key: model.cache_key.clone(),
            ..Self::default()
        }
    }
}

/// An always-listening recognition session.
///
/// Dropping the session closes it.
pub struct Session {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct UtteranceSlot {
    generation: u64,
    tracker: UtteranceTracker,
    restart_pending: bool,
}

struct Inner {
    this: Weak<Inner>,
    config: SessionConfig,
    engine: Arc<dyn RecognitionEngine>,
    state: Mutex<SessionState>,
    ready: AtomicBool,
    listening: AtomicBool,
    closing: AtomicBool,
    generation: AtomicU64,
    model: Mutex<Option<Arc<dyn Model>>>,
    // Serializes start, stop and close
    active: Mutex<Option<Box<dyn EngineHandle>>>,
    utterance: Mutex<UtteranceSlot>,
    dispatcher: Dispatcher,
    watchdog: Watchdog,
    scheduler: RestartScheduler,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session and request its model.
    ///
    /// Returns once the worker threads are running; the model arrives
    /// asynchronously and is announced through `on_ready` (or `on_error`).
    pub fn new(
        config: SessionConfig,
        provider: &dyn ModelProvider,
        engine: Arc<dyn RecognitionEngine>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self> {
        let (dispatcher, delivery_worker) = Dispatcher::channel(listener);
        let (watchdog, watchdog_worker) = Watchdog::channel();
        let (scheduler, restart_worker) = RestartScheduler::channel();

        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            config,
            engine,
            state: Mutex::new(SessionState::Uninitialized),
            ready: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            model: Mutex::new(None),
            active: Mutex::new(None),
            utterance: Mutex::new(UtteranceSlot::default()),
            dispatcher,
            watchdog,
            scheduler,
            workers: Mutex::new(Vec::new()),
        });

        let delivery_thread = delivery_worker.spawn()?;
        lock(&inner.workers).push(delivery_thread);
        let watchdog_thread =
            watchdog_worker.spawn(Arc::downgrade(&inner), inner.config.watchdog_period)?;
        lock(&inner.workers).push(watchdog_thread);
        let restart_thread =
            restart_worker.spawn(Arc::downgrade(&inner), inner.config.restart_delay)?;
        lock(&inner.workers).push(restart_thread);

        inner.transition(SessionState::Provisioning);
        info!(
            asset = %inner.config.asset_id,
            engine = inner.engine.name(),
            "Provisioning model"
        );

        let weak = Arc::downgrade(&inner);
        provider.provision(
            ProvisionRequest::new(&inner.config.asset_id, &inner.config.cache_key),
            Box::new(move |result: Result<Arc<dyn Model>>| match weak.upgrade() {
                Some(inner) => inner.adopt_model(result),
                None => {
                    if let Ok(model) = result {
                        debug!("Session dropped during provisioning, releasing model");
                        release_model(model.as_ref());
                    }
                }
            }),
        );

        Ok(Self { inner })
    }

    /// Start (or restart) listening.
    ///
    /// Logs a warning and does nothing if the model is not ready yet or the
    /// session is closed.
    pub fn start_listening(&self) {
        self.inner.start_listening(None);
    }

    /// Stop listening. The model stays loaded. Idempotent.
    pub fn stop_listening(&self) {
        self.inner.stop_listening();
    }

    /// Tear everything down. Only the first call has any effect.
    ///
    /// When called from outside the listener, no callback runs after this
    /// returns.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// Generation of the current (or last) recognizer. Zero before the first start.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    fn transition(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state == next {
            return;
        }
        if !state.can_transition_to(next) {
            trace!(from = %*state, to = %next, "Ignoring state transition");
            return;
        }
        debug!(from = %*state, to = %next, "Session state");
        *state = next;
    }

    fn adopt_model(&self, result: Result<Arc<dyn Model>>) {
        match result {
            Ok(model) => {
                let mut slot = lock(&self.model);
                if self.closing.load(Ordering::SeqCst) {
                    drop(slot);
                    debug!(model = model.name(), "Session closed during provisioning");
                    release_model(model.as_ref());
                    return;
                }
                info!(model = model.name(), "Model ready");
                *slot = Some(model);
                self.ready.store(true, Ordering::SeqCst);
                self.transition(SessionState::Ready);
                self.dispatcher.send(Delivery::Ready);
            }
            Err(e) => {
                if self.closing.load(Ordering::SeqCst) {
                    debug!(error = %e, "Provisioning failed after close");
                    return;
                }
                error!(error = %e, "Model provisioning failed");
                self.transition(SessionState::Failed);
                self.dispatcher.send(Delivery::Error(e));
            }
        }
    }

    /// Start a new recognizer.
    ///
    /// `expected` is set for scheduled restarts: the restart only proceeds if
    /// the session is still listening on that generation.
    fn start_listening(&self, expected: Option<u64>) {
        if self.closing.load(Ordering::SeqCst) {
            warn!("Session is closed, not listening");
            return;
        }
        if !self.ready.load(Ordering::SeqCst) {
            warn!("Model not ready, not listening");
            return;
        }

        let mut active = lock(&self.active);
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        if let Some(expected) = expected
            && (!self.listening.load(Ordering::SeqCst)
                || self.generation.load(Ordering::SeqCst) != expected)
        {
            debug!(generation = expected, "Restart superseded");
            return;
        }

        self.watchdog.disarm_all();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = active.take() {
            teardown(previous, generation - 1);
        }
        {
            let mut slot = lock(&self.utterance);
            slot.generation = generation;
            slot.tracker.reset();
            slot.restart_pending = false;
        }

        let Some(model) = lock(&self.model).clone() else {
            self.listening.store(false, Ordering::SeqCst);
            warn!(generation, "Model released, not listening");
            return;
        };

        let mut handle = match self.engine.create(&model, self.config.sample_rate) {
            Ok(handle) => handle,
            Err(e) => {
                self.fail_start(generation, e);
                return;
            }
        };

        self.listening.store(true, Ordering::SeqCst);
        self.transition(SessionState::Listening);
        self.watchdog.arm(generation);

        let listener = Arc::new(GenerationListener {
            generation,
            session: self.this.clone(),
        });
        if let Err(e) = handle.start(listener) {
            teardown(handle, generation);
            self.fail_start(generation, e);
            return;
        }

        *active = Some(handle);
        if expected.is_some() {
            debug!(generation, "Recognizer restarted");
        } else {
            info!(generation, engine = self.engine.name(), "Listening");
        }
    }

    fn fail_start(&self, generation: u64, e: EarshotError) {
        self.listening.store(false, Ordering::SeqCst);
        self.watchdog.disarm(generation);
        self.transition(SessionState::Ready);
        error!(generation, error = %e, "Failed to start recognizer");
        self.dispatcher.send(Delivery::Error(e));
    }

    fn stop_listening(&self) {
        let mut active = lock(&self.active);
        // Under the utterance lock so no handler that already accepted an
        // event can move the state after this point
        let was_listening = {
            let _slot = lock(&self.utterance);
            self.listening.swap(false, Ordering::SeqCst)
        };
        self.watchdog.disarm_all();
        self.scheduler.cancel();
        if let Some(handle) = active.take() {
            teardown(handle, self.generation.load(Ordering::SeqCst));
        }
        if was_listening {
            self.transition(SessionState::Ready);
            info!("Stopped listening");
        }
    }

    fn close(&self) {
        if self
            .closing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("Session already closed");
            return;
        }

        self.stop_listening();

        let model = {
            let mut slot = lock(&self.model);
            self.ready.store(false, Ordering::SeqCst);
            slot.take()
        };
        if let Some(model) = model {
            release_model(model.as_ref());
        }

        *lock(&self.state) = SessionState::Closed;
        self.watchdog.shutdown();
        self.scheduler.shutdown();
        // Callbacks already queued are still delivered before close returns
        self.dispatcher.send(Delivery::Shutdown);

        let workers = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Session worker thread panicked");
            }
        }
        info!("Session closed");
    }

    /// Whether an event from `generation` belongs to the live utterance.
    fn accepts(&self, generation: u64, slot: &UtteranceSlot) -> bool {
        slot.generation == generation
            && self.generation.load(Ordering::SeqCst) == generation
            && self.listening.load(Ordering::SeqCst)
    }

    /// Disarm the watchdog and schedule the next recognizer. Once per utterance.
    fn end_utterance(&self, generation: u64, slot: &mut UtteranceSlot) {
        if std::mem::replace(&mut slot.restart_pending, true) {
            return;
        }
        self.watchdog.disarm(generation);
        self.transition(SessionState::Restarting);
        self.scheduler.schedule(generation);
    }

    fn handle_partial(&self, generation: u64, payload: &str) {
        let EngineEvent::Partial { text } = decode_partial(payload) else {
            return;
        };
        let mut slot = lock(&self.utterance);
        if !self.accepts(generation, &slot) {
            trace!(generation, "Dropping partial from superseded recognizer");
            return;
        }
        slot.tracker.observe_partial(&text, Instant::now());
        self.dispatcher.send(Delivery::Partial(text));
    }

    fn handle_final(&self, generation: u64, payload: &str) {
        let decoded = decode_final(payload);
        let mut slot = lock(&self.utterance);
        if !self.accepts(generation, &slot) {
            trace!(generation, "Dropping final from superseded recognizer");
            return;
        }
        match decoded {
            EngineEvent::Final { text } if !text.is_empty() => {
                if slot.tracker.mark_final_dispatched() {
                    debug!(generation, "Final result");
                    self.dispatcher.send(Delivery::Final(text));
                } else {
                    debug!(generation, "Final already dispatched for this utterance");
                }
            }
            _ => trace!(generation, "Empty final"),
        }
        self.end_utterance(generation, &mut slot);
    }

    fn handle_timeout(&self, generation: u64) {
        let mut slot = lock(&self.utterance);
        if !self.accepts(generation, &slot) {
            return;
        }
        // The utterance already ended (possibly with an empty final)
        if slot.restart_pending {
            trace!(generation, "Timeout after end of utterance");
            return;
        }
        if let Some(text) = slot.tracker.promote_pending() {
            debug!(generation, "Engine timed out, promoting partial");
            self.dispatcher.send(Delivery::Final(text));
        }
        self.end_utterance(generation, &mut slot);
    }

    fn handle_error(&self, generation: u64, cause: EarshotError) {
        let mut slot = lock(&self.utterance);
        if !self.accepts(generation, &slot) {
            debug!(generation, error = %cause, "Dropping error from superseded recognizer");
            return;
        }
        warn!(generation, error = %cause, "Recognizer error, restarting");
        self.dispatcher.send(Delivery::Error(cause));
        self.end_utterance(generation, &mut slot);
    }
}

impl WatchdogTarget for Inner {
    fn check(&self, generation: u64) -> Tick {
        let mut slot = lock(&self.utterance);
        if !self.accepts(generation, &slot) || slot.restart_pending {
            return Tick::Stop;
        }
        match slot
            .tracker
            .take_promotable(Instant::now(), self.config.silence_timeout)
        {
            Some(text) => {
                debug!(generation, "Silence detected, promoting partial");
                self.dispatcher.send(Delivery::Final(text));
                self.end_utterance(generation, &mut slot);
                Tick::Stop
            }
            None => Tick::Continue,
        }
    }
}

impl RestartTarget for Inner {
    fn restart(&self, generation: u64) {
        self.start_listening(Some(generation));
    }
}

/// Engine listener bound to one recognizer generation.
struct GenerationListener {
    generation: u64,
    session: Weak<Inner>,
}

impl EngineListener for GenerationListener {
    fn on_partial(&self, payload: &str) {
        if let Some(session) = self.session.upgrade() {
            session.handle_partial(self.generation, payload);
        }
    }

    fn on_final(&self, payload: &str) {
        if let Some(session) = self.session.upgrade() {
            session.handle_final(self.generation, payload);
        }
    }

    fn on_result(&self, payload: &str) {
        trace!(generation = self.generation, payload, "Intermediate result ignored");
    }

    fn on_error(&self, cause: EarshotError) {
        if let Some(session) = self.session.upgrade() {
            session.handle_error(self.generation, cause);
        }
    }

    fn on_timeout(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_timeout(self.generation);
        }
    }
}

/// Stop then release, each attempted even if the other fails.
fn teardown(mut handle: Box<dyn EngineHandle>, generation: u64) {
    if let Err(e) = handle.stop() {
        warn!(generation, error = %e, "Failed to stop recognizer");
    }
    if let Err(e) = handle.release() {
        warn!(generation, error = %e, "Failed to release recognizer");
    }
}

fn release_model(model: &dyn Model) {
    if let Err(e) = model.release() {
        warn!(model = model.name(), error = %e, "Failed to release model");
    }
}
