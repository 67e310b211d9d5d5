//! Serialized delivery of consumer callbacks.
//!
//! Every callback a session produces is queued here and replayed on one
//! dedicated thread, so the consumer never sees two callbacks at once and
//! sees them in the order they were queued. Shutdown is queued like any
//! other delivery; callbacks queued after it are dropped.

use crate::error::EarshotError;
use crate::session::listener::SessionListener;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// A queued consumer callback.
#[derive(Debug)]
pub(crate) enum Delivery {
    Ready,
    Partial(String),
    Final(String),
    Error(EarshotError),
    Shutdown,
}

impl Delivery {
    fn kind(&self) -> &'static str {
        match self {
            Delivery::Ready => "ready",
            Delivery::Partial(_) => "partial",
            Delivery::Final(_) => "final",
            Delivery::Error(_) => "error",
            Delivery::Shutdown => "shutdown",
        }
    }
}

/// Sending half, owned by the session.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    tx: Sender<Delivery>,
}

/// Receiving half, moved onto the delivery thread.
pub(crate) struct DeliveryWorker {
    rx: Receiver<Delivery>,
    listener: Arc<dyn SessionListener>,
}

impl Dispatcher {
    pub(crate) fn channel(listener: Arc<dyn SessionListener>) -> (Self, DeliveryWorker) {
        let (tx, rx) = unbounded();
        (Self { tx }, DeliveryWorker { rx, listener })
    }

    pub(crate) fn send(&self, delivery: Delivery) {
        if let Err(e) = self.tx.send(delivery) {
            debug!(kind = e.0.kind(), "Delivery thread gone, dropping callback");
        }
    }
}

impl DeliveryWorker {
    /// Run the delivery loop on a new thread.
    ///
    /// The thread exits on [`Delivery::Shutdown`] or once every
    /// [`Dispatcher`] has been dropped and the queue is drained.
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("earshot-delivery".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        while let Ok(delivery) = self.rx.recv() {
            if matches!(delivery, Delivery::Shutdown) {
                break;
            }
            let kind = delivery.kind();
            let listener = &self.listener;
            let outcome = catch_unwind(AssertUnwindSafe(|| match delivery {
                Delivery::Ready => listener.on_ready(),
                Delivery::Partial(text) => listener.on_partial_result(&text),
                Delivery::Final(text) => listener.on_final_result(&text),
                Delivery::Error(e) => listener.on_error(&e),
                Delivery::Shutdown => {}
            }));
            if outcome.is_err() {
                error!(kind, "Session listener panicked");
            }
        }
        debug!("Delivery thread stopped");
    }
}
