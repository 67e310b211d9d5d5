//! Delayed restart of the recognizer after each utterance.
//!
//! At most one restart is pending. Scheduling a newer generation replaces
//! the pending one; cancelling drops it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Receiver of scheduled restarts.
pub(crate) trait RestartTarget: Send + Sync {
    /// Restart listening if `generation` is still the current one.
    fn restart(&self, generation: u64);
}

#[derive(Debug)]
enum Command {
    Schedule(u64),
    Cancel,
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct RestartScheduler {
    tx: Sender<Command>,
}

impl RestartScheduler {
    pub(crate) fn channel() -> (Self, RestartWorker) {
        let (tx, rx) = unbounded();
        (Self { tx }, RestartWorker { rx })
    }

    /// Restart `generation` after the grace delay.
    pub(crate) fn schedule(&self, generation: u64) {
        self.send(Command::Schedule(generation));
    }

    pub(crate) fn cancel(&self) {
        self.send(Command::Cancel);
    }

    pub(crate) fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.tx.send(command) {
            trace!(command = ?e.0, "Restart thread gone");
        }
    }
}

pub(crate) struct RestartWorker {
    rx: Receiver<Command>,
}

impl RestartWorker {
    pub(crate) fn spawn<T>(
        self,
        target: Weak<T>,
        delay: Duration,
    ) -> std::io::Result<JoinHandle<()>>
    where
        T: RestartTarget + 'static,
    {
        thread::Builder::new()
            .name("earshot-restart".to_string())
            .spawn(move || run(target, self.rx, delay))
    }
}

fn run<T: RestartTarget>(target: Weak<T>, rx: Receiver<Command>, delay: Duration) {
    let mut pending: Option<(u64, Instant)> = None;

    loop {
        let received = match pending {
            Some((_, deadline)) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Schedule(generation)) => {
                if let Some((superseded, _)) = pending {
                    trace!(superseded, generation, "Pending restart superseded");
                }
                pending = Some((generation, Instant::now() + delay));
            }
            Ok(Command::Cancel) => pending = None,
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let Some((generation, _)) = pending.take() else {
                    continue;
                };
                let Some(target) = target.upgrade() else {
                    break;
                };
                if catch_unwind(AssertUnwindSafe(|| target.restart(generation))).is_err() {
                    error!(generation, "Restart panicked");
                }
            }
        }
    }
    debug!("Restart thread stopped");
}
