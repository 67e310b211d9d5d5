//! Silence watchdog.
//!
//! A single timer thread that ticks every `period` while armed for a
//! listening generation. Commands are processed in the order they were sent,
//! so a disarm always takes effect before a later arm.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Outcome of one watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Keep ticking for this generation.
    Continue,
    /// Stop ticking; the generation is finished or superseded.
    Stop,
}

/// What the watchdog checks on every tick.
pub(crate) trait WatchdogTarget: Send + Sync {
    fn check(&self, generation: u64) -> Tick;
}

#[derive(Debug)]
enum Command {
    Arm(u64),
    Disarm(u64),
    DisarmAll,
    Shutdown,
}

/// Handle used by the session to control the watchdog thread.
#[derive(Debug)]
pub(crate) struct Watchdog {
    tx: Sender<Command>,
}

impl Watchdog {
    pub(crate) fn channel() -> (Self, WatchdogWorker) {
        let (tx, rx) = unbounded();
        (Self { tx }, WatchdogWorker { rx })
    }

    /// Start ticking for `generation`, replacing any previous arming.
    pub(crate) fn arm(&self, generation: u64) {
        self.send(Command::Arm(generation));
    }

    /// Stop ticking if still armed for `generation`.
    pub(crate) fn disarm(&self, generation: u64) {
        self.send(Command::Disarm(generation));
    }

    pub(crate) fn disarm_all(&self) {
        self.send(Command::DisarmAll);
    }

    pub(crate) fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.tx.send(command) {
            trace!(command = ?e.0, "Watchdog thread gone");
        }
    }
}

/// Receiving half, moved onto the timer thread.
pub(crate) struct WatchdogWorker {
    rx: Receiver<Command>,
}

impl WatchdogWorker {
    /// Spawn the timer thread. It holds only a weak reference to `target`
    /// and exits once the target is gone or on shutdown.
    pub(crate) fn spawn<T>(
        self,
        target: Weak<T>,
        period: Duration,
    ) -> std::io::Result<JoinHandle<()>>
    where
        T: WatchdogTarget + 'static,
    {
        thread::Builder::new()
            .name("earshot-watchdog".to_string())
            .spawn(move || run(target, self.rx, period))
    }
}

fn run<T: WatchdogTarget>(target: Weak<T>, rx: Receiver<Command>, period: Duration) {
    // (generation, next tick)
    let mut armed: Option<(u64, Instant)> = None;

    loop {
        let received = match armed {
            Some((_, deadline)) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Arm(generation)) => {
                trace!(generation, "Watchdog armed");
                armed = Some((generation, Instant::now() + period));
            }
            Ok(Command::Disarm(generation)) => {
                if armed.is_some_and(|(current, _)| current == generation) {
                    trace!(generation, "Watchdog disarmed");
                    armed = None;
                }
            }
            Ok(Command::DisarmAll) => armed = None,
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let Some((generation, deadline)) = armed else {
                    continue;
                };
                let Some(target) = target.upgrade() else {
                    break;
                };
                let tick = catch_unwind(AssertUnwindSafe(|| target.check(generation)))
                    .unwrap_or_else(|_| {
                        error!(generation, "Watchdog check panicked");
                        Tick::Continue
                    });
                armed = match tick {
                    Tick::Continue => Some((generation, deadline + period)),
                    Tick::Stop => None,
                };
            }
        }
    }
    debug!("Watchdog thread stopped");
}
