//! Wait/timeout scheduler
//!
//! A single cancellable delay racing a timer against the "all expected
//! checks received" signal. At most one wait is pending; a newer wait
//! supersedes the older one, whose future resolves `Superseded`.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// How a wait resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The timer fired
    TimedOut,
    /// The early-completion signal arrived first
    Completed,
    /// A newer wait replaced this one
    Superseded,
}

#[derive(Default)]
struct Slot {
    tx: Option<oneshot::Sender<()>>,
    generation: u64,
}

/// The single-slot wait scheduler
#[derive(Default)]
pub struct WaitScheduler {
    slot: Mutex<Slot>,
}

/// A wait slot that is registered but not yet racing its timer
///
/// A completion signal arriving before the timer starts is buffered in
/// the channel and resolves the wait immediately once awaited.
pub struct ArmedWait {
    rx: oneshot::Receiver<()>,
    generation: u64,
}

impl WaitScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the wait slot without starting the timer
    ///
    /// Arming first closes the window where a signal lands between a
    /// completion check and the wait itself.
    pub fn arm(&self) -> ArmedWait {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut slot = self.slot.lock().unwrap();
            slot.generation += 1;
            // Dropping the previous sender resolves the superseded wait
            slot.tx = Some(tx);
            slot.generation
        };
        ArmedWait { rx, generation }
    }

    /// Race an armed slot against a timer for `ms` milliseconds
    pub async fn wait_armed(&self, armed: ArmedWait, ms: u64) -> WaitOutcome {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                let mut slot = self.slot.lock().unwrap();
                // Only clear the slot if it is still ours
                if slot.generation == armed.generation {
                    slot.tx = None;
                }
                WaitOutcome::TimedOut
            }
            signal = armed.rx => match signal {
                Ok(()) => WaitOutcome::Completed,
                Err(_) => WaitOutcome::Superseded,
            }
        }
    }

    /// Start a wait for `ms` milliseconds
    ///
    /// Resolves when the timer fires, when [`complete`](Self::complete) is
    /// called, or when another `wait` supersedes this one.
    pub async fn wait(&self, ms: u64) -> WaitOutcome {
        let armed = self.arm();
        self.wait_armed(armed, ms).await
    }

    /// Resolve the pending wait early; later signals are no-ops
    pub fn complete(&self) {
        let tx = self.slot.lock().unwrap().tx.take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    /// Whether a wait is currently pending
    pub fn is_pending(&self) -> bool {
        self.slot.lock().unwrap().tx.is_some()
    }
}
