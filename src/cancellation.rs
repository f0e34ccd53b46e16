//! Cancellation: generation counter + CancellationToken.
//! Ensures stale timers and stale translation results are ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Each advance cancels the prior token and bumps the generation. Work
/// started under an older generation is stale when it reports back.
pub struct TaskGeneration {
    current_token: CancellationToken,
    generation: u64,
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: CancellationToken::new(),
            generation: 0,
        }
    }

    /// Cancel current work, advance, return a child token for the new generation.
    pub fn cancel_and_advance(&mut self) -> (CancellationToken, u64) {
        self.current_token.cancel();
        self.current_token = CancellationToken::new();
        self.generation += 1;
        (self.current_token.child_token(), self.generation)
    }

    /// Child token for the current generation without cancelling.
    pub fn child_token(&self) -> (CancellationToken, u64) {
        (self.current_token.child_token(), self.generation)
    }

    #[inline]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// A re-armable one-shot timer. Arming replaces (and cancels) whatever was
/// armed before; the fire message carries the generation it was armed under.
pub struct TimerSlot {
    generation: TaskGeneration,
    armed: bool,
}

impl Default for TimerSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSlot {
    pub fn new() -> Self {
        Self {
            generation: TaskGeneration::new(),
            armed: false,
        }
    }

    /// Send `make(generation)` on `tx` after `delay` unless cancelled first.
    pub fn arm<T, F>(&mut self, delay: Duration, tx: mpsc::UnboundedSender<T>, make: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        let (token, generation) = self.generation.cancel_and_advance();
        self.armed = true;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(make(generation));
                }
                _ = token.cancelled() => {}
            }
        });
        generation
    }

    /// Cancel the pending fire, if any.
    pub fn cancel(&mut self) {
        if self.armed {
            self.generation.cancel_and_advance();
            self.armed = false;
        }
    }

    /// Accept a fire: true only for the latest arm that has not been cancelled.
    /// Disarms the slot.
    pub fn take_fire(&mut self, generation: u64) -> bool {
        if self.armed && self.generation.is_current(generation) {
            self.armed = false;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
