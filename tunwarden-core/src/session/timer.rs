//! Cancellable single-shot timers
//!
//! A timer does not act on its own: when it elapses it posts a message tagged
//! with its generation back into the supervisor's command channel. The
//! supervisor asks the slot whether that generation is still current, so a
//! timer that was cancelled or re-armed can never act late.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: 0,
            handle: None,
        }
    }

    /// Arm the timer, replacing any previous arming
    ///
    /// `message` builds the command to post, given the generation.
    pub fn arm<T, F>(&mut self, after: Duration, tx: mpsc::UnboundedSender<T>, message: F) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let name = self.name;

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trace!(timer = name, generation, "Timer elapsed");
            let _ = tx.send(message(generation));
        }));

        trace!(timer = name, generation, ?after, "Timer armed");
        generation
    }

    /// Cancel the timer; safe to call any number of times
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            trace!(timer = self.name, generation = self.generation, "Timer cancelled");
        }
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Accept an elapsed message if it belongs to the current arming
    ///
    /// Returns false for stale generations. A current firing disarms the slot.
    pub fn take_fired(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            self.generation = self.generation.wrapping_add(1);
            true
        } else {
            false
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
