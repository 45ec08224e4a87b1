//! Per-slot exclusive locks with interruptible, bounded waits.
//!
//! Each slot identifier (a fingerprint or a special name) has its own
//! lock, so writers of different slots never contend. A waiter gives up
//! with `Interrupted` when its [`Interrupt`] is triggered or the configured
//! timeout elapses.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Cancellation token observed by lock waits.
///
/// Clones share state: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// A fresh, untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Reset the token so later operations can proceed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether the token has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wait bounds shared by in-process and backend lock acquisition.
#[derive(Debug, Clone)]
pub(crate) struct LockWait<'a> {
    pub interrupt: &'a Interrupt,
    pub deadline: Instant,
    pub poll: Duration,
}

impl LockWait<'_> {
    /// Fail with `Interrupted` if the wait must end.
    pub fn check(&self, slot: &str) -> Result<()> {
        if self.interrupt.is_cancelled() {
            return Err(Error::Interrupted(format!(
                "cancelled while waiting for lock on {}",
                slot
            )));
        }
        if Instant::now() >= self.deadline {
            return Err(Error::Interrupted(format!(
                "timed out waiting for lock on {}",
                slot
            )));
        }
        Ok(())
    }
}

/// In-process registry of held slot locks.
#[derive(Debug, Default)]
pub(crate) struct SlotLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl SlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `slot` is free, then take it.
    pub fn acquire(&self, slot: &str, wait: &LockWait<'_>) -> Result<SlotGuard<'_>> {
        let mut held = self.held.lock();
        while held.contains(slot) {
            wait.check(slot)?;
            self.released.wait_for(&mut held, wait.poll);
        }
        wait.check(slot)?;
        held.insert(slot.to_string());
        tracing::debug!(slot, "slot lock acquired");

        Ok(SlotGuard {
            locks: self,
            slot: slot.to_string(),
        })
    }

    #[cfg(test)]
    fn is_held(&self, slot: &str) -> bool {
        self.held.lock().contains(slot)
    }
}

/// Releases its slot on drop.
#[derive(Debug)]
pub(crate) struct SlotGuard<'a> {
    locks: &'a SlotLocks,
    slot: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.slot);
        self.locks.released.notify_all();
        tracing::debug!(slot = %self.slot, "slot lock released");
    }
}
