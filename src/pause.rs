//! Pause gate shared between a transfer loop and its controller
//!
//! The gate is a one-permit semaphore. The transfer loop takes the permit
//! around each chunk's I/O and gives it back afterwards; `pause()` takes the
//! permit and keeps it until `resume()`. The kept permit doubles as the
//! controller's "is paused" flag, so pausing twice never acquires twice and
//! resuming an open gate never releases a permit it does not own.

use crate::error::{Result, TransferError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, SemaphorePermit};

#[derive(Debug)]
pub struct PauseGate {
    permit: Arc<Semaphore>,
    held: Mutex<Option<OwnedSemaphorePermit>>,
    paused: AtomicBool,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// A new gate starts open
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            held: Mutex::new(None),
            paused: AtomicBool::new(false),
        }
    }

    /// Close the gate. Waits for the in-flight chunk (if any) to finish, so
    /// once this returns no further chunk I/O happens until `resume()`.
    ///
    /// Returns `false` when the gate was already paused.
    pub async fn pause(&self) -> bool {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return false;
        }
        // The semaphore is never closed, so this only fails if that invariant breaks.
        match self.permit.clone().acquire_owned().await {
            Ok(p) => {
                *held = Some(p);
                self.paused.store(true, Ordering::SeqCst);
                true
            }
            Err(_) => false,
        }
    }

    /// Reopen the gate. Returns `false` when it was not paused.
    pub async fn resume(&self) -> bool {
        let mut held = self.held.lock().await;
        match held.take() {
            Some(p) => {
                self.paused.store(false, Ordering::SeqCst);
                drop(p);
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Non-blocking resume for drop paths; skipped if a pause/resume is mid-flight
    pub(crate) fn release_if_paused(&self) {
        if let Ok(mut held) = self.held.try_lock() {
            if held.take().is_some() {
                self.paused.store(false, Ordering::SeqCst);
            }
        }
    }

    /// `None` while the controller holds the gate closed
    pub(crate) fn try_enter(&self) -> Option<SemaphorePermit<'_>> {
        self.permit.try_acquire().ok()
    }

    /// Held by the transfer loop for the duration of one chunk
    pub(crate) async fn enter(&self) -> Result<SemaphorePermit<'_>> {
        self.permit
            .acquire()
            .await
            .map_err(|_| TransferError::protocol("pause gate closed"))
    }
}
