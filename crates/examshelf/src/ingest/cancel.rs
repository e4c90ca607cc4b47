//! Cooperative cancellation for running jobs.
//!
//! Each worker registers a flag under its job ID. A cancel request
//! flips the flag; the worker observes it between items and stops
//! without touching state the canceller already finalized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A worker-side view of one job's cancellation flag.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Registry of cancellation flags for all running jobs.
#[derive(Default)]
pub struct CancellationRegistry {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        // A flag map is always in a consistent state; recover from a
        // poisoned lock rather than propagating the panic.
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a job and returns its handle. Re-registering replaces
    /// the previous flag.
    pub fn register(&self, job_id: &str) -> CancelHandle {
        let flag = Arc::new(AtomicBool::new(false));
        self.lock().insert(job_id.to_string(), Arc::clone(&flag));
        CancelHandle { flag }
    }

    /// Signals cancellation. Returns false when no worker is
    /// registered for the job (already finished or never started).
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Removes a finished job from the registry.
    pub fn remove(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}
