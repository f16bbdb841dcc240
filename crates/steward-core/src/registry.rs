//! In-flight execution registry.
//!
//! Owns the live [`ExecutionHandle`] for every running invocation, keyed by
//! user id. This is what enforces the single-in-flight-per-user invariant
//! (a second request while one is running is rejected, never queued) and
//! what lets a concurrent cancel control command - or process-wide shutdown -
//! reach a process owned by another task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::supervisor::ProcessTerminator;

#[derive(Error, Debug)]
#[error("command already in progress for user {0}")]
pub struct AlreadyRunning(pub i64);

/// The live representation of one in-flight agent invocation.
pub struct ExecutionHandle {
    user_id: i64,
    started_at: Instant,
    cancelled: Arc<AtomicBool>,
    process: Mutex<Option<ProcessTerminator>>,
}

impl ExecutionHandle {
    fn new(user_id: i64) -> Self {
        Self {
            user_id,
            started_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
            process: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The flag the supervisor polls; shared so cancellation works even
    /// before the subprocess has been attached.
    pub fn cancel_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Park the spawned process so a concurrent cancel can signal it.
    pub fn attach_process(&self, terminator: ProcessTerminator) {
        if let Ok(mut guard) = self.process.lock() {
            *guard = Some(terminator);
        }
        // A cancel may have raced the spawn; deliver the signal now.
        if self.is_cancelled() {
            self.signal_process();
        }
    }

    /// Non-blocking cancellation: set the flag and signal the process group
    /// if a process is attached. Safe to call at any point in the handle's
    /// life, from any thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.signal_process();
    }

    fn signal_process(&self) {
        if let Ok(guard) = self.process.lock() {
            if let Some(terminator) = guard.as_ref() {
                terminator.terminate();
            }
        }
    }
}

/// Registry of all in-flight handles, keyed by user id.
#[derive(Default)]
pub struct HandleRegistry {
    active: Mutex<HashMap<i64, Arc<ExecutionHandle>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution for a user.
    ///
    /// Fails with [`AlreadyRunning`] when the user already has an in-flight
    /// handle. The returned guard releases the slot on drop, so every exit
    /// path out of the coordinator - success, timeout, cancel, panic during
    /// a test - produces exactly one release.
    pub fn begin(&self, user_id: i64) -> Result<ActiveExecution<'_>, AlreadyRunning> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(&user_id) {
            return Err(AlreadyRunning(user_id));
        }
        let handle = Arc::new(ExecutionHandle::new(user_id));
        active.insert(user_id, Arc::clone(&handle));
        Ok(ActiveExecution {
            registry: self,
            handle,
        })
    }

    /// True when the user has an in-flight execution.
    pub fn is_active(&self, user_id: i64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&user_id)
    }

    /// Cancel the user's active execution, if any. Returns whether a live
    /// handle was signalled; cancelling an idle user is a no-op.
    pub fn cancel(&self, user_id: i64) -> bool {
        let handle = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.get(&user_id).cloned()
        };
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight execution (process-wide shutdown). Returns the
    /// number of handles signalled.
    pub fn cancel_all(&self) -> usize {
        let handles: Vec<Arc<ExecutionHandle>> = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.values().cloned().collect()
        };
        for handle in &handles {
            log::info!("cancelling in-flight execution for user {}", handle.user_id());
            handle.cancel();
        }
        handles.len()
    }

    /// Number of in-flight executions.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Block until every in-flight execution has released, or the timeout
    /// passes. Used on shutdown after [`Self::cancel_all`].
    pub fn await_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.active_count() == 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        self.active_count() == 0
    }

    fn release(&self, user_id: i64, handle: &Arc<ExecutionHandle>) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.get(&user_id) {
            if Arc::ptr_eq(current, handle) {
                active.remove(&user_id);
            }
        }
    }
}

/// RAII guard for one registered execution; releases the user's slot on drop.
pub struct ActiveExecution<'a> {
    registry: &'a HandleRegistry,
    handle: Arc<ExecutionHandle>,
}

impl ActiveExecution<'_> {
    pub fn handle(&self) -> &ExecutionHandle {
        &self.handle
    }
}

impl Drop for ActiveExecution<'_> {
    fn drop(&mut self) {
        self.registry.release(self.handle.user_id(), &self.handle);
    }
}
