//! Per-job stop/pause token bound to the process of the current attempt.
//!
//! Flags are atomics so the runner's loop can read them from the worker thread
//! while a control thread calls `stop`/`pause`/`resume`. The controller only
//! holds a `Weak` to the process; the runner owns it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::process::ProcessHandle;

/// Result of binding a freshly spawned process to a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Running,
    /// `stop()` won the race; the process has already been terminated.
    Stopped,
}

#[derive(Clone, Default)]
pub struct TaskController {
    inner: Arc<ControllerInner>,
}

#[derive(Default)]
struct ControllerInner {
    stopped: AtomicBool,
    paused: AtomicBool,
    process: Mutex<Option<Weak<dyn ProcessHandle>>>,
    /// Guards pause-flag transitions so waiters never miss a wakeup.
    gate: Mutex<()>,
    unpaused: Condvar,
}

impl std::fmt::Debug for TaskController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskController")
            .field("stopped", &self.is_stopped())
            .field("paused", &self.is_paused())
            .field("attached", &self.process().is_some())
            .finish()
    }
}

impl TaskController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    fn process(&self) -> Option<Arc<dyn ProcessHandle>> {
        self.inner.process.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Requests cancellation. Safe before any process is attached (the next
    /// attach terminates it) and after the process has exited (no-op).
    pub fn stop(&self) {
        let already = self.inner.stopped.swap(true, Ordering::SeqCst);
        let was_paused = {
            let _gate = self.inner.gate.lock();
            let was_paused = self.inner.paused.swap(false, Ordering::SeqCst);
            self.inner.unpaused.notify_all();
            was_paused
        };
        if !already {
            log::info!(target: "vidqueue::controller", "Stop requested");
        }
        if let Some(process) = self.process() {
            terminate_process(process.as_ref(), was_paused);
        }
    }

    /// Suspends the attached process. No-op when stopped or already paused.
    ///
    /// Suspend and resume calls are issued under `gate`, so each process sees
    /// them strictly alternating (Windows counts suspensions).
    pub fn pause(&self) {
        let _gate = self.inner.gate.lock();
        if self.is_stopped() || self.is_paused() {
            return;
        }
        self.inner.paused.store(true, Ordering::SeqCst);
        if let Some(process) = self.process()
            && let Err(e) = process.suspend()
        {
            log::warn!(
                target: "vidqueue::controller",
                "Failed to suspend process {}: {}",
                process.id(),
                e
            );
        }
    }

    /// Resumes a paused process and wakes the runner. No-op when not paused.
    pub fn resume(&self) {
        let _gate = self.inner.gate.lock();
        if !self.inner.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.unpaused.notify_all();
        if let Some(process) = self.process()
            && let Err(e) = process.resume()
        {
            log::warn!(
                target: "vidqueue::controller",
                "Failed to resume process {}: {}",
                process.id(),
                e
            );
        }
    }

    /// Binds the process of a new attempt. Must run before the runner reads any
    /// output. A stop that happened before this call is honored here; a pause
    /// requested before this call suspends the new process.
    pub fn attach_process(&self, process: &Arc<dyn ProcessHandle>) -> Attachment {
        {
            let _gate = self.inner.gate.lock();
            *self.inner.process.lock() = Some(Arc::downgrade(process));
            if !self.is_stopped() {
                // A pause that lands after this block finds the handle and suspends it itself.
                if self.is_paused() {
                    let _ = process.suspend();
                }
                return Attachment::Running;
            }
        }
        log::debug!(
            target: "vidqueue::controller",
            "Process {} attached after stop; terminating",
            process.id()
        );
        terminate_process(process.as_ref(), false);
        Attachment::Stopped
    }

    pub fn detach(&self) {
        *self.inner.process.lock() = None;
    }

    /// Blocks while paused. Wakes on `resume`/`stop`, and at least every `poll`
    /// to re-check the stop flag. Returns whether the controller is stopped.
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut gate = self.inner.gate.lock();
        loop {
            if self.is_stopped() {
                return true;
            }
            if !self.is_paused() {
                return false;
            }
            self.inner.unpaused.wait_for(&mut gate, poll);
        }
    }
}

/// Suspended processes do not act on SIGTERM until continued, so they are
/// resumed first and then force-killed.
fn terminate_process(process: &dyn ProcessHandle, was_paused: bool) {
    if was_paused {
        let _ = process.resume();
    }
    if let Err(e) = process.terminate() {
        log::warn!(
            target: "vidqueue::controller",
            "Failed to terminate process {}: {}",
            process.id(),
            e
        );
    }
    if was_paused {
        let _ = process.kill();
    }
}
