//! # One-Shot Timer
//!
//! A timeout or retry-after-delay owned by exactly one component. The owner
//! stops it on every exit path; `stop` reports whether this call was the one
//! that prevented the timer from firing, so a second stop is a no-op.
//! Dropping the handle stops the timer as well.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const STOPPED: u8 = 2;

/// Handle of a scheduled action.
#[derive(Debug)]
pub struct Timer {
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Run `action` once after `delay` unless stopped first.
    pub fn run_after<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                action.await;
            }
        });
        Self { state, handle }
    }

    /// Stop the timer. Returns `true` only for the call that disarmed it
    /// before it fired.
    pub fn stop(&self) -> bool {
        let stopped = self
            .state
            .compare_exchange(ARMED, STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if stopped {
            self.handle.abort();
            trace!("Timer stopped");
        }
        stopped
    }

    /// Whether the action started.
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FIRED
    }

    /// Whether the timer is still waiting.
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ARMED
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
