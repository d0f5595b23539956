//! Cancellable delay scheduling: every scheduled delay is a cancellable timer, never a bare
//! `sleep` on the task. Every `*Delay` config knob and every long-running scan loop is
//! scheduled through here so `unregister_*`/`reset` can cancel deterministically.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A handle to a scheduled unit of work. Dropping it does *not* cancel the task (matching
/// `JoinHandle` semantics); callers that need deterministic teardown must call `cancel()`.
pub struct DelayHandle {
    handle: JoinHandle<()>,
}

impl DelayHandle {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Sleep for `delay` (or run immediately if zero), then run `f`. Returns a handle the
/// owner can cancel.
pub fn schedule<F>(delay: Duration, f: F) -> DelayHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        f.await;
    });
    DelayHandle { handle }
}

/// Spawn a long-running task (e.g. a scan loop) that is not itself delayed, but is tracked
/// the same way so it can be cancelled.
pub fn spawn<F>(f: F) -> DelayHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    DelayHandle { handle: tokio::spawn(f) }
}
