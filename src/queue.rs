//! A cooperative, FIFO-ordered delegate-dispatch queue: every outgoing delegate call
//! schedules `queue.submit(move closure)` rather than calling the delegate directly. Every
//! façade owns one of these; every delegate callback is scheduled as a separately-queued
//! unit of work so that reentrancy from application code back into the façade does not
//! deadlock.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// A FIFO task queue a façade dispatches delegate callbacks onto.
#[derive(Clone)]
pub struct DelegateQueue {
    sender: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl DelegateQueue {
    /// Create a new queue backed by its own background worker task.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
        });
        Self { sender }
    }

    /// Schedule a delegate callback. Never blocks; ordering relative to other `submit`
    /// calls on the same queue is preserved.
    pub fn submit<F>(&self, job: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // A closed receiver means the façade's worker task has been torn down (e.g. the
        // façade was dropped); dropping the job silently is correct, there is no one left
        // to observe it.
        let _ = self.sender.send(Box::pin(job));
    }
}

impl Default for DelegateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DelegateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_fifo_order() {
        let queue = DelegateQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            queue.submit(async move {
                order.lock().unwrap().push(i);
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn reentrant_submit_does_not_deadlock() {
        let queue = DelegateQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let queue2 = queue.clone();
        let count2 = count.clone();
        queue.submit(async move {
            count2.fetch_add(1, Ordering::SeqCst);
            queue2.submit(async move {});
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
