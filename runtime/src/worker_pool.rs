//! Delayed (Worker Pool) Module (spec §4.6): `$delayed.run(fn)` enqueues
//! onto a bounded FIFO, `pool_size` workers drain it and submit each task
//! to the VM dispatcher, capping how many background submissions are
//! in-flight toward the instance's single isolate at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use m3m_types::error::RuntimeError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::dispatcher::{DispatcherHandle, Invocation};

const DEFAULT_POOL_SIZE: usize = 5;
const DEFAULT_JOB_DEADLINE: Duration = Duration::from_secs(60);

pub type TicketId = u64;

struct QueuedTask {
    handler: usize,
}

pub struct WorkerPool {
    task_tx: mpsc::Sender<QueuedTask>,
    next_ticket: AtomicU64,
}

impl WorkerPool {
    pub fn new(dispatcher: DispatcherHandle, pool_size: usize) -> Arc<Self> {
        Self::with_capacity(dispatcher, pool_size.max(1), pool_size.max(1) * 4)
    }

    pub fn with_capacity(dispatcher: DispatcherHandle, pool_size: usize, capacity: usize) -> Arc<Self> {
        let (task_tx, task_rx) = mpsc::channel(capacity.max(1));
        let task_rx = Arc::new(AsyncMutex::new(task_rx));

        for _ in 0..pool_size.max(1) {
            let rx = task_rx.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    match next {
                        Some(task) => {
                            // Concurrency cap is enforced structurally: only
                            // `pool_size` of these loops exist, and each one
                            // blocks on this dispatch before taking the next
                            // item (spec §4.6 "caps concurrency of pending
                            // submissions at pool_size").
                            let _ = dispatcher
                                .dispatch(Invocation::Job { handler: task.handler }, DEFAULT_JOB_DEADLINE)
                                .await;
                        }
                        None => return, // pool dropped
                    }
                }
            });
        }

        Arc::new(WorkerPool { task_tx, next_ticket: AtomicU64::new(1) })
    }

    pub fn default_size(dispatcher: DispatcherHandle) -> Arc<Self> {
        Self::new(dispatcher, DEFAULT_POOL_SIZE)
    }

    /// Enqueues `handler` and returns immediately with a ticket id, or
    /// `PoolSaturated` if the bounded FIFO is full (spec §4.6).
    pub fn run(&self, handler: usize) -> Result<TicketId, RuntimeError> {
        self.task_tx
            .try_send(QueuedTask { handler })
            .map_err(|_| RuntimeError::PoolSaturated)?;
        Ok(self.next_ticket.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc as tmpsc;

    #[tokio::test(flavor = "current_thread")]
    async fn overflow_is_reported_not_dropped_silently() {
        let (tx, _rx) = tmpsc::channel(1);
        let dispatcher = DispatcherHandle::new(tx);
        // Single-threaded runtime: the spawned worker loop cannot run until
        // we yield, so calling `run` twice back-to-back deterministically
        // fills a capacity-1 queue before anything drains it.
        let pool = WorkerPool::with_capacity(dispatcher, 1, 1);

        assert!(pool.run(0).is_ok());
        assert!(matches!(pool.run(1), Err(RuntimeError::PoolSaturated)));
    }
}
