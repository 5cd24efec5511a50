//! Replication queue.
//!
//! Multi-producer, single-consumer FIFO between caller threads and the
//! backend worker. Pushing never blocks; popping suspends only the worker.
//!
//! ```text
//!   caller threads          unbounded mpsc          BackendWorker
//!   ┌──────────────┐  push  ┌──────────────┐  pop   ┌───────────────┐
//!   │ MirrorDriver │ ─────▶ │  FIFO tasks  │ ─────▶ │ StoreOps      │
//!   └──────────────┘        └──────────────┘        └───────────────┘
//! ```
//!
//! Global order across producers is the order in which `push` calls
//! complete. The mirror pushes while still holding its own write lock, so
//! queue order equals mirror mutation order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use super::task::{BackendKey, ReplicationTask};

/// Producer side. Cheap to clone; every clone feeds the same worker.
#[derive(Debug, Clone)]
pub struct ReplicationQueue {
    tx: mpsc::UnboundedSender<ReplicationTask>,
    pending: Arc<AtomicU64>,
    next_key: Arc<AtomicU64>,
}

/// Consumer side, owned by the single worker.
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<ReplicationTask>,
    pending: Arc<AtomicU64>,
}

/// Create a connected queue/receiver pair.
pub fn channel() -> (ReplicationQueue, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicU64::new(0));
    (
        ReplicationQueue {
            tx,
            pending: Arc::clone(&pending),
            next_key: Arc::new(AtomicU64::new(1)),
        },
        TaskReceiver { rx, pending },
    )
}

impl ReplicationQueue {
    /// Enqueue a task. Returns false (and drops the task) once the worker
    /// has shut down.
    pub fn push(&self, task: ReplicationTask) -> bool {
        let name = task.name();
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.send(task) {
            Ok(()) => true,
            Err(mpsc::error::SendError(task)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                tracing::warn!(
                    task = name,
                    path = ?task.path(),
                    "replication queue closed; dropping task"
                );
                false
            }
        }
    }

    /// Allocate a key for a new writable handle.
    pub fn next_key(&self) -> BackendKey {
        BackendKey(self.next_key.fetch_add(1, Ordering::Relaxed))
    }

    /// Tasks pushed but not yet finished by the worker.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the worker stopped accepting tasks.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until every task pushed before this call has been attempted.
    ///
    /// Returns false if the worker is gone.
    pub async fn flush(&self) -> bool {
        let (done, wait) = oneshot::channel();
        if !self.push(ReplicationTask::Barrier { done }) {
            return false;
        }
        wait.await.is_ok()
    }
}

impl TaskReceiver {
    /// Await the oldest task. `None` once closed and drained.
    pub async fn pop(&mut self) -> Option<ReplicationTask> {
        self.rx.recv().await
    }

    /// Blocking variant of [`pop`](Self::pop), for use outside a runtime.
    pub fn blocking_pop(&mut self) -> Option<ReplicationTask> {
        self.rx.blocking_recv()
    }

    /// Pop without waiting; `None` when the queue is currently empty.
    pub fn try_pop(&mut self) -> Option<ReplicationTask> {
        self.rx.try_recv().ok()
    }

    /// Mark the oldest popped task as finished.
    pub fn complete(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Refuse further pushes; already queued tasks can still be popped.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
