//! Backend worker.
//!
//! The single consumer of the replication queue. Tasks are applied one at a
//! time in queue order, so a task that depends on an earlier one (a write
//! after its open) always sees that task's completed effect. Failures are
//! logged and the loop moves on; nothing is reported back to callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::oneshot;

use super::queue::TaskReceiver;
use super::task::{BackendKey, ReplicationTask};
use crate::store::{StoreFile, StoreOps};
use crate::vfs::{VfsError, VfsResult};

/// Counters shared between the worker and whoever wants to watch it.
#[derive(Debug, Default)]
pub struct ReplicationStats {
    applied: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ReplicationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub applied: u64,
    pub failed: u64,
    pub pending: u64,
}

impl ReplicationStats {
    pub fn snapshot(&self, pending: u64) -> StatsSnapshot {
        StatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending,
        }
    }
}

/// Applies replication tasks to a store.
pub struct BackendWorker {
    store: Arc<dyn StoreOps>,
    /// Backend files opened on behalf of mirror handles. Only this worker
    /// touches it.
    files: HashMap<BackendKey, StoreFile>,
    stats: Arc<ReplicationStats>,
}

impl BackendWorker {
    pub fn new(store: Arc<dyn StoreOps>, stats: Arc<ReplicationStats>) -> Self {
        Self {
            store,
            files: HashMap::new(),
            stats,
        }
    }

    /// Backend files currently held open.
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Drain `rx` until it is closed and empty.
    ///
    /// `shutdown` resolving (or its sender being dropped) stops new pushes;
    /// everything already queued is still applied.
    pub async fn run(mut self, mut rx: TaskReceiver, mut shutdown: oneshot::Receiver<()>) {
        let mut closing = false;
        loop {
            tokio::select! {
                biased;
                task = rx.pop() => match task {
                    Some(task) => {
                        self.handle(task).await;
                        rx.complete();
                    }
                    None => break,
                },
                _ = &mut shutdown, if !closing => {
                    tracing::debug!("replication queue closing");
                    rx.close();
                    closing = true;
                }
            }
        }

        for (key, file) in self.files.drain() {
            if let Err(e) = self.store.close(file).await {
                tracing::warn!(key = key.0, error = %e, "failed to close backend file at shutdown");
            }
        }
        let stats = self.stats.snapshot(0);
        tracing::info!(
            applied = stats.applied,
            failed = stats.failed,
            "backend worker exiting"
        );
    }

    /// Apply one task, logging and counting the outcome.
    pub async fn handle(&mut self, task: ReplicationTask) {
        if let ReplicationTask::Barrier { done } = task {
            // Receiver may have stopped waiting.
            let _ = done.send(());
            return;
        }
        let name = task.name();
        let path = task.path().map(|p| p.display().to_string()).unwrap_or_default();
        match self.apply(task).await {
            Ok(()) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(task = name, path = %path, "replicated");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task = name, path = %path, error = %e, "replication task failed");
            }
        }
    }

    fn resolve(&self, key: BackendKey) -> VfsResult<StoreFile> {
        self.files
            .get(&key)
            .copied()
            .ok_or_else(|| VfsError::other(format!("backend file {} was never opened", key.0)))
    }

    /// Apply one task to the store.
    pub async fn apply(&mut self, task: ReplicationTask) -> VfsResult<()> {
        match task {
            ReplicationTask::Create { path, mode, key } => {
                let file = self.store.open(&path, Some(mode)).await?;
                match key {
                    Some(key) => {
                        self.files.insert(key, file);
                        Ok(())
                    }
                    None => self.store.close(file).await,
                }
            }
            ReplicationTask::Open { path, key } => {
                let file = self.store.open(&path, None).await?;
                self.files.insert(key, file);
                Ok(())
            }
            ReplicationTask::Write {
                key, offset, data, ..
            } => {
                let file = self.resolve(key)?;
                self.store.write_at(file, offset, &data).await
            }
            ReplicationTask::TruncateHandle { key, size, .. } => {
                let file = self.resolve(key)?;
                self.store.set_len(file, size).await
            }
            ReplicationTask::Sync { key, .. } => {
                let file = self.resolve(key)?;
                self.store.sync(file).await
            }
            ReplicationTask::Close { key, .. } => {
                let file = self
                    .files
                    .remove(&key)
                    .ok_or_else(|| VfsError::other(format!("backend file {} was never opened", key.0)))?;
                self.store.close(file).await
            }
            ReplicationTask::Truncate { path, size } => self.store.truncate(&path, size).await,
            ReplicationTask::Mkdir { path, mode } => self.store.mkdir(&path, mode).await,
            ReplicationTask::Rmdir { path } => self.store.rmdir(&path).await,
            ReplicationTask::Rename { from, to } => self.store.rename(&from, &to).await,
            ReplicationTask::Unlink { path } => self.store.unlink(&path).await,
            ReplicationTask::SetTimes { path, atime, mtime } => {
                self.store.set_times(&path, atime, mtime).await
            }
            ReplicationTask::Chmod { path, mode } => self.store.chmod(&path, mode).await,
            ReplicationTask::Barrier { done } => {
                let _ = done.send(());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::channel;
    use crate::store::MemoryStore;
    use std::path::{Path, PathBuf};

    fn worker(store: &Arc<MemoryStore>) -> (BackendWorker, Arc<ReplicationStats>) {
        let stats = Arc::new(ReplicationStats::default());
        let store: Arc<dyn StoreOps> = store.clone();
        (BackendWorker::new(store, Arc::clone(&stats)), stats)
    }

    #[tokio::test]
    async fn test_keyed_tasks_resolve_in_order() {
        let store = Arc::new(MemoryStore::new());
        let (mut worker, stats) = worker(&store);
        let key = BackendKey(1);
        let path = PathBuf::from("f");

        for task in [
            ReplicationTask::Create {
                path: path.clone(),
                mode: 0o644,
                key: Some(key),
            },
            ReplicationTask::Write {
                key,
                path: path.clone(),
                offset: 0,
                data: b"hello".to_vec(),
            },
            ReplicationTask::TruncateHandle {
                key,
                path: path.clone(),
                size: 4,
            },
            ReplicationTask::Sync {
                key,
                path: path.clone(),
            },
            ReplicationTask::Close {
                key,
                path: path.clone(),
            },
        ] {
            worker.handle(task).await;
        }

        assert_eq!(
            store.journal_for("f"),
            vec!["create", "write", "set_len", "sync", "close"]
        );
        assert_eq!(store.read_all(Path::new("f")).await.unwrap(), b"hell");
        assert_eq!(stats.snapshot(0).applied, 5);
        assert_eq!(worker.open_files(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_key_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (mut worker, stats) = worker(&store);
        let key = BackendKey(9);

        // Open fails: the file does not exist on the backend.
        worker
            .handle(ReplicationTask::Open {
                path: PathBuf::from("gone"),
                key,
            })
            .await;
        worker
            .handle(ReplicationTask::Write {
                key,
                path: PathBuf::from("gone"),
                offset: 0,
                data: vec![1],
            })
            .await;
        worker
            .handle(ReplicationTask::Mkdir {
                path: PathBuf::from("after"),
                mode: 0o755,
            })
            .await;

        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.applied, 1);
        assert_eq!(store.journal_for("after"), vec!["mkdir"]);
    }

    #[tokio::test]
    async fn test_run_drains_after_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (worker, stats) = worker(&store);
        let (queue, rx) = channel();
        let (stop, shutdown) = oneshot::channel();

        for name in ["a", "b", "c"] {
            queue.push(ReplicationTask::Mkdir {
                path: PathBuf::from(name),
                mode: 0o755,
            });
        }
        stop.send(()).unwrap();
        worker.run(rx, shutdown).await;

        assert_eq!(stats.snapshot(queue.pending()).applied, 3);
        assert_eq!(queue.pending(), 0);
        assert!(queue.is_closed());
        let names: Vec<_> = store.journal().into_iter().map(|e| e.path).collect();
        assert_eq!(
            names,
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[tokio::test]
    async fn test_barrier_resolves_after_earlier_tasks() {
        let store = Arc::new(MemoryStore::with_latency(std::time::Duration::from_millis(5)));
        let (worker, _stats) = worker(&store);
        let (queue, rx) = channel();
        let (stop, shutdown) = oneshot::channel::<()>();
        let handle = tokio::spawn(worker.run(rx, shutdown));

        queue.push(ReplicationTask::Mkdir {
            path: PathBuf::from("slow"),
            mode: 0o755,
        });
        assert!(queue.flush().await);
        assert_eq!(store.journal_for("slow"), vec!["mkdir"]);

        drop(queue);
        drop(stop);
        handle.await.unwrap();
    }
}
