//! Filesystem context.
//!
//! Owns everything one filesystem instance needs: the mount table, the
//! persistent mirror, the replication queue and the backend worker thread.
//! Several contexts can live in one process.
//!
//! ```text
//!   FilesystemContext::start
//!     ├─ mount "/"            MirrorDriver::scratch    (if scratch_root)
//!     ├─ mount assets_mount   AssetDriver              (if assets given)
//!     ├─ mount persistent     MirrorDriver::persistent (if persistent_dirs)
//!     └─ spawn worker thread: StartupReplicator → signal ready → BackendWorker::run
//! ```

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::config::{ConfigError, FsConfig};
use crate::constants::{DEFAULT_DIR_MODE, WORKER_THREAD_NAME};
use crate::replication::{
    BackendWorker, ReplicationQueue, ReplicationStats, StartupReplicator, StartupReport,
    StatsSnapshot, TaskReceiver, channel,
};
use crate::store::StoreOps;
use crate::vfs::{AssetDriver, AssetEntry, Driver, MirrorDriver, MountTable, VfsError};

/// Errors starting or stopping a context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create persistent directory {path} in the mirror: {source}")]
    MirrorRoot {
        path: String,
        #[source]
        source: VfsError,
    },

    #[error("failed to build backend runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("failed to spawn backend worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("backend worker stopped")]
    WorkerGone,

    #[error("backend worker panicked")]
    WorkerPanicked,
}

/// Fires once, when the persistent mount has been loaded and opened.
#[derive(Debug, Clone)]
pub struct StartupSignal {
    rx: watch::Receiver<Option<StartupReport>>,
}

impl StartupSignal {
    fn already_ready() -> Self {
        let (_tx, rx) = watch::channel(Some(StartupReport::default()));
        Self { rx }
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The startup report, once ready.
    pub fn report(&self) -> Option<StartupReport> {
        self.rx.borrow().clone()
    }

    /// Wait for readiness.
    pub async fn wait(&self) -> Result<StartupReport, ContextError> {
        let mut rx = self.rx.clone();
        let report = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ContextError::WorkerGone)?
            .clone();
        Ok(report.unwrap_or_default())
    }

    /// Blocking variant of [`wait`](Self::wait) for non-async hosts.
    pub fn wait_blocking(&self) -> Result<StartupReport, ContextError> {
        futures::executor::block_on(self.wait())
    }
}

/// One running filesystem.
#[derive(Debug)]
pub struct FilesystemContext {
    mounts: Arc<MountTable>,
    persistent: Option<Arc<MirrorDriver>>,
    queue: Option<ReplicationQueue>,
    stats: Arc<ReplicationStats>,
    startup: StartupSignal,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl FilesystemContext {
    /// Build the mount table and, when persistent directories are
    /// configured, start the backend worker.
    ///
    /// Returns as soon as the worker thread is running; use
    /// [`startup`](Self::startup) to wait for the persistent mount.
    pub fn start(
        config: &FsConfig,
        store: Arc<dyn StoreOps>,
        assets: Option<&'static [AssetEntry]>,
    ) -> Result<Self, ContextError> {
        config.validate()?;

        let mounts = MountTable::new();
        if config.scratch_root {
            mounts.mount("/", MirrorDriver::scratch(config.mirror_capacity));
        }
        if let (Some(mount_point), Some(assets)) = (&config.assets_mount, assets) {
            mounts.mount(mount_point, AssetDriver::new(assets));
        }

        let stats = Arc::new(ReplicationStats::default());
        if config.persistent_dirs.is_empty() {
            tracing::info!("no persistent directories configured; filesystem ready");
            return Ok(Self {
                mounts: Arc::new(mounts),
                persistent: None,
                queue: None,
                stats,
                startup: StartupSignal::already_ready(),
                shutdown: None,
                worker: None,
            });
        }

        let (queue, rx) = channel();
        let mirror = Arc::new(MirrorDriver::persistent(
            queue.clone(),
            config.mirror_capacity,
        ));
        for dir in &config.persistent_dirs {
            mirror
                .seed_dir(Path::new(dir), DEFAULT_DIR_MODE)
                .map_err(|source| ContextError::MirrorRoot {
                    path: dir.clone(),
                    source,
                })?;
        }
        mounts.mount_arc(&config.persistent_root, Arc::clone(&mirror) as Arc<dyn Driver>);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ContextError::Runtime)?;
        let (ready_tx, ready_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = BackendWorker::new(Arc::clone(&store), Arc::clone(&stats));
        let dirs = config.persistent_dirs.clone();
        let thread_mirror = Arc::clone(&mirror);

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(run_backend(
                    store,
                    thread_mirror,
                    dirs,
                    ready_tx,
                    worker,
                    rx,
                    shutdown_rx,
                ));
            })
            .map_err(ContextError::Spawn)?;

        tracing::debug!(
            persistent_root = %config.persistent_root.display(),
            dirs = config.persistent_dirs.len(),
            "backend worker started"
        );

        Ok(Self {
            mounts: Arc::new(mounts),
            persistent: Some(mirror),
            queue: Some(queue),
            stats,
            startup: StartupSignal { rx: ready_rx },
            shutdown: Some(shutdown_tx),
            worker: Some(handle),
        })
    }

    /// The router serving every mount.
    pub fn fs(&self) -> &MountTable {
        &self.mounts
    }

    /// Shared handle to the router, for hosts that outlive a borrow.
    pub fn mounts(&self) -> Arc<MountTable> {
        Arc::clone(&self.mounts)
    }

    /// The replicated mirror, when persistent directories are configured.
    pub fn persistent(&self) -> Option<&Arc<MirrorDriver>> {
        self.persistent.as_ref()
    }

    pub fn startup(&self) -> &StartupSignal {
        &self.startup
    }

    pub fn is_ready(&self) -> bool {
        self.startup.is_ready()
    }

    pub fn replication_stats(&self) -> StatsSnapshot {
        let pending = self.queue.as_ref().map_or(0, ReplicationQueue::pending);
        self.stats.snapshot(pending)
    }

    /// Wait until every mutation made so far has reached the backend (or
    /// failed and been logged).
    pub async fn flush(&self) -> Result<(), ContextError> {
        match &self.queue {
            Some(queue) if !queue.flush().await => Err(ContextError::WorkerGone),
            _ => Ok(()),
        }
    }

    /// Blocking variant of [`flush`](Self::flush).
    pub fn flush_blocking(&self) -> Result<(), ContextError> {
        futures::executor::block_on(self.flush())
    }

    /// Drain the queue, stop the worker and wait for it.
    ///
    /// Mutations made through surviving mount table handles after this
    /// point are kept in memory only.
    pub fn shutdown(mut self) -> Result<StatsSnapshot, ContextError> {
        if let Some(stop) = self.shutdown.take() {
            // The worker may already be gone.
            let _ = stop.send(());
        }
        self.queue = None;
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| ContextError::WorkerPanicked)?;
        }
        Ok(self.stats.snapshot(0))
    }
}

/// Body of the worker thread: load the persistent tree, open the mount,
/// then replay tasks until shutdown.
///
/// If a mirror root cannot be created the mount never opens. The ready
/// sender is dropped unsent, so waiters get [`ContextError::WorkerGone`].
async fn run_backend(
    store: Arc<dyn StoreOps>,
    mirror: Arc<MirrorDriver>,
    dirs: Vec<String>,
    ready_tx: watch::Sender<Option<StartupReport>>,
    worker: BackendWorker,
    rx: TaskReceiver,
    shutdown_rx: oneshot::Receiver<()>,
) {
    let replicator = StartupReplicator::new(store.as_ref(), &mirror);
    let report = match replicator.populate(&dirs).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "startup replication failed; persistent mount stays closed");
            return;
        }
    };
    mirror.mark_ready();
    ready_tx.send_replace(Some(report));
    worker.run(rx, shutdown_rx).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vfs::OpenFlags;

    static ASSETS: &[AssetEntry] = &[AssetEntry::file("readme.txt", b"read me")];

    fn start(dirs: &[&str], store: Arc<MemoryStore>) -> FilesystemContext {
        let config = FsConfig::default().with_persistent_dirs(dirs.iter().copied());
        FilesystemContext::start(&config, store, Some(ASSETS)).unwrap()
    }

    #[test]
    fn test_no_persistent_dirs_is_ready_immediately() {
        let ctx = start(&[], Arc::new(MemoryStore::new()));
        assert!(ctx.is_ready());
        assert!(ctx.persistent().is_none());
        ctx.fs().write_all(Path::new("/tmp.txt"), b"scratch").unwrap();
        assert_eq!(ctx.fs().read_all(Path::new("/resources/readme.txt")).unwrap(), b"read me");
        assert_eq!(ctx.shutdown().unwrap().applied, 0);
    }

    #[test]
    fn test_round_trip_through_worker() {
        let store = Arc::new(MemoryStore::new());
        let ctx = start(&["app/root"], Arc::clone(&store));
        ctx.startup().wait_blocking().unwrap();

        let path = Path::new("/persistent/app/root/small_file");
        let fh = ctx.fs().create(path, 0o644, OpenFlags::create()).unwrap();
        ctx.fs().write(path, fh, 0, b"hello").unwrap();
        assert_eq!(ctx.fs().read(path, fh, 0, 5).unwrap(), b"hello");
        ctx.fs().release(path, fh).unwrap();

        ctx.flush_blocking().unwrap();
        assert_eq!(
            store.journal_for("app/root/small_file"),
            vec!["create", "write", "close"]
        );
        let stats = ctx.shutdown().unwrap();
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.applied, 3);
    }

    #[tokio::test]
    async fn test_unseedable_root_keeps_mount_closed() {
        let (queue, rx) = channel();
        let mirror = Arc::new(MirrorDriver::persistent(queue, None));
        mirror
            .seed_file(Path::new("blocker"), b"", &crate::vfs::FileAttr::file(0, 0o644))
            .unwrap();
        let store: Arc<dyn StoreOps> = Arc::new(MemoryStore::new());
        let (ready_tx, ready_rx) = watch::channel(None);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = BackendWorker::new(Arc::clone(&store), Arc::new(ReplicationStats::default()));

        run_backend(
            store,
            Arc::clone(&mirror),
            vec!["blocker/root".to_string()],
            ready_tx,
            worker,
            rx,
            shutdown_rx,
        )
        .await;

        let signal = StartupSignal { rx: ready_rx };
        assert!(matches!(signal.wait().await, Err(ContextError::WorkerGone)));
        assert!(signal.report().is_none());
        assert!(!mirror.is_ready());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = FsConfig::default().with_persistent_dirs(["/abs"]);
        let result = FilesystemContext::start(&config, Arc::new(MemoryStore::new()), None);
        assert!(matches!(result, Err(ContextError::Config(_))));
    }
}
