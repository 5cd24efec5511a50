//! Context lifecycle tests: startup loading, the persistent round trip,
//! the asset mount and configuration errors.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mirrorfs_kernel::vfs::errno;
use mirrorfs_kernel::{
    AccessMode, AssetEntry, ConfigError, ContextError, Driver, FilesystemContext, FsConfig,
    MemoryStore, OpenFlags, StartupReport, VfsError,
};

static DOCS: &[AssetEntry] = &[AssetEntry::file("guide.md", b"# guide\n")];
static ASSETS: &[AssetEntry] = &[
    AssetEntry::file("version", b"1.0\n"),
    AssetEntry::dir("docs", DOCS),
];

fn config(dirs: &[&str]) -> FsConfig {
    FsConfig::default().with_persistent_dirs(dirs.iter().copied())
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_startup_loads_existing_backend_tree() {
    let store = Arc::new(MemoryStore::new());
    store.seed_file("app/root/x", b"0123456789", 0o644).unwrap();

    let ctx = FilesystemContext::start(&config(&["app/root"]), store.clone(), None).unwrap();
    let report = ctx.startup().wait().await.unwrap();
    assert_eq!(
        report,
        StartupReport {
            directories: 0,
            files: 1,
            bytes: 10,
            skipped: 0
        }
    );
    assert_eq!(ctx.startup().report(), Some(report));

    let fs = ctx.fs();
    assert_eq!(fs.getattr(Path::new("/persistent/app/root/x")).unwrap().size, 10);
    let names: Vec<_> = fs
        .list(Path::new("/persistent/app/root"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["x"]);

    // Loading the tree is not replicated back.
    ctx.flush().await.unwrap();
    assert_eq!(ctx.replication_stats().applied, 0);
    ctx.shutdown().unwrap();
}

#[test]
fn test_persistent_mount_not_ready_until_loaded() {
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(50)));
    store.seed_file("slow/a", b"a", 0o644).unwrap();

    let ctx = FilesystemContext::start(&config(&["slow"]), store, None).unwrap();
    // Scratch root answers at once.
    ctx.fs().write_all(Path::new("/scratch.txt"), b"now").unwrap();

    let early = ctx.fs().getattr(Path::new("/persistent/slow/a"));
    if !ctx.is_ready() {
        assert!(matches!(early, Err(VfsError::NotReady)));
    }

    ctx.startup().wait_blocking().unwrap();
    assert!(ctx.is_ready());
    assert_eq!(ctx.fs().read_all(Path::new("/persistent/slow/a")).unwrap(), b"a");
    ctx.shutdown().unwrap();
}

#[test]
fn test_multiple_contexts_are_independent() {
    let first_store = Arc::new(MemoryStore::new());
    let second_store = Arc::new(MemoryStore::new());
    let first = FilesystemContext::start(&config(&["a"]), first_store.clone(), None).unwrap();
    let second = FilesystemContext::start(&config(&["a"]), second_store.clone(), None).unwrap();
    first.startup().wait_blocking().unwrap();
    second.startup().wait_blocking().unwrap();

    first.fs().write_all(Path::new("/persistent/a/only-first"), b"1").unwrap();
    first.flush_blocking().unwrap();
    second.flush_blocking().unwrap();

    assert!(!second.fs().exists(Path::new("/persistent/a/only-first")));
    assert!(second_store.journal_for("a/only-first").is_empty());
    assert_eq!(first_store.journal_for("a/only-first"), vec!["create", "write", "close"]);

    first.shutdown().unwrap();
    second.shutdown().unwrap();
}

// ============================================================================
// Persistent round trip
// ============================================================================

#[test]
fn test_small_file_round_trip() {
    let store = Arc::new(MemoryStore::new());
    let ctx = FilesystemContext::start(&config(&["app/root"]), store.clone(), None).unwrap();
    ctx.startup().wait_blocking().unwrap();

    let path = Path::new("/persistent/app/root/small_file");
    let fh = ctx.fs().create(path, 0o644, OpenFlags::create()).unwrap();
    assert_eq!(ctx.fs().write(path, fh, 0, b"hello").unwrap(), 5);
    assert_eq!(ctx.fs().read(path, fh, 0, 5).unwrap(), b"hello");

    ctx.flush_blocking().unwrap();
    assert_eq!(store.journal_for("app/root/small_file"), vec!["create", "write"]);

    ctx.fs().release(path, fh).unwrap();
    let stats = ctx.shutdown().unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(store.journal_for("app/root/small_file"), vec!["create", "write", "close"]);
}

#[test]
fn test_shutdown_drains_pending_tasks() {
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(2)));
    let ctx = FilesystemContext::start(&config(&["data"]), store.clone(), None).unwrap();
    ctx.startup().wait_blocking().unwrap();

    for i in 0..10 {
        ctx.fs()
            .mkdir(Path::new(&format!("/persistent/data/d{i}")), 0o755)
            .unwrap();
    }
    let stats = ctx.shutdown().unwrap();

    assert_eq!(stats.applied, 10);
    assert_eq!(stats.pending, 0);
    assert_eq!(store.journal_for("data/d9"), vec!["mkdir"]);
}

#[test]
fn test_root_listing_shows_mount_points() {
    let ctx = FilesystemContext::start(
        &config(&["app"]),
        Arc::new(MemoryStore::new()),
        Some(ASSETS),
    )
    .unwrap();
    ctx.startup().wait_blocking().unwrap();
    ctx.fs().mkdir(Path::new("/tmp"), 0o755).unwrap();

    let names: Vec<_> = ctx
        .fs()
        .list(Path::new("/"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["persistent", "resources", "tmp"]);
    ctx.shutdown().unwrap();
}

// ============================================================================
// Assets
// ============================================================================

#[test]
fn test_assets_are_read_only() {
    let ctx = FilesystemContext::start(&config(&[]), Arc::new(MemoryStore::new()), Some(ASSETS))
        .unwrap();
    let fs = ctx.fs();

    assert_eq!(fs.read_all(Path::new("/resources/docs/guide.md")).unwrap(), b"# guide\n");
    assert_eq!(fs.getattr(Path::new("/resources/version")).unwrap().perm, 0o444);
    assert!(fs.access(Path::new("/resources/version"), AccessMode::READ).is_ok());

    let rejected = [
        fs.mkdir(Path::new("/resources/new"), 0o755),
        fs.unlink(Path::new("/resources/version")),
        fs.truncate(Path::new("/resources/version"), 0),
        fs.rename(Path::new("/resources/version"), Path::new("/resources/v2")),
        fs.chmod(Path::new("/resources/docs"), 0o777),
        fs.create(Path::new("/resources/docs/new.md"), 0o644, OpenFlags::create())
            .map(|_| ()),
        fs.open(Path::new("/resources/version"), OpenFlags::read_write())
            .map(|_| ()),
    ];
    for result in rejected {
        assert_eq!(result.unwrap_err().errno(), errno::EROFS);
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_rejects_absolute_mount_names() {
    let err = FsConfig::from_toml_str(r#"persistent_dirs = ["app", "/etc"]"#).unwrap_err();
    assert!(matches!(err, ConfigError::AbsoluteMountName(ref name) if name == "/etc"));

    let result = FilesystemContext::start(&config(&["/etc"]), Arc::new(MemoryStore::new()), None);
    assert!(matches!(
        result,
        Err(ContextError::Config(ConfigError::AbsoluteMountName(_)))
    ));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirrorfs.toml");
    std::fs::write(
        &path,
        "persistent_root = \"/data\"\npersistent_dirs = [\"app/root\"]\nscratch_root = false\n",
    )
    .unwrap();

    let config = FsConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.persistent_dirs, vec!["app/root"]);

    let ctx = FilesystemContext::start(&config, Arc::new(MemoryStore::new()), None).unwrap();
    ctx.startup().wait_blocking().unwrap();
    assert!(ctx.fs().getattr(Path::new("/data/app/root")).unwrap().is_dir());
    assert!(ctx.fs().getattr(Path::new("/scratch")).is_err());
    ctx.shutdown().unwrap();
}
