//! End-to-end replication tests.
//!
//! Every test drives a real [`FilesystemContext`] (mount table, mirror,
//! queue, worker thread) against a journaling [`MemoryStore`] and compares
//! what the backend ended up with against what callers saw.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mirrorfs_kernel::{Driver, FilesystemContext, FsConfig, MemoryStore, MountTable, OpenFlags};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const ROOT: &str = "/persistent/app/root";

type Tree = BTreeMap<String, Option<Vec<u8>>>;

// ============================================================================
// Shared test setup
// ============================================================================

fn start(store: &Arc<MemoryStore>) -> FilesystemContext {
    let config = FsConfig::default().with_persistent_dirs(["app/root"]);
    let ctx = FilesystemContext::start(&config, store.clone(), None).unwrap();
    ctx.startup().wait_blocking().unwrap();
    ctx
}

/// Route worker logs through the test harness so a failing run shows the
/// `warn!` lines for tasks the backend rejected.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("mirrorfs_kernel=debug"))
        .with_test_writer()
        .try_init();
}

fn at(name: &str) -> PathBuf {
    Path::new(ROOT).join(name)
}

/// Everything below `ROOT` as seen through the mount table.
fn mirror_tree(fs: &MountTable) -> Tree {
    let mut tree = Tree::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(dir) = pending.pop() {
        for entry in fs.list(&Path::new(ROOT).join(&dir)).unwrap() {
            let relative = dir.join(&entry.name);
            let key = relative.to_string_lossy().into_owned();
            if entry.kind.is_dir() {
                tree.insert(key, None);
                pending.push(relative);
            } else {
                let data = fs.read_all(&at(&key)).unwrap();
                tree.insert(key, Some(data));
            }
        }
    }
    tree
}

/// Everything below `app/root` on the backend.
fn backend_tree(store: &MemoryStore) -> Tree {
    store
        .snapshot()
        .into_iter()
        .filter_map(|(path, data)| {
            let relative = path.strip_prefix("app/root").ok()?;
            if relative.as_os_str().is_empty() {
                return None;
            }
            Some((relative.to_string_lossy().into_owned(), data))
        })
        .collect()
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_interleaved_producers_replicate_in_order() {
    let store = Arc::new(MemoryStore::new());
    let ctx = start(&store);
    let fs = ctx.mounts();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let fs = Arc::clone(&fs);
            std::thread::spawn(move || {
                let dir = at(&format!("t{t}"));
                fs.mkdir(&dir, 0o755).unwrap();
                let path = dir.join("log");
                let fh = fs.create(&path, 0o644, OpenFlags::create()).unwrap();
                for chunk in 0..20u64 {
                    let line = format!("{t}:{chunk:02}\n");
                    fs.write(&path, fh, chunk * line.len() as u64, line.as_bytes())
                        .unwrap();
                }
                fs.release(&path, fh).unwrap();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    ctx.flush_blocking().unwrap();
    assert_eq!(backend_tree(&store), mirror_tree(ctx.fs()));

    for t in 0..4 {
        let path = format!("app/root/t{t}/log");
        let mut expected = vec!["create"];
        expected.extend(std::iter::repeat_n("write", 20));
        expected.push("close");
        assert_eq!(store.journal_for(&path), expected);

        // The directory reached the backend before the file inside it.
        let journal = store.journal();
        let mkdir = journal
            .iter()
            .position(|e| e.path == Path::new(&format!("app/root/t{t}")))
            .unwrap();
        let create = journal
            .iter()
            .position(|e| e.path == Path::new(&path))
            .unwrap();
        assert!(mkdir < create);
    }

    let stats = ctx.shutdown().unwrap();
    assert_eq!(stats.failed, 0);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_failed_task_does_not_stall_queue() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let ctx = start(&store);
    store.fail_path("app/root/bad");

    ctx.fs().write_all(&at("bad"), b"lost").unwrap();
    ctx.fs().write_all(&at("good"), b"kept").unwrap();
    ctx.flush_blocking().unwrap();

    // The mirror stays authoritative for callers.
    assert_eq!(ctx.fs().read_all(&at("bad")).unwrap(), b"lost");
    assert!(store.journal_for("app/root/bad").is_empty());
    assert_eq!(store.journal_for("app/root/good"), vec!["create", "write", "close"]);

    let stats = ctx.replication_stats();
    assert!(stats.failed >= 1);
    assert_eq!(stats.applied, 3);
    ctx.shutdown().unwrap();
}

#[test]
fn test_release_before_backend_open_keeps_writes() {
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(20)));
    let ctx = start(&store);
    let path = at("quick");

    let fh = ctx.fs().create(&path, 0o600, OpenFlags::create()).unwrap();
    ctx.fs().write(&path, fh, 0, b"first ").unwrap();
    ctx.fs().write(&path, fh, 6, b"second").unwrap();
    ctx.fs().release(&path, fh).unwrap();

    // Served from memory while the backend is still catching up.
    assert_eq!(ctx.fs().read_all(&path).unwrap(), b"first second");

    ctx.flush_blocking().unwrap();
    assert_eq!(
        backend_tree(&store).get("quick"),
        Some(&Some(b"first second".to_vec()))
    );
    ctx.shutdown().unwrap();
}

// ============================================================================
// Reference model replay
// ============================================================================

const FILES: [&str; 4] = ["f1", "f2", "sub/f3", "sub/f4"];

#[derive(Debug, Clone)]
enum Op {
    Write {
        name: &'static str,
        offset: u64,
        data: Vec<u8>,
    },
    Truncate {
        name: &'static str,
        size: u64,
    },
    Unlink {
        name: &'static str,
    },
    Rename {
        from: &'static str,
        to: &'static str,
    },
    MkdirSub,
    RmdirSub,
}

impl Op {
    fn random(rng: &mut StdRng) -> Self {
        let name = FILES[rng.gen_range(0..FILES.len())];
        match rng.gen_range(0..10) {
            0..=3 => Op::Write {
                name,
                offset: rng.gen_range(0..48),
                data: (0..rng.gen_range(1..16)).map(|_| rng.r#gen()).collect(),
            },
            4 => Op::Truncate {
                name,
                size: rng.gen_range(0..32),
            },
            5 => Op::Unlink { name },
            6 => {
                let to = FILES[rng.gen_range(0..FILES.len())];
                if to == name {
                    Op::Unlink { name }
                } else {
                    Op::Rename { from: name, to }
                }
            }
            7 | 8 => Op::MkdirSub,
            _ => Op::RmdirSub,
        }
    }
}

/// Flat model of the tree below `ROOT`.
#[derive(Debug, Default)]
struct Model {
    files: BTreeMap<&'static str, Vec<u8>>,
    sub: bool,
}

impl Model {
    fn parent_exists(&self, name: &str) -> bool {
        !name.starts_with("sub/") || self.sub
    }

    /// Apply `op`, returning whether it should succeed.
    fn apply(&mut self, op: &Op) -> bool {
        match op {
            Op::Write { name, offset, data } => {
                if !self.parent_exists(name) {
                    return false;
                }
                let file = self.files.entry(name).or_default();
                let end = *offset as usize + data.len();
                if file.len() < end {
                    file.resize(end, 0);
                }
                file[*offset as usize..end].copy_from_slice(data);
                true
            }
            Op::Truncate { name, size } => match self.files.get_mut(name) {
                Some(file) => {
                    file.resize(*size as usize, 0);
                    true
                }
                None => false,
            },
            Op::Unlink { name } => self.files.remove(name).is_some(),
            Op::Rename { from, to } => {
                if !self.files.contains_key(from) || !self.parent_exists(to) {
                    return false;
                }
                if let Some(data) = self.files.remove(from) {
                    self.files.insert(to, data);
                }
                true
            }
            Op::MkdirSub => !std::mem::replace(&mut self.sub, true),
            Op::RmdirSub => {
                if !self.sub || self.files.keys().any(|name| name.starts_with("sub/")) {
                    return false;
                }
                self.sub = false;
                true
            }
        }
    }

    fn tree(&self) -> Tree {
        let mut tree: Tree = self
            .files
            .iter()
            .map(|(name, data)| (name.to_string(), Some(data.clone())))
            .collect();
        if self.sub {
            tree.insert("sub".to_string(), None);
        }
        tree
    }
}

fn run(fs: &MountTable, op: &Op) -> bool {
    match op {
        Op::Write { name, offset, data } => {
            let path = at(name);
            let Ok(fh) = fs.create(&path, 0o644, OpenFlags::create()) else {
                return false;
            };
            let written = fs.write(&path, fh, *offset, data);
            fs.release(&path, fh).unwrap();
            written.is_ok()
        }
        Op::Truncate { name, size } => fs.truncate(&at(name), *size).is_ok(),
        Op::Unlink { name } => fs.unlink(&at(name)).is_ok(),
        Op::Rename { from, to } => fs.rename(&at(from), &at(to)).is_ok(),
        Op::MkdirSub => fs.mkdir(&at("sub"), 0o755).is_ok(),
        Op::RmdirSub => fs.rmdir(&at("sub")).is_ok(),
    }
}

#[test]
fn test_random_operations_match_reference_model() {
    init_tracing();
    for seed in [1, 7, 42] {
        let store = Arc::new(MemoryStore::new());
        let ctx = start(&store);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model = Model::default();

        for step in 0..200 {
            let op = Op::random(&mut rng);
            let expected = model.apply(&op);
            assert_eq!(
                run(ctx.fs(), &op),
                expected,
                "seed {seed} step {step}: {op:?}"
            );
        }

        assert_eq!(mirror_tree(ctx.fs()), model.tree(), "seed {seed}");
        ctx.flush_blocking().unwrap();
        assert_eq!(backend_tree(&store), model.tree(), "seed {seed}");

        let stats = ctx.shutdown().unwrap();
        assert_eq!(stats.failed, 0, "seed {seed}");
    }
}
