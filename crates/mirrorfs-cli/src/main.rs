//! mirrorfs command-line front end.
//!
//! Starts a filesystem context over a host directory, runs one command
//! against it, waits until every change has been replicated and exits.
//!
//! ## Usage
//!
//! ```bash
//! mirrorfs --persist notes put /persistent/notes/todo.txt todo.txt
//! mirrorfs --persist notes cat /persistent/notes/todo.txt
//! mirrorfs --config mirrorfs.toml tree /
//! RUST_LOG=mirrorfs_kernel=debug mirrorfs --persist notes status
//! ```

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirrorfs_kernel::{
    AssetEntry, Driver, FilesystemContext, FsConfig, LocalStore, MountTable, VfsError,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BACKEND_ROOT: &str = "./mirrorfs-data";

static HELP: &[AssetEntry] = &[AssetEntry::file(
    "commands.txt",
    include_bytes!("../assets/help/commands.txt"),
)];

static ASSETS: &[AssetEntry] = &[
    AssetEntry::file("README.md", include_bytes!("../assets/README.md")),
    AssetEntry::dir("help", HELP),
];

/// Dual-tier filesystem: in-memory mirror with background replication.
#[derive(Parser, Debug)]
#[command(name = "mirrorfs")]
#[command(about = "Run one command against a mirrorfs filesystem")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host directory backing the persistent mount (overrides the config)
    #[arg(short, long)]
    backend: Option<PathBuf>,

    /// Persistent directory to load, relative to the persistent root (repeatable)
    #[arg(short, long)]
    persist: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Print a file
    Cat { path: PathBuf },
    /// Write a host file (or stdin) to PATH
    Put {
        path: PathBuf,
        source: Option<PathBuf>,
    },
    /// Create a directory
    Mkdir {
        /// Create missing parents
        #[arg(short, long)]
        parents: bool,
        path: PathBuf,
    },
    /// Remove a file or an empty directory
    Rm { path: PathBuf },
    /// Rename within one mount
    Mv { from: PathBuf, to: PathBuf },
    /// Show attributes
    Stat { path: PathBuf },
    /// Recursive listing
    Tree {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Mounts, startup report and replication counters
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<FsConfig> {
    let mut config = match &args.config {
        Some(path) => FsConfig::from_toml_file(path)?,
        None => FsConfig::default(),
    };
    if !args.persist.is_empty() {
        config.persistent_dirs = args.persist.clone();
    }
    if let Some(backend) = &args.backend {
        config.backend_root = Some(backend.clone());
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let backend_root = config
        .backend_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKEND_ROOT));
    tokio::fs::create_dir_all(&backend_root)
        .await
        .with_context(|| format!("creating backend root {}", backend_root.display()))?;

    let store = Arc::new(LocalStore::new(backend_root));
    let ctx = FilesystemContext::start(&config, store, Some(ASSETS))
        .context("starting filesystem")?;
    let report = ctx.startup().wait().await?;
    tracing::debug!(
        files = report.files,
        bytes = report.bytes,
        skipped = report.skipped,
        "filesystem ready"
    );

    let result = execute(&ctx, &args.command);

    ctx.flush().await.context("flushing replication queue")?;
    let stats = tokio::task::spawn_blocking(move || ctx.shutdown())
        .await
        .context("joining backend worker")??;
    if stats.failed > 0 {
        tracing::warn!(failed = stats.failed, "some changes did not reach the backend");
    }
    result
}

fn execute(ctx: &FilesystemContext, command: &Command) -> Result<()> {
    let fs = ctx.fs();
    match command {
        Command::Ls { path } => {
            let entries = fs
                .list(path)
                .with_context(|| format!("cannot list {}", path.display()))?;
            for entry in entries {
                let suffix = if entry.kind.is_dir() { "/" } else { "" };
                println!("{}{suffix}", entry.name);
            }
        }
        Command::Cat { path } => {
            let data = fs
                .read_all(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Put { path, source } => {
            let data = match source {
                Some(file) => std::fs::read(file)
                    .with_context(|| format!("cannot read host file {}", file.display()))?,
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            fs.write_all(path, &data)
                .with_context(|| format!("cannot write {}", path.display()))?;
            tracing::info!(path = %path.display(), bytes = data.len(), "written");
        }
        Command::Mkdir { parents, path } => {
            if *parents {
                mkdir_all(fs, path)?;
            } else {
                fs.mkdir(path, 0o755)
                    .with_context(|| format!("cannot create {}", path.display()))?;
            }
        }
        Command::Rm { path } => {
            let attr = fs
                .getattr(path)
                .with_context(|| format!("cannot remove {}", path.display()))?;
            let removed = if attr.is_dir() {
                fs.rmdir(path)
            } else {
                fs.unlink(path)
            };
            removed.with_context(|| format!("cannot remove {}", path.display()))?;
        }
        Command::Mv { from, to } => {
            fs.rename(from, to)
                .with_context(|| format!("cannot move {} to {}", from.display(), to.display()))?;
        }
        Command::Stat { path } => print_stat(fs, path)?,
        Command::Tree { path } => {
            println!("{}", path.display());
            print_tree(fs, path, "")?;
        }
        Command::Status => print_status(ctx),
    }
    Ok(())
}

fn mkdir_all(fs: &MountTable, path: &Path) -> Result<()> {
    let mut ancestors: Vec<&Path> = path.ancestors().collect();
    ancestors.reverse();
    for dir in ancestors {
        if fs.getattr(dir).is_ok_and(|attr| attr.is_dir()) {
            continue;
        }
        match fs.mkdir(dir, 0o755) {
            Ok(()) | Err(VfsError::AlreadyExists(_)) => {}
            Err(e) => {
                return Err(e).with_context(|| format!("cannot create {}", dir.display()));
            }
        }
    }
    Ok(())
}

fn print_stat(fs: &MountTable, path: &Path) -> Result<()> {
    let attr = fs
        .getattr(path)
        .with_context(|| format!("cannot stat {}", path.display()))?;
    let mtime = attr
        .mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let read_only = fs
        .resolve(path)
        .map(|(driver, _)| driver.read_only())
        .unwrap_or(true);

    println!("  path: {}", path.display());
    println!("  type: {}", if attr.is_dir() { "directory" } else { "file" });
    println!("  size: {}", attr.size);
    println!("  mode: {:o}", attr.perm);
    println!(" mtime: {mtime}");
    println!(" mount: {}", if read_only { "read-only" } else { "read-write" });
    Ok(())
}

fn print_tree(fs: &MountTable, dir: &Path, prefix: &str) -> Result<()> {
    let entries = fs
        .list(dir)
        .with_context(|| format!("cannot list {}", dir.display()))?;
    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let (branch, indent) = if i + 1 == count {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        println!("{prefix}{branch}{}", entry.name);
        if entry.kind.is_dir() {
            print_tree(fs, &dir.join(&entry.name), &format!("{prefix}{indent}"))?;
        }
    }
    Ok(())
}

fn print_status(ctx: &FilesystemContext) {
    println!("mounts:");
    for mount in ctx.fs().list_mounts() {
        let mode = if mount.read_only { "ro" } else { "rw" };
        println!("  {} ({mode})", mount.path.display());
    }
    if let Some(report) = ctx.startup().report() {
        println!(
            "startup: {} directories, {} files, {} bytes, {} skipped",
            report.directories, report.files, report.bytes, report.skipped
        );
    }
    let stats = ctx.replication_stats();
    println!(
        "replication: {} applied, {} failed, {} pending",
        stats.applied, stats.failed, stats.pending
    );
}
