//! blockvol CLI
//!
//! Runs the conformance suite against a backend and inspects directory volumes.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use blockvol::conformance::{ConformanceSuite, VolumeFactory};
use blockvol::{Config, DirectoryVolume, MemoryVolume, TestableVolume, Volume, VolumeError};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// blockvol
#[derive(Parser, Debug)]
#[command(name = "blockvol")]
#[command(about = "Content-addressed block volume tools")]
#[command(version)]
struct Args {
    /// Blob signature TTL in seconds
    #[arg(long, global = true, default_value = "1209600")]
    ttl_secs: u64,

    /// Maximum block size in bytes
    #[arg(long, global = true, default_value = "67108864")]
    block_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the conformance suite against fresh volumes
    Check {
        #[arg(short, long, value_enum, default_value = "memory")]
        backend: Backend,

        /// Parent directory for scratch volumes (directory backend)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Check a read-only volume
        #[arg(long)]
        read_only: bool,

        /// Serialize all I/O (directory backend)
        #[arg(long)]
        serialize: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List blocks stored in a directory volume
    Index {
        #[arg(short, long)]
        root: PathBuf,

        /// Only list hashes starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Print space accounting for a directory volume as JSON
    Status {
        #[arg(short, long)]
        root: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Memory,
    Directory,
}

/// Builds a fresh volume per scenario; directory volumes get their own
/// scratch root, removed again on teardown
struct CheckFactory {
    config: Config,
    backend: Backend,
    parent: PathBuf,
    read_only: bool,
    serialize: bool,
    seq: AtomicUsize,
}

impl VolumeFactory for CheckFactory {
    fn create(&self) -> blockvol::Result<Box<dyn TestableVolume>> {
        let pool = self.config.buffer_pool();
        let policy = self.config.deletion_policy();
        let writable = !self.read_only;

        match self.backend {
            Backend::Memory => Ok(Box::new(MemoryVolume::new(pool, policy, writable))),
            Backend::Directory => {
                let n = self.seq.fetch_add(1, Ordering::Relaxed);
                let root = self
                    .parent
                    .join(format!("blockvol-check-{}-{}", std::process::id(), n));
                let volume = DirectoryVolume::scratch(root, pool, policy, writable)?
                    .serialized(self.serialize);
                Ok(Box::new(volume))
            }
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blockvol=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .blob_signature_ttl(Duration::from_secs(args.ttl_secs))
        .block_size(args.block_size)
        // One lease per scenario thread is plenty
        .max_buffers(16)
        .build();

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match args.command {
        Commands::Check {
            backend,
            root,
            read_only,
            serialize,
            json,
        } => check(config, backend, root, read_only, serialize, json),
        Commands::Index { root, prefix } => index(&config, root, &prefix),
        Commands::Status { root } => status(&config, root),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn check(
    config: Config,
    backend: Backend,
    root: Option<PathBuf>,
    read_only: bool,
    serialize: bool,
    json: bool,
) -> blockvol::Result<bool> {
    tracing::info!("blockvol v{}", blockvol::VERSION);
    tracing::info!(
        "Checking {:?} backend (read_only={}, serialize={})",
        backend,
        read_only,
        serialize
    );

    let parent = root.unwrap_or_else(std::env::temp_dir);
    let factory = CheckFactory {
        config,
        backend,
        parent,
        read_only,
        serialize,
        seq: AtomicUsize::new(0),
    };

    let report = ConformanceSuite::new(factory).run();

    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &report).map_err(io::Error::from)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", report)?;
    }
    Ok(report.is_conformant())
}

fn open_existing(config: &Config, root: PathBuf) -> blockvol::Result<DirectoryVolume> {
    DirectoryVolume::open(root, config.buffer_pool(), config.deletion_policy(), false)
}

fn index(config: &Config, root: PathBuf, prefix: &str) -> blockvol::Result<bool> {
    let volume = open_existing(config, root)?;
    let mut out = io::stdout().lock();
    volume.index_to(prefix, &mut out)?;
    out.flush()?;
    Ok(true)
}

fn status(config: &Config, root: PathBuf) -> blockvol::Result<bool> {
    let volume = open_existing(config, root)?;
    let status = volume.status()?;
    let json = serde_json::to_string_pretty(&status)
        .map_err(|e| VolumeError::Config(format!("serialize status: {}", e)))?;
    println!("{}", json);
    Ok(true)
}
