//! ShadowFS binary — thin CLI shell over the server library.
//!
//! Exit codes: 0 clean unmount, 1 configuration error, 2 mount failure,
//! 3 runtime fatal error.

use clap::Parser;
use fuser::MountOption;
use shadowfs_core::config::{Config, SourceConfig};
use shadowfs_core::ops::ShadowFs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use shadowfs_server::api::{self, ControlContext};
use shadowfs_server::fs::ShadowFuse;
use shadowfs_server::watch::start_watcher;

const EXIT_CONFIG: i32 = 1;
const EXIT_MOUNT: i32 = 2;
const EXIT_RUNTIME: i32 = 3;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Synthetic filesystem view over backing directories: visibility rules,
/// on-read transforms, and virtual organizational layers.
#[derive(Parser)]
#[command(name = "shadowfs", version, about, long_about = None)]
struct Cli {
    /// Backing source directory (optional when --config lists sources)
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// Mount point
    #[arg(value_name = "MOUNT")]
    mount: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Additional backing sources, in priority order
    #[arg(long = "sources", value_name = "PATH", num_args = 1..)]
    sources: Vec<PathBuf>,

    /// Stay in the foreground instead of daemonizing
    #[arg(long)]
    foreground: bool,

    /// Verbose (debug-level) logging
    #[arg(long)]
    debug: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Enable write-through to writable sources
    #[arg(long)]
    read_write: bool,

    /// Total content-cache budget in MiB (split between raw and transformed)
    #[arg(long, value_name = "MiB")]
    cache_size: Option<u64>,

    /// Disable all caching
    #[arg(long)]
    no_cache: bool,

    /// Log to a file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Configuration assembly
// ---------------------------------------------------------------------------

/// Positional handling: `shadowfs SOURCE MOUNT`, or `shadowfs MOUNT` when
/// --config (or --sources) already names the backing directories.
fn split_positionals(cli: &Cli) -> Result<(Option<PathBuf>, PathBuf), String> {
    match (&cli.source, &cli.mount) {
        (Some(source), Some(mount)) => Ok((Some(source.clone()), mount.clone())),
        (Some(only), None) if cli.config.is_some() || !cli.sources.is_empty() => {
            Ok((None, only.clone()))
        }
        (Some(_), None) => Err("a mount point is required".into()),
        _ => Err("a source directory and mount point are required".into()),
    }
}

fn assemble_config(cli: &Cli, source: Option<&PathBuf>) -> Result<Config, String> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).map_err(|e| e.to_string())?,
        None => {
            let first = source
                .cloned()
                .or_else(|| cli.sources.first().cloned())
                .ok_or("a source directory or --config is required")?;
            Config::single_source(first)
        }
    };

    // Positional source and --sources append after any config-file sources.
    if cli.config.is_some() {
        if let Some(source) = source {
            let priority = config.sources.iter().map(|s| s.priority).max().unwrap_or(0) + 1;
            config.sources.push(SourceConfig { path: source.clone(), priority, readonly: false });
        }
    }
    for (i, path) in cli.sources.iter().enumerate() {
        if config.sources.iter().any(|s| s.path == *path) {
            continue;
        }
        let priority = config.sources.iter().map(|s| s.priority).max().unwrap_or(0) + 1 + i as i32;
        config.sources.push(SourceConfig { path: path.clone(), priority, readonly: false });
    }

    if cli.read_write {
        config.write_through = true;
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }
    if let Some(mib) = cli.cache_size {
        let total = mib * 1024 * 1024;
        config.cache.l2_size_bytes = total / 3;
        config.cache.l3_size_bytes = total - total / 3;
    }

    for source in &config.sources {
        if !source.path.is_dir() {
            return Err(format!("source {} is not a directory", source.path.display()));
        }
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if cli.debug { "debug" } else { "info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in ["shadowfs", "shadowfs_server", "shadowfs_core"] {
        filter = filter.add_directive(format!("{target}={level}").parse().unwrap());
    }
    match &cli.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let appender = tracing_appender::rolling::never(
                dir,
                name.unwrap_or_else(|| "shadowfs.log".to_string()),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    let (source, mount) = match split_positionals(&cli) {
        Ok(parts) => parts,
        Err(message) => {
            error!(error = message.as_str(), "configuration error");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let config = match assemble_config(&cli, source.as_ref()) {
        Ok(config) => config,
        Err(message) => {
            error!(error = message.as_str(), "configuration error");
            std::process::exit(EXIT_CONFIG);
        }
    };

    if !mount.is_dir() {
        error!(mount = %mount.display(), "mount point is not a directory");
        std::process::exit(EXIT_MOUNT);
    }

    if !cli.foreground {
        // Without a log file, stderr is the only sink — keep it open.
        if let Err(e) = nix::unistd::daemon(false, cli.log_file.is_none()) {
            error!(error = %e, "failed to daemonize");
            std::process::exit(EXIT_RUNTIME);
        }
    }

    let fs = match ShadowFs::build(&config) {
        Ok(fs) => fs,
        Err(e) => {
            error!(error = %e, "failed to build filesystem view");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let stats = fs.statistics();
    info!(
        files = stats.indexed_files,
        admitted = stats.admitted_files,
        layers = stats.layers.len(),
        "view ready"
    );

    // Control plane on its own runtime thread.
    let control_listen = config.control_listen.clone();
    let control_ctx = ControlContext {
        fs: Arc::clone(&fs),
        config: Arc::new(Mutex::new(config.clone())),
        config_path: cli.config.clone(),
        start_time: std::time::Instant::now(),
    };
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "control plane runtime unavailable");
                return;
            }
        };
        if let Err(e) = runtime.block_on(api::serve(&control_listen, control_ctx)) {
            warn!(error = %e, "control plane stopped");
        }
    });

    // Live re-indexing on backing changes; half a second of quiet batches
    // editor save bursts into one refresh.
    let roots: Vec<PathBuf> = config.sources.iter().map(|s| s.path.clone()).collect();
    let _watcher = start_watcher(Arc::clone(&fs), roots, Duration::from_millis(500));

    // Mount and serve until unmounted or signaled.
    let mut options = vec![
        MountOption::FSName("shadowfs".to_string()),
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
        MountOption::AutoUnmount,
    ];
    if config.write_through {
        options.push(MountOption::RW);
    } else {
        options.push(MountOption::RO);
    }
    if cli.allow_other {
        options.push(MountOption::AllowOther);
    }

    info!(mount = %mount.display(), "mounting");
    match fuser::mount2(ShadowFuse::new(fs), &mount, &options) {
        Ok(()) => {
            info!("unmounted cleanly");
        }
        Err(e) => {
            error!(error = %e, "mount failed");
            std::process::exit(EXIT_MOUNT);
        }
    }
}
