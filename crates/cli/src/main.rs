mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::bundle::{bundle_command, RunOptions};
use commands::cache::{cache_clear_command, cache_info_command};
use commands::scan::scan_command;

/// Native shared-library closure resolver and binary relocator.
///
/// This CLI is a thin wrapper around `bundle-core` (exposed in code as
/// `bundle_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "dist-bundler",
    version,
    about = "Resolve native library closures and assemble relocatable distributions",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the full dependency closure, copy every bundled library into
    /// the distribution directory, and rewrite the copies so the tree runs
    /// anywhere.
    Bundle {
        /// Entry-point binaries to start the scan from. Repeatable.
        #[arg(long = "entry", required = true)]
        entries: Vec<String>,

        /// Distribution directory to assemble.
        #[arg(long)]
        dist: String,

        /// Subdirectory (relative to --dist) bundled libraries land in.
        /// Empty places them beside the executables.
        #[arg(long, default_value = "")]
        lib_dir: String,

        /// YAML policy file with exclude/forbid rules and extra search dirs.
        #[arg(long)]
        policy: Option<String>,

        /// Target platform: linux, macos, or windows. Defaults to the host.
        #[arg(long)]
        platform: Option<String>,

        /// Scan-cache directory. Defaults to the user cache directory.
        #[arg(long)]
        cache_dir: Option<String>,

        /// Disable the persistent scan cache for this run.
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Scan worker count; 0 derives from available CPU parallelism.
        #[arg(long, default_value_t = 0)]
        workers: usize,

        /// Emit the manifest as JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Compute and print the dependency closure without copying anything.
    Scan {
        /// Entry-point binaries to start the scan from. Repeatable.
        #[arg(long = "entry", required = true)]
        entries: Vec<String>,

        /// YAML policy file with exclude/forbid rules and extra search dirs.
        #[arg(long)]
        policy: Option<String>,

        /// Target platform: linux, macos, or windows. Defaults to the host.
        #[arg(long)]
        platform: Option<String>,

        /// Scan-cache directory. Defaults to the user cache directory.
        #[arg(long)]
        cache_dir: Option<String>,

        /// Disable the persistent scan cache for this run.
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Scan worker count; 0 derives from available CPU parallelism.
        #[arg(long, default_value_t = 0)]
        workers: usize,

        /// Emit the closure as JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the scan-cache location and size.
    CacheInfo {
        /// Scan-cache directory. Defaults to the user cache directory.
        #[arg(long)]
        cache_dir: Option<String>,
    },

    /// Delete all persisted scan-cache records.
    CacheClear {
        /// Scan-cache directory. Defaults to the user cache directory.
        #[arg(long)]
        cache_dir: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Bundle {
            entries,
            dist,
            lib_dir,
            policy,
            platform,
            cache_dir,
            no_cache,
            workers,
            json,
        } => {
            let options = RunOptions { entries, policy, platform, cache_dir, no_cache, workers };
            bundle_command(&options, &dist, &lib_dir, json)
        }
        Command::Scan { entries, policy, platform, cache_dir, no_cache, workers, json } => {
            let options = RunOptions { entries, policy, platform, cache_dir, no_cache, workers };
            scan_command(&options, json)
        }
        Command::CacheInfo { cache_dir } => cache_info_command(cache_dir.as_deref()),
        Command::CacheClear { cache_dir } => cache_clear_command(cache_dir.as_deref()),
    }
}
