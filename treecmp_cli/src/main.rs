use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treecmp_common::{
    default_staging_dir, ensure_config, ensure_config_from, load_config, load_config_from,
    AddedEntry, AppConfig, ComparisonResult, ComparisonSummary, PairedEntry, RemovedEntry,
    SourceDescriptor,
};
use treecmp_core::{sweep_stale, ComparisonEngine, Subject};

const EXIT_IDENTICAL: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_DIFFERENT: u8 = 2;

#[derive(Parser)]
#[command(name = "treecmp")]
#[command(author = "treecmp Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Content-based directory and archive comparison", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two directory trees
    Folders {
        left: PathBuf,
        right: PathBuf,
        #[command(flatten)]
        opts: CompareOpts,
    },
    /// Compare the contents of two archives (.zip, .tar, .tar.gz, .tar.bz2, .tar.xz, .7z)
    Archives {
        left: PathBuf,
        right: PathBuf,
        #[command(flatten)]
        opts: CompareOpts,
    },
    /// Compare two inputs, treating directories as trees and files as archives
    Compare {
        left: PathBuf,
        right: PathBuf,
        #[command(flatten)]
        opts: CompareOpts,
    },
    /// Remove staging directories left behind by interrupted runs
    Sweep {
        /// Staging directory to sweep
        #[arg(long)]
        staging_dir: Option<PathBuf>,

        /// Remove entries older than this many seconds
        #[arg(long)]
        older_than: Option<u64>,
    },
    /// Create the configuration file with defaults if missing and print it
    Config,
}

#[derive(Args, Clone)]
struct CompareOpts {
    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Show only differences (hide unchanged files)
    #[arg(short = 'd', long)]
    diff_only: bool,

    /// Disable ANSI colors in output
    #[arg(long)]
    no_color: bool,

    /// Directory for archive extraction
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Hashing worker threads (0 = automatic)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Delete both inputs after comparing
    #[arg(long)]
    remove_inputs: bool,
}

fn main() -> ExitCode {
    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Folders { left, right, opts } => run_compare(
            cli.config.as_deref(),
            Subject::Directory(left),
            Subject::Directory(right),
            &opts,
        ),
        Commands::Archives { left, right, opts } => run_compare(
            cli.config.as_deref(),
            Subject::Archive(left),
            Subject::Archive(right),
            &opts,
        ),
        Commands::Compare { left, right, opts } => detect_subjects(left, right)
            .and_then(|(left, right)| run_compare(cli.config.as_deref(), left, right, &opts)),
        Commands::Sweep {
            staging_dir,
            older_than,
        } => run_sweep(cli.config.as_deref(), staging_dir, older_than).map(|_| EXIT_IDENTICAL),
        Commands::Config => run_config(cli.config.as_deref()).map(|_| EXIT_IDENTICAL),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Comparison failed: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn detect_subjects(left: PathBuf, right: PathBuf) -> anyhow::Result<(Subject, Subject)> {
    Ok((Subject::detect(left)?, Subject::detect(right)?))
}

fn load_settings(config_path: Option<&Path>) -> anyhow::Result<(AppConfig, PathBuf)> {
    let loaded = match config_path {
        Some(path) => load_config_from(path.to_path_buf(), false)?,
        None => load_config(false)?,
    };
    let default_staging = default_staging_dir(loaded.portable, &loaded.path)?;
    Ok((loaded.config, default_staging))
}

fn run_compare(
    config_path: Option<&Path>,
    left: Subject,
    right: Subject,
    opts: &CompareOpts,
) -> anyhow::Result<u8> {
    let (mut config, default_staging) = load_settings(config_path)?;

    if let Some(staging_dir) = opts.staging_dir.clone() {
        config.staging_dir = Some(staging_dir);
    }
    if let Some(workers) = opts.workers {
        config.hash_workers = workers;
    }
    if opts.remove_inputs {
        config.remove_inputs = true;
    }

    let engine = ComparisonEngine::from_config(&config, default_staging)?;
    info!("Using staging directory: {}", engine.staging_root().display());

    let result = engine
        .compare(left, right)
        .context("comparison aborted")?;

    if opts.json {
        let report = JsonReport::new(&result, opts.diff_only);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let use_color = !opts.no_color && std::io::stdout().is_terminal();
        print_text_report(&result, opts.diff_only, use_color);
    }

    Ok(if result.is_identical() {
        EXIT_IDENTICAL
    } else {
        EXIT_DIFFERENT
    })
}

fn run_sweep(
    config_path: Option<&Path>,
    staging_dir: Option<PathBuf>,
    older_than: Option<u64>,
) -> anyhow::Result<()> {
    let (config, default_staging) = load_settings(config_path)?;
    let staging = staging_dir
        .or_else(|| config.staging_dir.clone())
        .unwrap_or(default_staging);
    let max_age = older_than
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.stale_after());

    let report = sweep_stale(&staging, max_age)?;
    info!(
        "Swept {} of {} entries in {}",
        report.removed.len(),
        report.scanned,
        staging.display()
    );
    for (path, reason) in &report.failures {
        error!("Could not remove {}: {}", path.display(), reason);
    }
    println!("Removed {} stale staging entries", report.removed.len());
    Ok(())
}

fn run_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let loaded = match config_path {
        Some(path) => ensure_config_from(path.to_path_buf(), false)?,
        None => ensure_config(false)?,
    };
    if !loaded.exists {
        info!("Wrote default configuration to {}", loaded.path.display());
    }

    let staging = match loaded.config.staging_dir.clone() {
        Some(dir) => dir,
        None => default_staging_dir(loaded.portable, &loaded.path)?,
    };
    println!("Config file:   {}", loaded.path.display());
    println!("Staging dir:   {}", staging.display());
    println!("Hash workers:  {}", loaded.config.hash_workers);
    println!("Remove inputs: {}", loaded.config.remove_inputs);
    println!("Stale after:   {}s", loaded.config.stale_after().as_secs());
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    source1: &'a SourceDescriptor,
    source2: &'a SourceDescriptor,
    summary: ComparisonSummary,
    removed: &'a [RemovedEntry],
    added: &'a [AddedEntry],
    changed: &'a [PairedEntry],
    unchanged: &'a [PairedEntry],
}

impl<'a> JsonReport<'a> {
    /// Summary always counts every category, even when unchanged entries are hidden
    fn new(result: &'a ComparisonResult, diff_only: bool) -> Self {
        let partition = &result.partition;
        let unchanged: &[PairedEntry] = if diff_only {
            &[]
        } else {
            partition.unchanged.as_slice()
        };
        Self {
            source1: &result.source1,
            source2: &result.source2,
            summary: result.summary(),
            removed: &partition.removed,
            added: &partition.added,
            changed: &partition.changed,
            unchanged,
        }
    }
}

fn print_text_report(result: &ComparisonResult, diff_only: bool, use_color: bool) {
    let paint = |code: &'static str| if use_color { code } else { "" };
    let reset = paint("\x1b[0m");
    let partition = &result.partition;

    println!("\n{}", "=".repeat(80));
    println!(
        "Comparison Results: {} ({} bytes) vs {} ({} bytes)",
        result.source1.name,
        result.source1.total_size_bytes,
        result.source2.name,
        result.source2.total_size_bytes
    );
    println!("{}", "=".repeat(80));

    for entry in &partition.removed {
        println!("{}  --  {} {}", paint("\x1b[33m"), reset, entry.file);
    }
    for entry in &partition.added {
        println!("{}  ++  {} {}", paint("\x1b[34m"), reset, entry.file);
    }
    for entry in &partition.changed {
        println!(
            "{}  !=  {} {} ({} -> {} bytes)",
            paint("\x1b[31m"),
            reset,
            entry.file,
            entry.size1,
            entry.size2
        );
    }
    if !diff_only {
        for entry in &partition.unchanged {
            println!("{}  ==  {} {}", paint("\x1b[32m"), reset, entry.file);
        }
    }

    let summary = result.summary();
    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Total files:     {}", summary.total);
    println!("  Removed:         {} (--)", summary.removed);
    println!("  Added:           {} (++)", summary.added);
    println!("  Changed:         {} (!=)", summary.changed);
    println!("  Unchanged:       {} (==)", summary.unchanged);
    println!("{}", "=".repeat(80));
}
