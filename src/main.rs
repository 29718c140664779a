use bundler::archive::TocEntry;
use bundler::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use bundler::orchestrator::{Mode, Orchestrator, RunOptions};
use bundler::policy::{SkipRule, DEFAULT_THRESHOLD};
use bundler::scheduler::{WorkerOptions, DEFAULT_THREADS};
use clap::{Args, CommandFactory, Parser, Subcommand};
use log::warn;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "bundler", version, about = "Bundle files into one container, picking the best codec per file")]
struct Cli {
    /// Only print failures (and the summary when something failed)
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Echo resolved options and print the table of contents
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct WorkerArgs {
    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,
    /// Workers per batch
    #[arg(short = 'j', long, default_value_t = DEFAULT_THREADS)]
    threads: usize,
    /// Keep a compressed payload only if it is under this percentage of the input
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD, value_parser = parse_threshold)]
    threshold: f64,
    /// Candidate codec: zstd (default), lz4, brotli, lzma, none.  Repeatable
    #[arg(short, long = "codec", value_parser = parse_codec)]
    codecs: Vec<CodecId>,
    /// Compression level (zstd 1-19; brotli 0-11; ignored for lz4/lzma)
    #[arg(short, long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    level: i32,
    /// Do not write or delete anything
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files into an archive
    Pack {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        /// Store file names without their directories
        #[arg(short, long)]
        flat: bool,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Pack files into an archive, then delete them if nothing failed
    Move {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        #[arg(short, long)]
        flat: bool,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Extract every entry of an archive
    Extract {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Decode every entry of an archive without writing anything
    Test {
        archive: PathBuf,
    },
    /// List archive contents
    List {
        archive: PathBuf,
    },
    /// Pack each file in place
    Compress {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Unpack each file in place
    Decompress {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Unpack packed files and pack the rest, in place
    Toggle {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
        #[command(flatten)]
        worker: WorkerArgs,
    },
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let opts = into_options(cli);
    if opts.verbose {
        println!("options: {}", serde_json::to_string_pretty(&opts)?);
    }

    let orchestrator = Orchestrator::new(opts);
    let report = match orchestrator.run() {
        Ok(r) => r,
        Err(e) if e.is_fatal() => {
            eprintln!("[FAIL] {e}");
            Cli::command().print_help()?;
            return Ok(ExitCode::from(255));
        }
        Err(e) => return Err(e.into()),
    };

    let opts = orchestrator.options();
    if report.mode == Mode::List || opts.verbose {
        print_toc(&report.toc);
    }
    if !opts.quiet || report.totals.errors > 0 {
        println!("{}", report.summary());
    }
    Ok(ExitCode::from(report.exit_code() as u8))
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn into_options(cli: Cli) -> RunOptions {
    let base = RunOptions {
        quiet:   cli.quiet,
        verbose: cli.verbose && !cli.quiet,
        ..RunOptions::default()
    };
    match cli.command {
        Commands::Pack { archive, inputs, flat, worker } => {
            with_worker(RunOptions { mode: Mode::Pack, archive: Some(archive), inputs, ..base }, worker, flat)
        }
        Commands::Move { archive, inputs, flat, worker } => {
            with_worker(RunOptions { mode: Mode::Move, archive: Some(archive), inputs, ..base }, worker, flat)
        }
        Commands::Extract { archive, output_dir } => {
            RunOptions { mode: Mode::Extract, archive: Some(archive), output_dir, ..base }
        }
        Commands::Test { archive } => RunOptions { mode: Mode::Test, archive: Some(archive), ..base },
        Commands::List { archive } => RunOptions { mode: Mode::List, archive: Some(archive), ..base },
        Commands::Compress { inputs, worker } => {
            with_worker(RunOptions { mode: Mode::Compress, inputs, ..base }, worker, false)
        }
        Commands::Decompress { inputs, worker } => {
            with_worker(RunOptions { mode: Mode::Decompress, inputs, ..base }, worker, false)
        }
        Commands::Toggle { inputs, worker } => {
            with_worker(RunOptions { mode: Mode::Toggle, inputs, ..base }, worker, false)
        }
    }
}

fn with_worker(opts: RunOptions, w: WorkerArgs, flat: bool) -> RunOptions {
    if w.threads == 0 {
        warn!("--threads 0 means one worker at a time");
    }
    RunOptions {
        recursive: w.recursive,
        dry_run:   w.dry_run,
        worker: WorkerOptions {
            threads: w.threads.max(1),
            codecs:  w.codecs,
            level:   w.level,
            rule:    SkipRule::new(w.threshold),
            flat,
        },
        ..opts
    }
}

fn print_toc(toc: &[TocEntry]) {
    println!("{:<40} {:>12}", "Name", "Size");
    for e in toc {
        println!("{:<40} {:>12}", e.name, e.size);
    }
    println!("{} entries", toc.len());
}

fn parse_codec(s: &str) -> Result<CodecId, String> {
    CodecId::from_name(s).ok_or_else(|| format!("unknown codec '{s}' (expected zstd, lz4, brotli, lzma or none)"))
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if v > 0.0 && v.is_finite() {
        Ok(v)
    } else {
        Err(format!("threshold must be a positive percentage, got {s}"))
    }
}
