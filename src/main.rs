use anyhow::{Context, Result};
use arachne::archive::{ArchiveError, ArchiveReader};
use arachne::checkpoint::{self, CheckpointManager};
use arachne::fetch::DirectoryFetcher;
use arachne::models::EntityType;
use arachne::pipeline::{
    BarProgress, FailurePolicy, LogProgress, Pipeline, PipelineConfig, ProgressSink,
};
use arachne::source;
use arachne::stats::PipelineStats;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "arachne")]
#[command(about = "Build a compact media graph archive from TMDb id exports")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process an id export into a graph archive
    Run(RunArgs),
    /// Decode an archive and print its records as JSON lines
    Inspect(InspectArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Movie,
    Artist,
    TvSeries,
}

impl From<KindArg> for EntityType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Movie => EntityType::Movie,
            KindArg::Artist => EntityType::Artist,
            KindArg::TvSeries => EntityType::TvSeries,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Path to the id export (.json or .json.bz2, one JSON object per line)
    #[arg(short, long)]
    input: String,

    /// Crawl directory holding Entities/{Movie|Person|TvSeries}/{id}.json
    #[arg(short, long)]
    entities: String,

    /// Archive file to write
    #[arg(short, long)]
    output: String,

    /// Entity kind of the export (inferred from the file name if omitted)
    #[arg(long, value_enum)]
    kind: Option<KindArg>,

    /// Worker threads for fetching and normalizing
    #[arg(long, default_value_t = arachne::config::DEFAULT_WORKERS)]
    workers: usize,

    /// Identifiers fetched per batch
    #[arg(long, default_value_t = arachne::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Limit number of identifiers to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Log and skip identifiers that fail to fetch or normalize instead of stopping
    #[arg(long)]
    skip_failures: bool,

    /// Progress report interval in identifiers processed
    #[arg(long, default_value_t = arachne::config::PROGRESS_INTERVAL)]
    progress_interval: u64,

    /// Checkpoint interval in identifiers processed (0 disables checkpoints)
    #[arg(long, default_value_t = arachne::config::CHECKPOINT_INTERVAL)]
    checkpoint_interval: u32,

    /// Resume from last checkpoint if available
    #[arg(long)]
    resume: bool,

    /// Report progress through the log instead of a progress bar
    #[arg(long)]
    no_progress_bar: bool,
}

#[derive(Args)]
struct InspectArgs {
    /// Archive file to decode
    #[arg(short, long)]
    input: String,

    /// Stop after printing this many records
    #[arg(long)]
    limit: Option<u64>,
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    let input_path = Path::new(&args.input);
    let entity_type = match args.kind {
        Some(kind) => kind.into(),
        None => source::entity_type_from_export_name(input_path).with_context(|| {
            format!(
                "Cannot infer entity kind from export name: {} (use --kind)",
                args.input
            )
        })?,
    };

    let checkpoint_mgr = if args.checkpoint_interval > 0 {
        Some(CheckpointManager::new(
            &args.input,
            &args.output,
            args.checkpoint_interval,
        )?)
    } else {
        None
    };

    let (writer, resumed) = checkpoint::open_archive(&args.input, &args.output, args.resume)?;
    let (stats, start_position) = match resumed {
        Some(cp) => {
            info!(
                position = cp.position,
                entries = cp.stats.entries_written,
                "Resuming from checkpoint"
            );
            (PipelineStats::from_checkpoint(&cp.stats), cp.position)
        }
        None => (PipelineStats::new(), 0),
    };

    let fetcher = DirectoryFetcher::new(&args.entities);
    let sink: Box<dyn ProgressSink> = if args.no_progress_bar {
        Box::new(LogProgress)
    } else {
        Box::new(BarProgress::new())
    };
    let config = PipelineConfig {
        progress_interval: args.progress_interval,
        batch_size: args.batch_size,
        workers: args.workers,
        failure_policy: if args.skip_failures {
            FailurePolicy::Skip
        } else {
            FailurePolicy::Halt
        },
        limit: args.limit,
    };

    info!(kind = %entity_type, input = %args.input, output = %args.output, "Starting pipeline");
    let summary = Pipeline::new(&fetcher, sink.as_ref(), config)
        .with_stats(stats)
        .run_export(
            input_path,
            entity_type,
            writer,
            checkpoint_mgr.as_ref(),
            start_position,
        )?;

    if let Some(ref mgr) = checkpoint_mgr {
        if let Err(e) = mgr.clear() {
            warn!(error = %e, "Failed to clear checkpoint");
        }
    }

    println!();
    println!("=== Summary ===");
    println!("Run time:            {:.2}s", summary.elapsed.as_secs_f64());
    println!("Ids processed:       {}", summary.stats.processed());
    println!("Entries written:     {}", summary.stats.written());
    println!("Entries w/o edges:   {}", summary.stats.empty());
    println!("Connections written: {}", summary.stats.connections());
    println!("Fetch failures:      {}", summary.stats.fetch_failed());
    println!("Normalize failures:  {}", summary.stats.normalize_failed());
    println!("Archive size:        {} bytes", summary.archive.bytes);
    if !summary.recent_failures.is_empty() {
        println!();
        println!("Most recent failures:");
        for failed in &summary.recent_failures {
            println!("  {}: {}", failed.id, failed.reason);
        }
    }

    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let reader = ArchiveReader::open(&args.input)
        .with_context(|| format!("Failed to open archive: {}", args.input))?;

    let mut out = BufWriter::new(io::stdout().lock());
    let mut records = 0u64;
    let mut connections = 0u64;

    for result in reader {
        if args.limit.is_some_and(|limit| records >= limit) {
            break;
        }
        match result {
            Ok(record) => {
                records += 1;
                connections += record.connections.len() as u64;
                serde_json::to_writer(&mut out, &record).context("Failed to write record")?;
                writeln!(out)?;
            }
            Err(ArchiveError::Truncated { offset }) => {
                warn!(offset, "Archive ends with a truncated record");
                eprintln!("Warning: truncated record at offset {}", offset);
                break;
            }
            Err(e) => return Err(e).context("Failed to decode archive"),
        }
    }
    out.flush()?;

    eprintln!("Records:     {}", records);
    eprintln!("Connections: {}", connections);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Run(args) => run_pipeline(args),
        Commands::Inspect(args) => run_inspect(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
