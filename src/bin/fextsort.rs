use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use extsort_rs::record::RecordOrder;
use extsort_rs::sort::{
    DEFAULT_PREFETCH, SortConfig, SortError, check_sorted, default_output_path,
    default_shard_count, external_sort, parse_buffer_size,
};

#[derive(Parser)]
#[command(
    name = "fextsort",
    about = "Sort a file of 4096-byte records using sharded external merge sort"
)]
struct Cli {
    /// File to sort
    #[arg(short = 'f', long = "file", value_name = "INPUT")]
    input: PathBuf,

    /// Create the working directory under DIR, not $TMPDIR or /tmp
    #[arg(short = 't', long = "tempdir", value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// Write INPUT.sorted into DIR instead of next to INPUT
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Number of shards sorted concurrently
    #[arg(short = 'j', long = "shards", value_name = "N")]
    shards: Option<usize>,

    /// Use SIZE of memory for buffered records, split across shards
    #[arg(short = 'S', long = "buffer-size", value_name = "SIZE")]
    buffer_size: Option<String>,

    /// Records queued ahead per merge input
    #[arg(long = "prefetch", value_name = "N", default_value_t = DEFAULT_PREFETCH)]
    prefetch: usize,

    /// How records compare: bytes, or nul-terminated
    #[arg(
        long = "order",
        value_name = "ORDER",
        default_value = "bytes",
        value_parser = parse_order
    )]
    order: RecordOrder,

    /// Check the sorted output after sorting
    #[arg(long = "verify")]
    verify: bool,

    /// Check whether INPUT is already sorted; do not sort
    #[arg(short = 'c', long = "check")]
    check: bool,

    /// Log per-shard progress
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn parse_order(s: &str) -> Result<RecordOrder, String> {
    s.parse()
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

fn build_config(cli: &Cli) -> anyhow::Result<SortConfig> {
    let mut config = SortConfig::new(
        &cli.input,
        default_output_path(&cli.input, cli.output_dir.as_deref()),
        PathBuf::new(),
    );
    config.shards = cli.shards.unwrap_or_else(default_shard_count);
    if let Some(ref size) = cli.buffer_size {
        config.buffer_size = parse_buffer_size(size)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid -S argument '{}'", size))?;
    }
    config.prefetch = cli.prefetch;
    config.order = cli.order;
    config.verify = cli.verify;
    Ok(config)
}

/// Fresh working directory under `parent`; removed when dropped.
fn create_work_dir(parent: &Path) -> anyhow::Result<tempfile::TempDir> {
    if !parent.is_dir() {
        bail!(
            "temp directory '{}' doesn't exist or is not a directory",
            parent.display()
        );
    }
    tempfile::Builder::new()
        .prefix("fextsort-")
        .tempdir_in(parent)
        .with_context(|| format!("failed to create working directory in {}", parent.display()))
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if !cli.input.is_file() {
        bail!("cannot read '{}': No such file", cli.input.display());
    }
    let mut config = build_config(cli)?;

    if cli.check {
        let records = check_sorted(&cli.input, &config)?;
        info!(path = %cli.input.display(), records, "file is sorted");
        return Ok(());
    }

    let parent = cli.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    let work_dir = create_work_dir(&parent)?;
    config.temp_dir = work_dir.path().to_path_buf();

    let summary = external_sort(&config)?;
    info!(
        output = %config.output.display(),
        records = summary.records,
        batches = summary.batches.iter().sum::<usize>(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "sorted"
    );

    work_dir
        .close()
        .with_context(|| format!("failed to remove {}", config.temp_dir.display()))?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        let disorder = e
            .downcast_ref::<SortError>()
            .is_some_and(SortError::is_verification);
        eprintln!("fextsort: {:#}", e);
        process::exit(if disorder { 1 } else { 2 });
    }
}
