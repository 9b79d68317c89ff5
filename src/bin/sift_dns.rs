//! Builds a sorted table from heterogeneous DNS / certificate record
//! lines on stdin, via the full rollup pipeline: parse and tag (with
//! inverse relations), sort, group by key, sort again, structured merge,
//! then drain through the sorter into the table writer.

use std::io::BufReader;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use siftdb::{rollup, Compression, MergePolicy, Progress, RollupOptions, Stats, WriterOptions};

#[derive(Parser, Debug)]
#[command(
    name = "sift-dns",
    about = "Creates a sorted table from DNS CSV and decoded certificate lines on stdin"
)]
struct Args {
    /// Output table path.
    output: PathBuf,

    /// Compression: none, snappy, zlib, lz4, lz4hc.
    #[arg(short = 'c', long, default_value = "snappy")]
    compression: String,

    /// Temporary directory for the sorting phases.
    #[arg(short = 't', long)]
    temp_dir: Option<PathBuf>,

    /// Memory ceiling for each sorting phase, in gibibytes.
    #[arg(short = 'm', long, default_value_t = 1)]
    memory: u64,

    /// Merge mode for duplicate keys: combine, first, or last.
    #[arg(short = 'M', long, default_value = "combine")]
    merge_mode: String,

    /// Parser worker threads. Defaults to the core count.
    #[arg(long)]
    threads: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("sift-dns: error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> siftdb::Result<()> {
    let compression = Compression::from_name(&args.compression)?;
    let policy = MergePolicy::from_name(&args.merge_mode)?;

    let mut opts = RollupOptions::default().sort_memory(args.memory * 1024 * 1024 * 1024);
    if let Some(dir) = &args.temp_dir {
        opts = opts.temp_dir(dir);
    }
    if let Some(threads) = args.threads {
        opts = opts.parser_threads(threads);
    }

    let stats = Stats::new();
    let progress = Progress::spawn("sift-dns", Arc::clone(&stats));

    let result = rollup::run(
        Box::new(BufReader::new(std::io::stdin())),
        &args.output,
        WriterOptions::default().compression(compression),
        policy,
        opts,
        Arc::clone(&stats),
    );

    progress.finish();
    result
}
