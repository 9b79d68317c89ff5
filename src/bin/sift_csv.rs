//! Builds a sorted table from delimited lines on stdin.
//!
//! Covers both keyed CSV input (`-k`/`-v` select the fields) and bare
//! key-only lists, which become membership tables with a fixed `"1"`
//! value. Input is unsorted by default and routed through the external
//! sorter; `-S` trusts the input order and writes directly.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use siftdb::{
    net, text_merge, Compression, MergePolicy, Progress, Sorter, SorterOptions, Stats, Writer,
    WriterOptions,
};

#[derive(Parser, Debug)]
#[command(name = "sift-csv", about = "Creates a sorted table from CSV input on stdin")]
struct Args {
    /// Output table path.
    output: PathBuf,

    /// Compression: none, snappy, zlib, lz4, lz4hc.
    #[arg(short = 'c', long, default_value = "snappy")]
    compression: String,

    /// Temporary directory for the sorting phase.
    #[arg(short = 't', long)]
    temp_dir: Option<PathBuf>,

    /// Memory ceiling for the sorting phase, in gibibytes.
    #[arg(short = 'm', long, default_value_t = 1)]
    memory: u64,

    /// Skip the sorting phase; input keys must already be sorted.
    #[arg(short = 'S', long)]
    skip_sort: bool,

    /// 1-based field index of the key.
    #[arg(short = 'k', long, default_value_t = 1)]
    key_field: usize,

    /// 1-based field index of the value. Without it every key stores "1".
    #[arg(short = 'v', long)]
    value_field: Option<usize>,

    /// Field delimiter.
    #[arg(short = 'd', long, default_value = ",")]
    delimiter: String,

    /// Store keys in reverse byte order.
    #[arg(short = 'r', long)]
    reverse_key: bool,

    /// Maximum number of fields to split; the last field keeps the rest.
    #[arg(short = 'F', long)]
    max_fields: Option<usize>,

    /// Merge mode for duplicate keys: combine, first, or last.
    #[arg(short = 'M', long, default_value = "combine")]
    merge_mode: String,
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
        eprintln!("sift-csv: error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> siftdb::Result<()> {
    let compression = Compression::from_name(&args.compression)?;
    let policy = MergePolicy::from_name(&args.merge_mode)?;
    if args.key_field == 0 || args.value_field == Some(0) {
        return Err(siftdb::errinput!("field indices are 1-based"));
    }

    let stats = Stats::new();
    let progress = Progress::spawn("sift-csv", Arc::clone(&stats));

    let writer_opts = WriterOptions::default().compression(compression);
    let mut writer = Some(Writer::create(&args.output, writer_opts)?);

    let mut sorter = if args.skip_sort {
        None
    } else {
        let mut opts = SorterOptions::default().max_memory(args.memory * 1024 * 1024 * 1024);
        if let Some(dir) = &args.temp_dir {
            opts = opts.temp_dir(dir);
        }
        Some(Sorter::new(text_merge(policy, Arc::clone(&stats)), opts))
    };

    let mut input = BufReader::new(std::io::stdin().lock());
    let mut buf = Vec::with_capacity(4096);
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf);
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let fields: Vec<&str> = match args.max_fields {
            Some(n) => raw.splitn(n, args.delimiter.as_str()).collect(),
            None => raw.split(args.delimiter.as_str()).collect(),
        };

        let key = match fields.get(args.key_field - 1) {
            Some(k) if !k.is_empty() => *k,
            _ => {
                stats.add_invalid(1);
                continue;
            }
        };
        let value = match args.value_field {
            None => "1",
            Some(i) => match fields.get(i - 1) {
                Some(v) if !v.is_empty() => *v,
                _ => {
                    stats.add_invalid(1);
                    continue;
                }
            },
        };
        stats.add_input(1);

        let key_bytes = if args.reverse_key {
            net::reverse_key(key.as_bytes())
        } else {
            key.as_bytes().to_vec()
        };

        match &mut sorter {
            Some(sorter) => {
                sorter.add(&key_bytes, value.as_bytes())?;
                stats.add_output(1);
            }
            None => {
                // Pre-sorted mode: a misordered key poisons only itself.
                let w = writer.as_mut().expect("writer taken early");
                match w.add(&key_bytes, value.as_bytes()) {
                    Ok(()) => stats.add_output(1),
                    Err(e) => {
                        stats.add_invalid(1);
                        eprintln!("[-] Failed to add {key}: {e}");
                    }
                }
            }
        }
    }

    let writer = writer.take().expect("writer consumed twice");
    match sorter {
        Some(mut sorter) => sorter.write(writer)?,
        None => writer.finalize()?,
    }

    progress.finish();
    Ok(())
}
