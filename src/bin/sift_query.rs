//! Queries one or more sorted tables as a merged set.
//!
//! Positional arguments are table files or directories (expanded to their
//! regular files). Exactly one search shape applies per run: full scan,
//! forward prefix, reversed prefix, `--domain`, or `--cidr`. A file that
//! fails to open is reported and skipped; the remaining tables are still
//! scanned, and the exit code reports the failure.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use siftdb::query;
use siftdb::{json_merge, net, Merger, MergePolicy, ReaderOptions, Stats};

#[derive(Parser, Debug)]
#[command(name = "sift-query", about = "Queries one or more sorted tables")]
struct Args {
    /// Table files or directories of table files.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Display keys only.
    #[arg(short = 'k', long)]
    keys_only: bool,

    /// Display values only.
    #[arg(short = 'v', long)]
    values_only: bool,

    /// Only return keys with this prefix.
    #[arg(short = 'p', long)]
    prefix: Option<String>,

    /// Only return keys with this prefix, applied in reverse form.
    #[arg(short = 'r', long)]
    rev_prefix: Option<String>,

    /// Display matched keys in reverse form.
    #[arg(short = 'R', long)]
    rev_key: bool,

    /// Print each record as a single line of JSON.
    #[arg(short = 'j', long)]
    json: bool,

    /// Return the domain and all of its subdomains.
    #[arg(long)]
    domain: Option<String>,

    /// Return all records inside an IPv4 CIDR (IPv6 hosts as /128).
    #[arg(long)]
    cidr: Option<String>,

    /// Skip per-block checksum verification.
    #[arg(long)]
    no_verify: bool,
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
    process::exit(run(&args));
}

fn run(args: &Args) -> i32 {
    if args.keys_only && args.values_only {
        eprintln!("sift-query: error: only one of -k or -v can be specified");
        return 1;
    }
    let searches = [
        args.prefix.is_some(),
        args.rev_prefix.is_some(),
        args.domain.is_some(),
        args.cidr.is_some(),
    ]
    .iter()
    .filter(|&&set| set)
    .count();
    if searches > 1 {
        eprintln!("sift-query: error: only one of -p, -r, --domain, or --cidr can be specified");
        return 1;
    }

    let reader_opts = ReaderOptions::default().verify_checksums(!args.no_verify);
    let stats = Stats::new();
    let mut merger = Merger::new(json_merge(MergePolicy::Combine, stats));
    let mut open_failures = 0;
    for path in expand_paths(&args.paths) {
        if let Err(e) = merger.add_path(&path, reader_opts.clone()) {
            eprintln!("sift-query: error reading {}: {e}", path.display());
            open_failures += 1;
        }
    }
    if merger.source_count() == 0 {
        eprintln!("sift-query: error: no tables could be opened");
        return 1;
    }

    // Domain results always display re-reversed.
    let rev_key = args.rev_key || args.domain.is_some();
    let mut sink = output_sink(args, rev_key);

    let result = if let Some(domain) = &args.domain {
        query::scan_domain(&merger, domain, &mut sink)
    } else if let Some(cidr) = &args.cidr {
        query::scan_cidr(&merger, cidr, &mut sink)
    } else if let Some(prefix) = &args.prefix {
        query::scan_prefix(&merger, prefix.as_bytes(), &mut sink)
    } else if let Some(rev_prefix) = &args.rev_prefix {
        let reversed = net::reverse_key(rev_prefix.as_bytes());
        query::scan_prefix(&merger, &reversed, &mut sink)
    } else {
        query::scan_all(&merger, &mut sink)
    };

    if let Err(e) = result {
        eprintln!("sift-query: error: {e}");
        return 1;
    }
    if open_failures > 0 {
        return 1;
    }
    0
}

/// Directories expand to their regular files; files pass through.
fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for path in paths {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => match std::fs::read_dir(path) {
                Ok(entries) => {
                    let mut files: Vec<PathBuf> = entries
                        .flatten()
                        .map(|entry| entry.path())
                        .filter(|p| p.is_file())
                        .collect();
                    files.sort();
                    out.extend(files);
                }
                Err(e) => eprintln!("sift-query: error listing {}: {e}", path.display()),
            },
            _ => out.push(path.clone()),
        }
    }
    out
}

fn output_sink(args: &Args, rev_key: bool) -> impl FnMut(&[u8], &[u8]) -> siftdb::Result<()> {
    let keys_only = args.keys_only;
    let values_only = args.values_only;
    let json = args.json;
    move |key: &[u8], value: &[u8]| {
        let key = if rev_key {
            net::reverse_key(key)
        } else {
            key.to_vec()
        };
        let key = String::from_utf8_lossy(&key);
        let value_str = String::from_utf8_lossy(value);

        if json {
            let val: serde_json::Value = match serde_json::from_slice(value) {
                Ok(val) => val,
                Err(e) => {
                    eprintln!("sift-query: could not parse value for {key} as json: {e}");
                    return Ok(());
                }
            };
            let line = serde_json::json!({ "key": key, "val": val });
            println!("{line}");
        } else if keys_only {
            println!("{key}");
        } else if values_only {
            println!("{value_str}");
        } else {
            println!("{key}\t{value_str}");
        }
        Ok(())
    }
}
