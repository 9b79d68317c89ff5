//! The streaming rollup pipeline.
//!
//! Normalizes heterogeneous record streams into structured, merged
//! key→value input for the sorter:
//!
//! ```text
//! line source → N parser threads → tagged `key,tag,value` CSV
//!   → external sort #1 (by key, unique)
//!   → group-by-key concatenation (single-threaded, order-preserving)
//!   → external sort #2 (by key, unique)
//!   → structured merge → sorter → writer
//! ```
//!
//! The first sort guarantees group adjacency so grouping can stream with
//! constant memory; grouping expands record sizes, so the second sort
//! re-establishes run-friendly order before the sorter imports the
//! records. Stages are joined by bounded channels; producers block when a
//! consumer falls behind.

pub mod extsort;
pub mod group;
pub mod parse;
pub mod record;

use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};

use crate::config::{RollupOptions, SorterOptions, WriterOptions};
use crate::error::{Error, Result};
use crate::merge::{json_merge, MergePolicy};
use crate::progress::Stats;
use crate::rollup::extsort::LineSorter;
use crate::rollup::group::Grouper;
use crate::sorter::Sorter;
use crate::table::Writer;

/// Runs the full pipeline from a line source to a finalized table at
/// `output`. Certificate lines (JSON objects) and DNS CSV lines may be
/// mixed freely in the input; each line routes to its parser by shape.
pub fn run(
    mut input: Box<dyn BufRead + Send>,
    output: &Path,
    writer_opts: WriterOptions,
    policy: MergePolicy,
    opts: RollupOptions,
    stats: Arc<Stats>,
) -> Result<()> {
    let (line_tx, line_rx) = sync_channel::<String>(opts.queue_depth);
    let (emit_tx, emit_rx) = sync_channel::<String>(opts.queue_depth);

    // Reader: raw bytes to trimmed lines. Input need not be valid UTF-8
    // end to end; bad bytes degrade to replacement characters inside the
    // offending line only.
    let reader = std::thread::spawn(move || -> Result<()> {
        let mut buf = Vec::with_capacity(4096);
        loop {
            buf.clear();
            let n = input.read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.is_empty() {
                continue;
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            if line_tx.send(line).is_err() {
                // Downstream is gone; its error will surface at join.
                return Ok(());
            }
        }
    });

    // Parsers: fan out over a shared receiver, emit tagged lines.
    let shared_rx = Arc::new(Mutex::new(line_rx));
    let mut parsers = Vec::with_capacity(opts.parser_threads);
    for _ in 0..opts.parser_threads {
        let rx = Arc::clone(&shared_rx);
        let tx = emit_tx.clone();
        let stats = Arc::clone(&stats);
        parsers.push(std::thread::spawn(move || {
            while let Some(line) = next_line(&rx) {
                let parsed = if line.trim_start().starts_with('{') {
                    parse::parse_ct_line(&line)
                } else {
                    parse::parse_dns_line(&line)
                };
                match parsed {
                    Ok(emissions) => {
                        if emissions.is_empty() {
                            continue;
                        }
                        stats.add_input(1);
                        for emission in emissions {
                            if tx.send(emission).is_err() {
                                return;
                            }
                        }
                    }
                    Err(reason) => {
                        stats.add_invalid(1);
                        tracing::warn!(line = %reason, "skipping input line");
                    }
                }
            }
        }));
    }
    drop(emit_tx);

    // External sort #1 consumes emissions as the parsers produce them.
    let mut sort1 = LineSorter::new(opts.sort_memory, opts.temp_dir.clone());
    for line in emit_rx {
        sort1.add_line(line.into_bytes())?;
    }

    reader
        .join()
        .map_err(|_| Error::Io("reader thread panicked".into()))??;
    for parser in parsers {
        parser
            .join()
            .map_err(|_| Error::Io("parser thread panicked".into()))?;
    }

    // Group adjacent keys, feeding external sort #2.
    let mut sort2 = LineSorter::new(opts.sort_memory, opts.temp_dir.clone());
    let mut grouper = Grouper::new();
    for line in sort1.finish()? {
        let line = String::from_utf8_lossy(&line?).into_owned();
        let result = grouper.push(&line);
        if result.invalid {
            stats.add_invalid(1);
            tracing::warn!(line = %line, "skipping unusable sorted line");
        }
        if let Some(grouped) = result.emitted {
            sort2.add_line(grouped.into_bytes())?;
        }
    }
    if let Some(grouped) = grouper.finish() {
        sort2.add_line(grouped.into_bytes())?;
    }

    // Structured merge into the sorter, then drain into the writer.
    let sorter_opts = {
        let mut sorter_opts = SorterOptions::default().max_memory(opts.sort_memory);
        if let Some(dir) = &opts.temp_dir {
            sorter_opts = sorter_opts.temp_dir(dir);
        }
        sorter_opts
    };
    let mut sorter = Sorter::new(json_merge(policy, Arc::clone(&stats)), sorter_opts);
    for line in sort2.finish()? {
        let line = String::from_utf8_lossy(&line?).into_owned();
        match record::structured_merge(&line) {
            Some((key, value)) => {
                stats.add_output(1);
                sorter.add(&key, &value)?;
            }
            None => stats.add_invalid(1),
        }
    }

    let writer = Writer::create(output, writer_opts)?;
    sorter.write(writer)?;

    tracing::info!(
        output = %output.display(),
        input = stats.input(),
        records = stats.output(),
        merged = stats.merged(),
        invalid = stats.invalid(),
        "rollup complete"
    );
    Ok(())
}

fn next_line(rx: &Mutex<Receiver<String>>) -> Option<String> {
    rx.lock().ok()?.recv().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderOptions;
    use crate::net;
    use crate::table::Reader;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn run_pipeline(input: &str) -> Vec<(Vec<u8>, serde_json::Value)> {
        let dir = TempDir::new().expect("tempdir");
        let output = dir.path().join("rollup.stb");
        let stats = Stats::new();
        run(
            Box::new(Cursor::new(input.to_string().into_bytes())),
            &output,
            WriterOptions::default(),
            MergePolicy::Combine,
            RollupOptions::default().parser_threads(2).queue_depth(16),
            stats,
        )
        .expect("rollup failed");

        let reader = Reader::open(&output, ReaderOptions::default()).expect("open failed");
        reader
            .iter_all()
            .expect("iter failed")
            .map(|r| {
                let (k, v) = r.expect("record failed");
                let value = serde_json::from_slice(&v).expect("value not json");
                (k, value)
            })
            .collect()
    }

    #[test]
    fn test_grouped_rollup_end_to_end() {
        let records = run_pipeline(
            "foo.com,a,1.2.3.4\nfoo.com,a,5.6.7.8\nfoo.com,cname,bar.com\n",
        );
        let key = net::reverse_key(b"foo.com");
        let (_, value) = records
            .iter()
            .find(|(k, _)| *k == key)
            .expect("foo.com missing");

        let pairs: Vec<Vec<String>> =
            serde_json::from_value(value.clone()).expect("not a pair array");
        let a_pair = pairs.iter().find(|p| p[0] == "a").expect("no a tag");
        assert_eq!(a_pair[1], "1.2.3.4 5.6.7.8");
        let cname_pair = pairs.iter().find(|p| p[0] == "cname").expect("no cname tag");
        assert_eq!(cname_pair[1], "bar.com");
    }

    #[test]
    fn test_inverse_records_created() {
        let records = run_pipeline("foo.com,a,1.2.3.4\n");
        // The IP side of the relation is stored unreversed.
        let (_, value) = records
            .iter()
            .find(|(k, _)| k == b"1.2.3.4")
            .expect("inverse record missing");
        let pairs: Vec<Vec<String>> =
            serde_json::from_value(value.clone()).expect("not a pair array");
        assert_eq!(
            pairs,
            vec![vec!["r-a".to_string(), "foo.com".to_string()]]
        );
    }

    #[test]
    fn test_duplicate_lines_collapse() {
        let records = run_pipeline("foo.com,a,1.2.3.4\nfoo.com,a,1.2.3.4\n");
        let key = net::reverse_key(b"foo.com");
        let (_, value) = records
            .iter()
            .find(|(k, _)| *k == key)
            .expect("foo.com missing");
        let pairs: Vec<Vec<String>> =
            serde_json::from_value(value.clone()).expect("not a pair array");
        assert_eq!(pairs, vec![vec!["a".to_string(), "1.2.3.4".to_string()]]);
    }

    #[test]
    fn test_ct_lines_produce_certs_objects() {
        let input = concat!(
            r#"{"sha1":"aa","timestamp":1,"common_name":"example.com","dns_names":["example.com"]}"#,
            "\n",
            r#"{"sha1":"bb","timestamp":2,"common_name":"example.com","dns_names":["example.com"]}"#,
            "\n",
        );
        let records = run_pipeline(input);
        let key = net::reverse_key(b"example.com");
        let (_, value) = records
            .iter()
            .find(|(k, _)| *k == key)
            .expect("example.com missing");
        let certs = value["certs"].as_array().expect("no certs array");
        assert_eq!(certs.len(), 2);
    }

    #[test]
    fn test_bad_lines_skipped_not_fatal() {
        let records = run_pipeline(",broken\nfoo.com,a,1.2.3.4\n{not json}\n");
        let key = net::reverse_key(b"foo.com");
        assert!(records.iter().any(|(k, _)| *k == key));
    }

    #[test]
    fn test_keys_sorted_in_output() {
        let records =
            run_pipeline("zzz.org,a,9.9.9.9\naaa.com,a,1.1.1.1\nmmm.net,a,5.5.5.5\n");
        let keys: Vec<_> = records.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
