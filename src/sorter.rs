//! External-memory sorter.
//!
//! Records arrive in any order and accumulate in an in-memory buffer. When
//! the buffer's estimated footprint crosses the configured ceiling it is
//! sorted, duplicate keys are collapsed through the merge callback, and the
//! result is spilled as a sorted run in the table format. Draining merges
//! all runs plus the live buffer through the same k-way machinery the
//! read-time merger uses, feeding the writer a strictly increasing stream.
//!
//! Equal-key folds observe insertion order: the buffer sort is stable, and
//! runs enter the drain merge oldest first with the live buffer last, so
//! `add(k,v1) .. add(k,vn)` always folds as `merge(..merge(v1,v2).., vn)`
//! no matter where the spill boundaries fell.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::codec::Compression;
use crate::config::{ReaderOptions, SorterOptions, WriterOptions};
use crate::error::{Error, Result};
use crate::merge::MergeFn;
use crate::merger::{KvStream, MergeStream};
use crate::table::{Reader, Writer};

/// Estimated bookkeeping bytes per buffered record, on top of key and
/// value bytes.
const RECORD_OVERHEAD: u64 = 32;

pub struct Sorter {
    opts: SorterOptions,
    merge: MergeFn,
    buffer: Vec<(Vec<u8>, Vec<u8>)>,
    buffered_bytes: u64,
    temp_dir: Option<TempDir>,
    runs: Vec<PathBuf>,
    drained: bool,
}

impl Sorter {
    pub fn new(merge: MergeFn, opts: SorterOptions) -> Self {
        Self {
            opts,
            merge,
            buffer: Vec::new(),
            buffered_bytes: 0,
            temp_dir: None,
            runs: Vec::new(),
            drained: false,
        }
    }

    /// Adds a record. Keys may repeat and arrive in any order; a record
    /// larger than the memory ceiling is admitted and spills immediately.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.drained {
            return Err(Error::AlreadyFinalized);
        }
        self.buffered_bytes += key.len() as u64 + value.len() as u64 + RECORD_OVERHEAD;
        self.buffer.push((key.to_vec(), value.to_vec()));
        if self.buffered_bytes > self.opts.max_memory {
            self.spill()?;
        }
        Ok(())
    }

    /// Sorts the live buffer, collapses duplicates, and writes it out as a
    /// temporary run.
    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let records = sort_and_fold(std::mem::take(&mut self.buffer), &self.merge)?;
        self.buffered_bytes = 0;

        if self.temp_dir.is_none() {
            self.temp_dir = Some(match &self.opts.temp_dir {
                Some(dir) => TempDir::with_prefix_in("sift-sorter-", dir)?,
                None => TempDir::with_prefix("sift-sorter-")?,
            });
        }
        let dir = self.temp_dir.as_ref().expect("temp dir just created");
        let path = dir.path().join(format!("run-{:06}.stb", self.runs.len()));

        // Runs favor fast compression regardless of the output table's
        // choice; they live only until the drain.
        let opts = WriterOptions::default().compression(Compression::Snappy);
        let mut writer = Writer::create(&path, opts)?;
        for (key, value) in &records {
            writer.add(key, value)?;
        }
        let count = writer.record_count();
        writer.finalize()?;

        tracing::debug!(
            run = self.runs.len(),
            records = count,
            path = %path.display(),
            "sorter spilled run"
        );
        self.runs.push(path);
        Ok(())
    }

    /// Drains every run plus the live buffer into `writer` in strictly
    /// increasing key order, finalizing it. Temp files are removed. The
    /// sorter can be drained exactly once.
    pub fn write(&mut self, mut writer: Writer) -> Result<()> {
        if self.drained {
            return Err(Error::AlreadyFinalized);
        }
        self.drained = true;

        let buffered = sort_and_fold(std::mem::take(&mut self.buffer), &self.merge)?;
        self.buffered_bytes = 0;

        // Runs enter oldest first, the live buffer last: values spilled
        // earlier were added earlier, so the fold stays in insertion order.
        let mut streams: Vec<KvStream> = Vec::with_capacity(self.runs.len() + 1);
        for path in &self.runs {
            let reader = Reader::open(path, ReaderOptions::default())?;
            streams.push(Box::new(reader.iter_all()?));
        }
        streams.push(Box::new(buffered.into_iter().map(Ok)));

        let merged = MergeStream::new(streams, self.merge.clone())?;
        for record in merged {
            let (key, value) = record?;
            writer.add(&key, &value)?;
        }
        writer.finalize()?;

        for path in self.runs.drain(..) {
            let _ = std::fs::remove_file(path);
        }
        self.temp_dir = None;
        Ok(())
    }

    pub fn buffered_records(&self) -> usize {
        self.buffer.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

/// Stable-sorts records by key and folds adjacent duplicates pairwise
/// left-to-right, preserving insertion order on equal keys.
fn sort_and_fold(
    mut records: Vec<(Vec<u8>, Vec<u8>)>,
    merge: &MergeFn,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    records.sort_by(|a, b| a.0.cmp(&b.0));
    let mut folded: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(records.len());
    for (key, value) in records {
        match folded.last_mut() {
            Some((last_key, last_value)) if *last_key == key => {
                *last_value = (&**merge)(&key, last_value, &value)?;
            }
            _ => folded.push((key, value)),
        }
    }
    Ok(folded)
}
