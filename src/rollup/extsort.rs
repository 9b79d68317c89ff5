//! External-memory line sort with unique output.
//!
//! The in-process replacement for the `sort -u` stages of the rollup:
//! lines accumulate in a chunk, each full chunk is sorted, deduplicated,
//! and spilled to an anonymous temp file, and `finish` k-way merges the
//! spilled runs with the final chunk. Ordering is byte-lexicographic by
//! construction, so locale handling does not exist here. Duplicate lines
//! are emitted once, matching `sort -u` over whole lines.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::error::Result;

/// Estimated bookkeeping bytes per buffered line.
const LINE_OVERHEAD: u64 = 24;

pub struct LineSorter {
    chunk: Vec<Vec<u8>>,
    chunk_bytes: u64,
    max_bytes: u64,
    temp_dir: Option<PathBuf>,
    runs: Vec<File>,
}

impl LineSorter {
    pub fn new(max_bytes: u64, temp_dir: Option<PathBuf>) -> Self {
        Self {
            chunk: Vec::new(),
            chunk_bytes: 0,
            max_bytes,
            temp_dir,
            runs: Vec::new(),
        }
    }

    /// Adds one line, without its newline terminator.
    pub fn add_line(&mut self, line: Vec<u8>) -> Result<()> {
        self.chunk_bytes += line.len() as u64 + LINE_OVERHEAD;
        self.chunk.push(line);
        if self.chunk_bytes > self.max_bytes {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        self.chunk.sort_unstable();
        self.chunk.dedup();

        let file = match &self.temp_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let mut out = BufWriter::new(file);
        for line in &self.chunk {
            out.write_all(line)?;
            out.write_all(b"\n")?;
        }
        let mut file = out.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;

        tracing::debug!(
            run = self.runs.len(),
            lines = self.chunk.len(),
            "line sort spilled run"
        );
        self.runs.push(file);
        self.chunk.clear();
        self.chunk_bytes = 0;
        Ok(())
    }

    /// Consumes the sorter and returns the merged, sorted, unique stream.
    pub fn finish(mut self) -> Result<SortedLines> {
        self.chunk.sort_unstable();
        self.chunk.dedup();

        let mut sources: Vec<RunReader> = Vec::with_capacity(self.runs.len() + 1);
        for file in self.runs {
            sources.push(RunReader::File(BufReader::new(file)));
        }
        sources.push(RunReader::Memory(self.chunk.into_iter()));

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, source) in sources.iter_mut().enumerate() {
            if let Some(line) = source.next_line()? {
                heap.push(Reverse((line, i)));
            }
        }
        Ok(SortedLines {
            sources,
            heap,
            last: None,
            failed: false,
        })
    }
}

enum RunReader {
    File(BufReader<File>),
    Memory(std::vec::IntoIter<Vec<u8>>),
}

impl RunReader {
    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            RunReader::Memory(iter) => Ok(iter.next()),
            RunReader::File(reader) => {
                let mut line = Vec::new();
                let n = reader.read_until(b'\n', &mut line)?;
                if n == 0 {
                    return Ok(None);
                }
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Ok(Some(line))
            }
        }
    }
}

/// Merged output of a [`LineSorter`]: strictly increasing unique lines.
pub struct SortedLines {
    sources: Vec<RunReader>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>,
    last: Option<Vec<u8>>,
    failed: bool,
}

impl Iterator for SortedLines {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let Reverse((line, source)) = self.heap.pop()?;
            match self.sources[source].next_line() {
                Ok(Some(next)) => self.heap.push(Reverse((next, source))),
                Ok(None) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
            // Identical lines in different runs collapse to one.
            if self.last.as_ref() == Some(&line) {
                continue;
            }
            self.last = Some(line.clone());
            return Some(Ok(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sorter: LineSorter) -> Vec<String> {
        sorter
            .finish()
            .expect("finish failed")
            .map(|r| String::from_utf8(r.expect("line failed")).expect("utf8"))
            .collect()
    }

    #[test]
    fn test_in_memory_sort_unique() {
        let mut sorter = LineSorter::new(1 << 20, None);
        for line in ["banana", "apple", "cherry", "apple", "banana"] {
            sorter.add_line(line.as_bytes().to_vec()).expect("add failed");
        }
        assert_eq!(drain(sorter), vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn test_spilled_runs_merge_unique() {
        // A ceiling small enough that every few lines spill a run.
        let mut sorter = LineSorter::new(100, None);
        let mut expected = Vec::new();
        for i in (0..200).rev() {
            let line = format!("key_{:04},tag,value", i % 50);
            sorter.add_line(line.clone().into_bytes()).expect("add failed");
            expected.push(line);
        }
        expected.sort();
        expected.dedup();
        assert_eq!(drain(sorter), expected);
    }

    #[test]
    fn test_byte_lexicographic_order() {
        let mut sorter = LineSorter::new(1 << 20, None);
        for line in ["B", "a", "A", "b", "1"] {
            sorter.add_line(line.as_bytes().to_vec()).expect("add failed");
        }
        // Uppercase sorts before lowercase in byte order.
        assert_eq!(drain(sorter), vec!["1", "A", "B", "a", "b"]);
    }

    #[test]
    fn test_empty_input() {
        let sorter = LineSorter::new(1 << 20, None);
        assert!(drain(sorter).is_empty());
    }
}
