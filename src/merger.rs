//! K-way merge of sorted record streams.
//!
//! A min-heap keyed on (current key, source index) finds the next smallest
//! key across all sources. All entries equal to the minimum are popped
//! together and their values left-folded through the merge callback in
//! source-registration order, so each distinct key is emitted exactly once:
//!
//! ```text
//! Sources:  [a, d, g, ...]  [b, d, h, ...]  [c, d, i, ...]
//!               ↓               ↓               ↓
//! Heap:     [   a,              b,              c     ]
//!               ↓ (pop minimum, fold equals)
//! Output:       a
//! ```
//!
//! The same machinery drives read-time union over table readers and the
//! sorter's drain over spilled runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::ReaderOptions;
use crate::error::Result;
use crate::merge::MergeFn;
use crate::table::Reader;

/// A sorted stream of owned records.
pub type KvStream<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + Send + 'a>;

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source_index: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source_index == other.source_index
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior; ties on key break by source
        // index so equal keys pop in registration order.
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.source_index.cmp(&other.source_index).reverse(),
            other => other.reverse(),
        }
    }
}

/// Merges N sorted streams into one sorted, duplicate-free stream.
pub struct MergeStream<'a> {
    sources: Vec<KvStream<'a>>,
    heap: BinaryHeap<HeapEntry>,
    merge: MergeFn,
    failed: bool,
}

impl<'a> MergeStream<'a> {
    pub fn new(mut sources: Vec<KvStream<'a>>, merge: MergeFn) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source_index, source) in sources.iter_mut().enumerate() {
            if let Some(entry) = source.next() {
                let (key, value) = entry?;
                heap.push(HeapEntry {
                    key,
                    value,
                    source_index,
                });
            }
        }
        Ok(Self {
            sources,
            heap,
            merge,
            failed: false,
        })
    }

    fn refill(&mut self, source_index: usize) -> Result<()> {
        if let Some(entry) = self.sources[source_index].next() {
            let (key, value) = entry?;
            self.heap.push(HeapEntry {
                key,
                value,
                source_index,
            });
        }
        Ok(())
    }
}

impl Iterator for MergeStream<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut step = || -> Result<Option<(Vec<u8>, Vec<u8>)>> {
            let first = match self.heap.pop() {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let key = first.key;
            let mut value = first.value;
            self.refill(first.source_index)?;

            // Fold every other source holding this key, in source order.
            while let Some(next) = self.heap.peek() {
                if next.key != key {
                    break;
                }
                let next = self.heap.pop().expect("peeked entry vanished");
                value = (&*self.merge)(&key, &value, &next.value)?;
                self.refill(next.source_index)?;
            }
            Ok(Some((key, value)))
        };
        match step() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read-time union of several tables behind the reader interface.
///
/// Values for a key held by multiple sources fold left-to-right through the
/// merge callback in the order the sources were added.
pub struct Merger {
    sources: Vec<Reader>,
    merge: MergeFn,
}

impl Merger {
    pub fn new(merge: MergeFn) -> Self {
        Self {
            sources: Vec::new(),
            merge,
        }
    }

    pub fn add_source(&mut self, reader: Reader) {
        self.sources.push(reader);
    }

    /// Opens `path` and adds it as a source.
    pub fn add_path(&mut self, path: impl AsRef<std::path::Path>, opts: ReaderOptions) -> Result<()> {
        self.sources.push(Reader::open(path, opts)?);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut folded: Option<Vec<u8>> = None;
        for reader in &self.sources {
            if let Some(value) = reader.get(key)? {
                folded = Some(match folded {
                    Some(acc) => (&*self.merge)(key, &acc, &value)?,
                    None => value,
                });
            }
        }
        Ok(folded)
    }

    pub fn iter_all(&self) -> Result<MergeStream<'_>> {
        let mut streams: Vec<KvStream> = Vec::with_capacity(self.sources.len());
        for reader in &self.sources {
            streams.push(Box::new(reader.iter_all()?));
        }
        MergeStream::new(streams, self.merge.clone())
    }

    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<MergeStream<'_>> {
        let mut streams: Vec<KvStream> = Vec::with_capacity(self.sources.len());
        for reader in &self.sources {
            streams.push(Box::new(reader.iter_prefix(prefix)?));
        }
        MergeStream::new(streams, self.merge.clone())
    }

    pub fn iter_range<R>(&self, range: R) -> Result<MergeStream<'_>>
    where
        R: std::ops::RangeBounds<Vec<u8>> + Clone,
    {
        let mut streams: Vec<KvStream> = Vec::with_capacity(self.sources.len());
        for reader in &self.sources {
            streams.push(Box::new(reader.iter_range(range.clone())?));
        }
        MergeStream::new(streams, self.merge.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterOptions;
    use crate::merge::{text_merge, MergePolicy};
    use crate::progress::Stats;
    use crate::table::Writer;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn vec_stream(records: Vec<(&[u8], &[u8])>) -> KvStream<'static> {
        Box::new(
            records
                .into_iter()
                .map(|(k, v)| Ok((k.to_vec(), v.to_vec())))
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    fn concat_merge() -> MergeFn {
        Arc::new(|_k, v0, v1| {
            let mut out = v0.to_vec();
            out.extend_from_slice(v1);
            Ok(out)
        })
    }

    #[test]
    fn test_stream_union() {
        let a = vec_stream(vec![(b"k", b"A")]);
        let b = vec_stream(vec![(b"k", b"B"), (b"m", b"M")]);
        let merged: Vec<_> = MergeStream::new(vec![a, b], concat_merge())
            .expect("stream failed")
            .map(|r| r.expect("record failed"))
            .collect();
        assert_eq!(
            merged,
            vec![
                (b"k".to_vec(), b"AB".to_vec()),
                (b"m".to_vec(), b"M".to_vec()),
            ]
        );
    }

    #[test]
    fn test_fold_order_is_source_order() {
        let a = vec_stream(vec![(b"x", b"1")]);
        let b = vec_stream(vec![(b"x", b"2")]);
        let c = vec_stream(vec![(b"x", b"3")]);
        let merged: Vec<_> = MergeStream::new(vec![a, b, c], concat_merge())
            .expect("stream failed")
            .map(|r| r.expect("record failed"))
            .collect();
        assert_eq!(merged, vec![(b"x".to_vec(), b"123".to_vec())]);
    }

    #[test]
    fn test_interleaved_keys_stay_sorted() {
        let a = vec_stream(vec![(b"a", b"1"), (b"c", b"3"), (b"e", b"5")]);
        let b = vec_stream(vec![(b"b", b"2"), (b"d", b"4")]);
        let keys: Vec<_> = MergeStream::new(vec![a, b], concat_merge())
            .expect("stream failed")
            .map(|r| r.expect("record failed").0)
            .collect();
        assert_eq!(
            keys,
            vec![
                b"a".to_vec(),
                b"b".to_vec(),
                b"c".to_vec(),
                b"d".to_vec(),
                b"e".to_vec()
            ]
        );
    }

    #[test]
    fn test_merge_failure_surfaces() {
        let a = vec_stream(vec![(b"k", b"A")]);
        let b = vec_stream(vec![(b"k", b"B")]);
        let failing: MergeFn =
            Arc::new(|_k, _v0, _v1| Err(crate::Error::MergeFailed("boom".into())));
        let mut merged = MergeStream::new(vec![a, b], failing).expect("stream failed");
        assert!(matches!(
            merged.next(),
            Some(Err(crate::Error::MergeFailed(_)))
        ));
        assert!(merged.next().is_none());
    }

    #[test]
    fn test_merger_over_tables() {
        let dir = TempDir::new().expect("tempdir");

        let path_a = dir.path().join("a.stb");
        let mut writer = Writer::create(&path_a, WriterOptions::default()).expect("create");
        writer.add(b"k", b"A").expect("add");
        writer.finalize().expect("finalize");

        let path_b = dir.path().join("b.stb");
        let mut writer = Writer::create(&path_b, WriterOptions::default()).expect("create");
        writer.add(b"k", b"B").expect("add");
        writer.add(b"m", b"M").expect("add");
        writer.finalize().expect("finalize");

        let stats = Stats::new();
        let mut merger = Merger::new(text_merge(MergePolicy::Combine, stats));
        merger
            .add_path(&path_a, ReaderOptions::default())
            .expect("open a");
        merger
            .add_path(&path_b, ReaderOptions::default())
            .expect("open b");

        let merged: Vec<_> = merger
            .iter_all()
            .expect("iter failed")
            .map(|r| r.expect("record failed"))
            .collect();
        assert_eq!(
            merged,
            vec![
                (b"k".to_vec(), b"A B".to_vec()),
                (b"m".to_vec(), b"M".to_vec()),
            ]
        );

        assert_eq!(merger.get(b"k").expect("get"), Some(b"A B".to_vec()));
        assert_eq!(merger.get(b"m").expect("get"), Some(b"M".to_vec()));
        assert_eq!(merger.get(b"z").expect("get"), None);
    }
}
