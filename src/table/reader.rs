//! Table reader.
//!
//! Opening a table validates the trailer and loads the index block; data
//! blocks are fetched and decompressed on demand. Point lookups binary
//! search the index for the one candidate block; iterators walk blocks in
//! order, each holding an independent file handle so any number can run
//! concurrently against one reader.

use std::fs::File;
use std::ops::{Bound, RangeBounds};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::Compression;
use crate::config::ReaderOptions;
use crate::corrupt;
use crate::error::Result;
use crate::table::block::{decode_block, BlockCursor};
use crate::table::index::{BlockIndex, IndexEntry};
use crate::table::trailer::{Trailer, TRAILER_SIZE};

#[derive(Debug)]
pub struct Reader {
    file: File,
    path: PathBuf,
    trailer: Trailer,
    index: Arc<BlockIndex>,
    opts: ReaderOptions,
}

impl Reader {
    /// Opens a finalized table file, validating the trailer and loading the
    /// index block.
    pub fn open(path: impl AsRef<Path>, opts: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        if size < TRAILER_SIZE {
            return Err(corrupt!(
                "{}: {} bytes is smaller than the trailer",
                path.display(),
                size
            ));
        }

        let mut buf = [0u8; TRAILER_SIZE as usize];
        file.read_exact_at(&mut buf, size - TRAILER_SIZE)?;
        let trailer = Trailer::decode(&buf)?;

        let index_end = trailer
            .index_offset
            .checked_add(trailer.index_length)
            .ok_or_else(|| corrupt!("index extent overflow"))?;
        if index_end > size - TRAILER_SIZE {
            return Err(corrupt!(
                "index extent {}..{} exceeds file body",
                trailer.index_offset,
                index_end
            ));
        }

        // The index block is always verified; per-data-block verification
        // is governed by the options.
        let mut framed = vec![0u8; trailer.index_length as usize];
        file.read_exact_at(&mut framed, trailer.index_offset)?;
        let (payload, _) = decode_block(&framed, trailer.compression, true)?;
        let index = BlockIndex::decode(payload)?;

        if index.len() as u64 != trailer.data_block_count {
            return Err(corrupt!(
                "index holds {} blocks, trailer says {}",
                index.len(),
                trailer.data_block_count
            ));
        }

        Ok(Self {
            file,
            path,
            trailer,
            index: Arc::new(index),
            opts,
        })
    }

    /// Point lookup. A miss is `Ok(None)`, never an error.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entry = match self.index.find(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let payload = read_block(
            &self.file,
            entry,
            self.trailer.compression,
            self.opts.verify_checksums,
        )?;
        for record in BlockCursor::new(payload) {
            let (k, v) = record?;
            if k == key {
                return Ok(Some(v));
            }
            if k.as_slice() > key {
                break;
            }
        }
        Ok(None)
    }

    /// Iterates every record in key order.
    pub fn iter_all(&self) -> Result<TableIter> {
        self.iter(Bound::Unbounded, Bound::Unbounded, None)
    }

    /// Iterates records whose key starts with `prefix`, in key order.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<TableIter> {
        self.iter(
            Bound::Included(prefix.to_vec()),
            Bound::Unbounded,
            Some(prefix.to_vec()),
        )
    }

    /// Iterates records within the given key range.
    pub fn iter_range<R>(&self, range: R) -> Result<TableIter>
    where
        R: RangeBounds<Vec<u8>>,
    {
        self.iter(
            range.start_bound().cloned(),
            range.end_bound().cloned(),
            None,
        )
    }

    fn iter(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        prefix: Option<Vec<u8>>,
    ) -> Result<TableIter> {
        // Each iterator gets its own handle so concurrent iterators never
        // race on a shared file offset.
        let file = File::open(&self.path)?;
        Ok(TableIter::new(
            file,
            Arc::clone(&self.index),
            self.trailer.compression,
            self.opts.verify_checksums,
            lower,
            upper,
            prefix,
        ))
    }

    pub fn record_count(&self) -> u64 {
        self.trailer.record_count
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_block(
    file: &File,
    entry: &IndexEntry,
    compression: Compression,
    verify: bool,
) -> Result<Vec<u8>> {
    let mut framed = vec![0u8; entry.length as usize];
    file.read_exact_at(&mut framed, entry.offset)?;
    let (payload, _) = decode_block(&framed, compression, verify)?;
    if payload.len() as u64 != entry.uncompressed {
        return Err(corrupt!(
            "block payload is {} bytes, index says {}",
            payload.len(),
            entry.uncompressed
        ));
    }
    Ok(payload)
}

/// A lazy, single-pass iterator over a key range of one table.
pub struct TableIter {
    file: File,
    index: Arc<BlockIndex>,
    compression: Compression,
    verify: bool,
    next_block: usize,
    cursor: Option<BlockCursor>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    prefix: Option<Vec<u8>>,
    seeking: bool,
    done: bool,
}

impl TableIter {
    #[allow(clippy::too_many_arguments)]
    fn new(
        file: File,
        index: Arc<BlockIndex>,
        compression: Compression,
        verify: bool,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        prefix: Option<Vec<u8>>,
    ) -> Self {
        let (next_block, seeking) = match &lower {
            Bound::Included(key) | Bound::Excluded(key) => (index.first_candidate(key), true),
            Bound::Unbounded => (0, false),
        };
        Self {
            file,
            index,
            compression,
            verify,
            next_block,
            cursor: None,
            lower,
            upper,
            prefix,
            seeking,
            done: false,
        }
    }

}

fn past_lower(lower: &Bound<Vec<u8>>, key: &[u8]) -> bool {
    match lower {
        Bound::Included(lo) => key >= lo.as_slice(),
        Bound::Excluded(lo) => key > lo.as_slice(),
        Bound::Unbounded => true,
    }
}

fn past_upper(upper: &Bound<Vec<u8>>, prefix: &Option<Vec<u8>>, key: &[u8]) -> bool {
    if let Some(prefix) = prefix {
        if !key.starts_with(prefix) {
            return true;
        }
    }
    match upper {
        Bound::Included(hi) => key > hi.as_slice(),
        Bound::Excluded(hi) => key >= hi.as_slice(),
        Bound::Unbounded => false,
    }
}

impl Iterator for TableIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(cursor) = &mut self.cursor {
                for record in cursor.by_ref() {
                    let (key, value) = match record {
                        Ok(kv) => kv,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    };
                    if self.seeking {
                        if !past_lower(&self.lower, &key) {
                            continue;
                        }
                        self.seeking = false;
                    }
                    if past_upper(&self.upper, &self.prefix, &key) {
                        self.done = true;
                        return None;
                    }
                    return Some(Ok((key, value)));
                }
                self.cursor = None;
            }

            let entry = match self.index.entry(self.next_block) {
                Some(entry) => entry,
                None => {
                    self.done = true;
                    return None;
                }
            };
            match read_block(&self.file, entry, self.compression, self.verify) {
                Ok(payload) => {
                    self.cursor = Some(BlockCursor::new(payload));
                    self.next_block += 1;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::config::WriterOptions;
    use crate::table::writer::Writer;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn write_table(
        dir: &TempDir,
        name: &str,
        opts: WriterOptions,
        records: &[(&[u8], &[u8])],
    ) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut writer = Writer::create(&path, opts).expect("create failed");
        for (key, value) in records {
            writer.add(key, value).expect("add failed");
        }
        writer.finalize().expect("finalize failed");
        path
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_table(
            &dir,
            "simple.stb",
            WriterOptions::default(),
            &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")],
        );

        let reader = Reader::open(&path, ReaderOptions::default()).expect("open failed");
        assert_eq!(reader.record_count(), 3);

        let records: Vec<_> = reader
            .iter_all()
            .expect("iter failed")
            .map(|r| r.expect("record failed"))
            .collect();
        assert_eq!(
            records,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );

        assert_eq!(reader.get(b"b").expect("get failed"), Some(b"2".to_vec()));
        assert_eq!(reader.get(b"z").expect("get failed"), None);
    }

    #[test]
    fn test_multi_block_scan_ordered() {
        let dir = TempDir::new().expect("tempdir");
        let records: Vec<(Vec<u8>, Vec<u8>)> = (0..500)
            .map(|i| {
                (
                    format!("key_{i:04}").into_bytes(),
                    format!("value_{i:04}").into_bytes(),
                )
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = records
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let path = write_table(
            &dir,
            "multi.stb",
            WriterOptions::default().block_size(256),
            &borrowed,
        );

        let reader = Reader::open(&path, ReaderOptions::default()).expect("open failed");
        assert!(reader.trailer().data_block_count > 1);

        let scanned: Vec<_> = reader
            .iter_all()
            .expect("iter failed")
            .map(|r| r.expect("record failed"))
            .collect();
        assert_eq!(scanned, records);

        for (key, value) in &records {
            assert_eq!(reader.get(key).expect("get failed").as_ref(), Some(value));
        }
    }

    #[test]
    fn test_prefix_scan_exact_set() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_table(
            &dir,
            "prefix.stb",
            WriterOptions::default().block_size(64),
            &[
                (b"moc.elpmaxe", b"root"),
                (b"moc.elpmaxe.a", b"sub-a"),
                (b"moc.elpmaxe.b", b"sub-b"),
                (b"moc.rehto", b"other"),
                (b"gro.elpmaxe", b"org"),
            ],
        );

        let reader = Reader::open(&path, ReaderOptions::default()).expect("open failed");
        let hits: Vec<_> = reader
            .iter_prefix(b"moc.elpmaxe")
            .expect("iter failed")
            .map(|r| r.expect("record failed"))
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            hits,
            vec![
                b"moc.elpmaxe".to_vec(),
                b"moc.elpmaxe.a".to_vec(),
                b"moc.elpmaxe.b".to_vec(),
            ]
        );

        let none: Vec<_> = reader
            .iter_prefix(b"ten.")
            .expect("iter failed")
            .collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_range_scan_bounds() {
        let dir = TempDir::new().expect("tempdir");
        let records: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
            .map(|i| {
                (
                    format!("key_{i:03}").into_bytes(),
                    format!("v{i}").into_bytes(),
                )
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = records
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let path = write_table(
            &dir,
            "range.stb",
            WriterOptions::default().block_size(128),
            &borrowed,
        );
        let reader = Reader::open(&path, ReaderOptions::default()).expect("open failed");

        let scanned: Vec<_> = reader
            .iter_range(b"key_010".to_vec()..=b"key_020".to_vec())
            .expect("iter failed")
            .map(|r| r.expect("record failed"))
            .collect();
        assert_eq!(scanned, records[10..=20].to_vec());

        let scanned = reader
            .iter_range(b"key_090".to_vec()..)
            .expect("iter failed")
            .count();
        assert_eq!(scanned, 10);
    }

    #[test]
    fn test_checksum_verification_catches_flips() {
        let dir = TempDir::new().expect("tempdir");
        let records: Vec<(Vec<u8>, Vec<u8>)> = (0..200)
            .map(|i| {
                (
                    format!("key_{i:04}").into_bytes(),
                    format!("value_{i:04}").into_bytes(),
                )
            })
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> = records
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();
        let path = write_table(
            &dir,
            "flip.stb",
            WriterOptions::default()
                .compression(Compression::None)
                .block_size(128),
            &borrowed,
        );

        // Flip one byte in the first data block's checksum.
        let reader = Reader::open(&path, ReaderOptions::default()).expect("open failed");
        let first = reader.index.entry(0).expect("no blocks").clone();
        drop(reader);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("reopen failed");
        let crc_pos = first.offset + first.length - 1;
        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(crc_pos)).expect("seek failed");
        std::io::Read::read_exact(&mut file, &mut byte).expect("read failed");
        file.seek(SeekFrom::Start(crc_pos)).expect("seek failed");
        file.write_all(&[byte[0] ^ 0xff]).expect("write failed");
        drop(file);

        let verifying =
            Reader::open(&path, ReaderOptions::default().verify_checksums(true))
                .expect("open failed");
        let err = verifying
            .iter_all()
            .expect("iter failed")
            .find_map(|r| r.err());
        assert!(matches!(err, Some(crate::Error::Corrupt(_))));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("tiny.stb");
        std::fs::write(&path, b"short").expect("write failed");
        assert!(matches!(
            Reader::open(&path, ReaderOptions::default()).unwrap_err(),
            crate::Error::Corrupt(_)
        ));
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_table(&dir, "empty.stb", WriterOptions::default(), &[]);
        let reader = Reader::open(&path, ReaderOptions::default()).expect("open failed");
        assert_eq!(reader.record_count(), 0);
        assert_eq!(reader.get(b"anything").expect("get failed"), None);
        assert_eq!(reader.iter_all().expect("iter failed").count(), 0);
    }
}
