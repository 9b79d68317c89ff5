//! Table writer.
//!
//! Accepts records in strictly increasing key order, buffers them into
//! data blocks, and on finalize appends the index block and trailer. A
//! finalized file is immutable; a writer dropped before finalizing removes
//! its partial output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WriterOptions;
use crate::error::{Error, Result};
use crate::table::block::{encode_block, BlockBuilder};
use crate::table::index::BlockIndex;
use crate::table::trailer::{Trailer, TRAILER_SIZE};

pub struct Writer {
    file: BufWriter<File>,
    path: PathBuf,
    opts: WriterOptions,
    block: BlockBuilder,
    index: BlockIndex,
    offset: u64,
    last_key: Vec<u8>,
    have_records: bool,
    record_count: u64,
    key_bytes: u64,
    value_bytes: u64,
    finalized: bool,
}

impl Writer {
    /// Creates a new table file at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>, opts: WriterOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
            opts,
            block: BlockBuilder::new(),
            index: BlockIndex::new(),
            offset: 0,
            last_key: Vec::new(),
            have_records: false,
            record_count: 0,
            key_bytes: 0,
            value_bytes: 0,
            finalized: false,
        })
    }

    /// Appends a record. `key` must be strictly greater than every key
    /// added before it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.have_records && key <= self.last_key.as_slice() {
            return Err(Error::OutOfOrder(format!(
                "{:?} <= {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(&self.last_key)
            )));
        }

        self.block.add_entry(key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.have_records = true;
        self.record_count += 1;
        self.key_bytes += key.len() as u64;
        self.value_bytes += value.len() as u64;

        if self.block.len() >= self.opts.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let block_last_key = self.block.last_key().to_vec();
        let payload = self.block.finish();
        let framed = encode_block(&payload, self.opts.compression)?;
        self.file.write_all(&framed)?;
        self.index.push(
            block_last_key,
            self.offset,
            framed.len() as u64,
            payload.len() as u64,
        );
        self.offset += framed.len() as u64;
        Ok(())
    }

    /// Writes the final partial block, the index block, and the trailer,
    /// then syncs the file. The writer is consumed; the file is frozen.
    pub fn finalize(mut self) -> Result<()> {
        self.flush_block()?;

        let index_offset = self.offset;
        let payload = self.index.encode();
        let framed = encode_block(&payload, self.opts.compression)?;
        self.file.write_all(&framed)?;
        self.offset += framed.len() as u64;

        let trailer = Trailer {
            compression: self.opts.compression,
            data_block_count: self.index.len() as u64,
            index_offset,
            index_length: framed.len() as u64,
            key_bytes_total: self.key_bytes,
            value_bytes_total: self.value_bytes,
            record_count: self.record_count,
            bytes_total: self.offset + TRAILER_SIZE,
        };
        self.file.write_all(&trailer.encode())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.finalized = true;

        tracing::debug!(
            path = %self.path.display(),
            records = self.record_count,
            blocks = trailer.data_block_count,
            compression = self.opts.compression.name(),
            "table finalized"
        );
        Ok(())
    }

    /// Abandons the build and removes the partial file.
    pub fn abort(mut self) -> Result<()> {
        self.finalized = true;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
