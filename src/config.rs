use std::path::PathBuf;

use crate::codec::Compression;

/// Target uncompressed size for a data block. A block may exceed this by
/// one record: the record that crosses the threshold still lands in the
/// block that was open when it arrived.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Default memory ceiling for the external sorter (1 GiB).
pub const DEFAULT_SORTER_MEMORY: u64 = 1024 * 1024 * 1024;

/// Options for creating a table writer.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Compression applied to data and index blocks.
    pub compression: Compression,

    /// Uncompressed block payload target, in bytes.
    pub block_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl WriterOptions {
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }
}

/// Options for opening a table reader.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Verify the crc32c of every block as it is decompressed. When false,
    /// only the trailer is validated at open time.
    pub verify_checksums: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            verify_checksums: false,
        }
    }
}

impl ReaderOptions {
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// Options for the external sorter.
#[derive(Debug, Clone)]
pub struct SorterOptions {
    /// Soft ceiling on buffered record bytes before a run spills to disk.
    /// A single record larger than the ceiling is admitted and spills
    /// immediately.
    pub max_memory: u64,

    /// Directory for spilled runs. Defaults to the OS temp directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SorterOptions {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_SORTER_MEMORY,
            temp_dir: None,
        }
    }
}

impl SorterOptions {
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}

/// Options for the rollup pipeline.
#[derive(Debug, Clone)]
pub struct RollupOptions {
    /// Number of parser worker threads. Defaults to the core count.
    pub parser_threads: usize,

    /// Capacity of the bounded queues between stages.
    pub queue_depth: usize,

    /// Memory ceiling for each of the two external line sorts, in bytes.
    pub sort_memory: u64,

    /// Directory for sort spill files. Defaults to the OS temp directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for RollupOptions {
    fn default() -> Self {
        Self {
            parser_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_depth: 1000,
            sort_memory: DEFAULT_SORTER_MEMORY,
            temp_dir: None,
        }
    }
}

impl RollupOptions {
    pub fn parser_threads(mut self, threads: usize) -> Self {
        self.parser_threads = threads.max(1);
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn sort_memory(mut self, bytes: u64) -> Self {
        self.sort_memory = bytes;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_writer_options() {
        let opts = WriterOptions::default();
        assert_eq!(opts.compression, Compression::Snappy);
        assert_eq!(opts.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_builder_chaining() {
        let opts = WriterOptions::default()
            .compression(Compression::Lz4)
            .block_size(4096);
        assert_eq!(opts.compression, Compression::Lz4);
        assert_eq!(opts.block_size, 4096);

        let sorter = SorterOptions::default()
            .max_memory(64 * 1024)
            .temp_dir("/tmp/sift-test");
        assert_eq!(sorter.max_memory, 64 * 1024);
        assert_eq!(sorter.temp_dir, Some(PathBuf::from("/tmp/sift-test")));
    }
}
