//! siftdb: a sorted-table build/query engine for bulk internet
//! infrastructure data (DNS records, certificate-transparency extracts,
//! WHOIS and zone exports).
//!
//! The core pieces:
//!
//! - [`table::Writer`] / [`table::Reader`]: an immutable on-disk table of
//!   sorted, unique byte-string keys with compressed data blocks, a block
//!   index, and a fixed trailer.
//! - [`Sorter`]: an external-memory sorter that turns unordered adds into
//!   a sorted, duplicate-free stream, collapsing duplicate keys through a
//!   caller-supplied merge function.
//! - [`Merger`]: a read-time union of several tables under the same merge
//!   contract.
//! - [`rollup`]: the streaming pipeline that normalizes tagged record
//!   lines into structured merged values per key.
//! - [`query`]: scan primitives over a reader or merger, including
//!   reverse-key domain scans and IPv4 CIDR scans.

pub mod codec;
pub mod config;
pub mod error;
pub mod merge;
pub mod merger;
pub mod net;
pub mod progress;
pub mod query;
pub mod rollup;
pub mod sorter;
pub mod table;

pub use codec::Compression;
pub use config::{ReaderOptions, RollupOptions, SorterOptions, WriterOptions};
pub use error::{Error, Result};
pub use merge::{json_merge, text_merge, MergeFn, MergePolicy};
pub use merger::Merger;
pub use progress::{Progress, Stats};
pub use sorter::Sorter;
pub use table::{Reader, Writer};
