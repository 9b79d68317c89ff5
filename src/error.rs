use std::fmt::Display;

/// Errors surfaced by the table engine and the rollup pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A table file failed validation: bad magic, checksum mismatch, or
    /// keys that are not strictly increasing on disk. Fatal for the file.
    Corrupt(String),
    /// A writer received a key that is not strictly greater than the
    /// previous key. Fatal for the build.
    OutOfOrder(String),
    /// A writer was used after `finalize` or `abort`.
    AlreadyFinalized,
    /// An IO error from the filesystem or OS.
    Io(String),
    /// Invalid user input: unknown compression name, malformed CIDR,
    /// unusable field indices.
    InvalidInput(String),
    /// A merge callback signaled failure. The built-in merges never do;
    /// user-supplied callbacks may.
    MergeFailed(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corrupt(msg) => write!(f, "corrupt table: {msg}"),
            Error::OutOfOrder(msg) => write!(f, "key out of order: {msg}"),
            Error::AlreadyFinalized => write!(f, "writer already finalized"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::MergeFailed(msg) => write!(f, "merge failed: {msg}"),
        }
    }
}

/// Constructs an Error::Corrupt for the given format string.
#[macro_export]
macro_rules! corrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)) };
}

/// Constructs an Error::InvalidInput for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)) };
}

/// A siftdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
