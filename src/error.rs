//! Error type shared by every layer of the engine.
//!
//! Lock-discipline violations (releasing a lock that was never taken, writing
//! without the exclusive lock) are programming errors and panic instead of
//! showing up here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, NdError>;

#[derive(Error, Debug)]
pub enum NdError {
    /// Read, write or sync of the backing file failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The file exists but cannot be opened for writing.
    #[error("database file {} is read-only", path.display())]
    ReadOnlyFile { path: PathBuf },

    /// A write lock was requested on a database opened read-only.
    #[error("database is permanently read-only")]
    ReadOnlyDatabase,

    /// Another writer holds the advisory lock on the file.
    #[error("database file {} is locked by another writer", path.display())]
    FileLocked { path: PathBuf },

    /// Version outside the supported range on a database that cannot be recreated.
    #[error("unsupported database version {found} (supported {min}..={max})")]
    UnsupportedVersion { found: String, min: String, max: String },

    #[error("malloc of {requested} bytes exceeds the maximum of {max}")]
    MallocTooLarge { requested: usize, max: usize },

    /// Extending the file would exceed the compressed pointer range.
    #[error("database is full: cannot address chunk {chunk}")]
    DatabaseFull { chunk: u64 },

    #[error("record {address} was already freed")]
    DoubleFree { address: u64 },

    #[error("corrupt block at {address}: {reason}")]
    CorruptBlock { address: u64, reason: String },

    #[error("node type {0} is not registered")]
    UnknownNodeType(u16),

    #[error("node type {0} is already registered or reserved")]
    TypeCodeInUse(u16),

    /// A blocked lock acquisition observed its cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

impl NdError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        NdError::Io { context: context.into(), source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NdError::Cancelled)
    }
}

/// Attach a context string to `io::Result` values.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| NdError::io(f(), e))
    }
}
