//! Unified error type for compound document operations.

use crate::SectorId;
use thiserror::Error;

/// Main error type for compound document operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error on the backing stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not begin with the compound file magic
    #[error("not a compound file (bad magic)")]
    BadMagic,

    /// A header field has an impossible or inconsistent value
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The file uses a format version this crate does not read
    #[error("unsupported version: {0:#06x}")]
    UnsupportedVersion(u16),

    /// An allocation table or the directory ends before its declared length
    #[error("truncated table: {0}")]
    TruncatedTable(String),

    /// Following a sector chain revisited a sector
    #[error("cycle in sector chain at sector {0}")]
    CycleInChain(SectorId),

    /// A structural invariant failed after a successful parse
    #[error("corrupted file: {0}")]
    Corrupted(String),

    /// An entry with the same case-folded name already exists in the storage
    #[error("duplicate entry name: {0}")]
    DuplicateName(String),

    /// Entry name exceeds 31 UTF-16 code units
    #[error("entry name too long: {0}")]
    NameTooLong(String),

    /// No entry with the requested path and type exists
    #[error("entry not found: {0}")]
    NotFound(String),
}

/// Result type for compound document operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::binary::BinaryError> for Error {
    fn from(err: crate::binary::BinaryError) -> Self {
        Error::TruncatedTable(err.to_string())
    }
}
