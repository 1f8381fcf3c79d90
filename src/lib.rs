//! Longan - a read/write engine for the Compound File Binary Format
//!
//! Compound files (also called OLE2 structured storage) pack a
//! hierarchical filesystem of named sub-streams into one byte stream, and
//! are the container behind the legacy Microsoft Office formats (.doc,
//! .xls, .ppt). This crate implements the version 3 format with 512-byte
//! sectors: the sector allocation tables (MSAT, SAT, SSAT), the directory
//! of entries indexed per storage by a red-black tree, and the two-tier
//! storage policy that packs small streams into a shared mini-stream.
//!
//! # Example - writing and reading back a document
//!
//! ```
//! use std::io::Cursor;
//! use longan::{CompoundDocument, EntryType};
//!
//! # fn main() -> longan::Result<()> {
//! let mut document = CompoundDocument::create(Cursor::new(Vec::new()))?;
//! document.write_stream("/Workbook", b"workbook bytes")?;
//! document.flush()?;
//!
//! let mut document = CompoundDocument::open(document.into_inner())?;
//! assert!(document.contains("/Workbook", EntryType::UserStream));
//! assert_eq!(document.read_stream("/Workbook")?, b"workbook bytes");
//! # Ok(())
//! # }
//! ```
//!
//! # Example - nested storages and sequential writing
//!
//! ```
//! use std::io::{Cursor, Write};
//! use longan::CompoundDocument;
//!
//! # fn main() -> longan::Result<()> {
//! let mut document = CompoundDocument::create(Cursor::new(Vec::new()))?;
//!
//! // intermediate path components become storages
//! let mut stream = document.open_write_stream("/Book/Sheet1")?;
//! stream.write_all(b"cell data")?;
//! stream.close()?;
//!
//! let mut document = CompoundDocument::open(document.into_inner())?;
//! assert_eq!(document.stream_paths(), ["/Book/Sheet1"]);
//! # Ok(())
//! # }
//! ```

/// Little-endian cursors over byte buffers
pub mod binary;

/// Constants for the compound file binary format
pub mod consts;

/// The compound document engine
mod document;

/// Directory entry records
mod entry;

/// Unified error types
mod error;

/// Codec for the 512-byte file header
mod header;

/// Per-storage red-black tree threaded through directory entries
mod rbtree;

/// Integration tests for the document engine
#[cfg(test)]
mod tests;

/// A sector index; negative values are reserved sentinels
pub type SectorId = i32;

/// An index into the directory entry array; `-1` denotes "no such entry"
pub type DirectoryId = i32;

// Re-export public types for convenient access
pub use document::{is_compound_file, CompoundDocument, StreamWriter};
pub use entry::{Color, DirectoryEntry, EntryType};
pub use error::{Error, Result};
pub use header::Header;
