//! Directory entry records.
//!
//! Each entry occupies a fixed 128-byte record inside the directory chain:
//! the case-preserved UTF-16 name, the entry type, the red-black tree
//! fields (`color`, `left`, `right`, `child`), class id, timestamps, and
//! the stream's start sector and byte length.

use crate::binary::BinaryWriter;
use crate::consts::*;
use crate::error::{Error, Result};
use crate::{DirectoryId, SectorId};
use zerocopy::{FromBytes, I32, LE, U16, U32, U64};
use zerocopy_derive::FromBytes as DeriveFromBytes;

/// Raw on-disk directory entry record (128 bytes)
#[derive(Debug, Clone, DeriveFromBytes)]
#[repr(C)]
struct RawEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including the null terminator)
    name_len: U16<LE>,
    /// Entry type code
    entry_type: u8,
    /// Node colour (0 = red, 1 = black)
    color: u8,
    /// Left child in the sibling tree
    left: I32<LE>,
    /// Right child in the sibling tree
    right: I32<LE>,
    /// Root of the nested-storage tree (storages only)
    child: I32<LE>,
    /// Class id (16 bytes)
    clsid: [u8; 16],
    /// User flags
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    creation_time: U64<LE>,
    /// Modified time (FILETIME)
    modified_time: U64<LE>,
    /// First sector of the data chain
    start: I32<LE>,
    /// Stream size in bytes
    size: U64<LE>,
}

/// Kind of object a directory entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Unallocated record
    Empty,
    /// Directory-like container of child entries
    UserStorage,
    /// Leaf holding opaque bytes
    UserStream,
    /// ILockBytes object
    LockBytes,
    /// IPropertyStorage object
    Property,
    /// The root storage; exactly one exists, at directory id 0
    RootStorage,
}

impl EntryType {
    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(EntryType::Empty),
            1 => Ok(EntryType::UserStorage),
            2 => Ok(EntryType::UserStream),
            3 => Ok(EntryType::LockBytes),
            4 => Ok(EntryType::Property),
            5 => Ok(EntryType::RootStorage),
            _ => Err(Error::Corrupted(format!(
                "invalid directory entry type code {}",
                code
            ))),
        }
    }

    fn code(self) -> u8 {
        match self {
            EntryType::Empty => 0,
            EntryType::UserStorage => 1,
            EntryType::UserStream => 2,
            EntryType::LockBytes => 3,
            EntryType::Property => 4,
            EntryType::RootStorage => 5,
        }
    }
}

/// Red-black tree node colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// A parsed directory entry.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Case-preserved entry name, at most 31 UTF-16 code units
    pub name: String,
    /// Kind of object this record describes
    pub entry_type: EntryType,
    /// Tree node colour
    pub color: Color,
    /// Left child in the parent storage's tree
    pub left: DirectoryId,
    /// Right child in the parent storage's tree
    pub right: DirectoryId,
    /// Root of this storage's own tree
    pub child: DirectoryId,
    /// Class id, preserved verbatim
    pub clsid: [u8; 16],
    /// User flags, preserved verbatim
    pub state_bits: u32,
    /// Creation time, preserved verbatim
    pub creation_time: u64,
    /// Modified time, preserved verbatim
    pub modified_time: u64,
    /// First sector of the data chain; for the root entry, of the
    /// mini-stream container
    pub start: SectorId,
    /// Stream byte length; for the root entry, the mini-stream length
    pub size: u64,
}

impl DirectoryEntry {
    /// A fresh unallocated record.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            entry_type: EntryType::Empty,
            color: Color::Black,
            left: END,
            right: END,
            child: END,
            clsid: [0; 16],
            state_bits: 0,
            creation_time: 0,
            modified_time: 0,
            start: END_OF_CHAIN,
            size: 0,
        }
    }

    /// Parse a 128-byte record.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw = RawEntry::read_from_bytes(data).map_err(|_| {
            Error::TruncatedTable(format!(
                "directory entry record is {} bytes, expected {}",
                data.len(),
                DIRENTRY_SIZE
            ))
        })?;

        let entry_type = EntryType::from_code(raw.entry_type)?;
        let color = if raw.color == 0 { Color::Red } else { Color::Black };

        let name_bytes = raw.name_len.get() as usize;
        let name = decode_utf16le(&raw.name[..name_bytes.min(64).saturating_sub(2)]);

        // version 3 files only carry 32 significant size bits
        let size = raw.size.get() & 0xFFFF_FFFF;

        Ok(Self {
            name,
            entry_type,
            color,
            left: raw.left.get(),
            right: raw.right.get(),
            child: raw.child.get(),
            clsid: raw.clsid,
            state_bits: raw.state_bits.get(),
            creation_time: raw.creation_time.get(),
            modified_time: raw.modified_time.get(),
            start: raw.start.get(),
            size,
        })
    }

    /// Serialise into the 128-byte on-disk record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(DIRENTRY_SIZE);
        let mut writer = BinaryWriter::new(&mut data);

        let utf16: Vec<u16> = self.name.encode_utf16().collect();
        let units = utf16.len().min(MAX_NAME_UNITS);
        for &unit in utf16.iter().take(units) {
            writer.write_u16(unit);
        }
        for _ in units..32 {
            writer.write_u16(0);
        }

        let name_len = if self.name.is_empty() {
            0
        } else {
            ((units + 1) * 2) as u16
        };
        writer.write_u16(name_len);
        writer.write_u8(self.entry_type.code());
        writer.write_u8(match self.color {
            Color::Red => 0,
            Color::Black => 1,
        });
        writer.write_i32(self.left);
        writer.write_i32(self.right);
        writer.write_i32(self.child);
        writer.write_bytes(&self.clsid);
        writer.write_u32(self.state_bits);
        writer.write_u64(self.creation_time);
        writer.write_u64(self.modified_time);
        writer.write_i32(self.start);
        writer.write_u64(self.size);

        data
    }
}

/// Check that a name fits in a directory entry record.
pub fn validate_name(name: &str) -> Result<()> {
    if name.encode_utf16().count() > MAX_NAME_UNITS {
        return Err(Error::NameTooLong(name.to_string()));
    }
    Ok(())
}

/// Decode UTF-16LE bytes into a string, dropping a trailing terminator.
fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| {
            U16::<LE>::read_from_bytes(chunk)
                .map(|v| v.get())
                .unwrap_or(0)
        })
        .collect();

    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}
