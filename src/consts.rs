//! Constants for the compound file binary format.

use crate::{DirectoryId, SectorId};

/// Magic bytes that begin every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the file header in bytes; sector 0 starts immediately after it
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry record in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Minimal size of an empty compound file with 512-byte sectors
pub const MINIMAL_FILE_SIZE: usize = 1536;

/// Number of MSAT slots stored inline in the header
pub const INLINE_MSAT_ENTRIES: usize = 109;

/// Maximum entry name length in UTF-16 code units (excluding the terminator)
pub const MAX_NAME_UNITS: usize = 31;

/// Revision (minor version) written to new files
pub const REVISION: u16 = 0x003E;

/// Version (major / DLL version) for 512-byte-sector files
pub const VERSION_3: u16 = 0x0003;

/// Little-endian byte-order mark
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Default sector size power (2^9 = 512 bytes)
pub const SECTOR_SIZE_POWER: u16 = 9;

/// Default short sector size power (2^6 = 64 bytes)
pub const SHORT_SECTOR_SIZE_POWER: u16 = 6;

/// Streams shorter than this live in the mini-stream
pub const MINI_CUTOFF: u32 = 4096;

// Reserved sector IDs
/// Unallocated sector
pub const FREE_SECTOR: SectorId = -1;
/// End of a sector chain
pub const END_OF_CHAIN: SectorId = -2;
/// Sector holds a SAT page
pub const SAT_SECTOR: SectorId = -3;
/// Sector holds an extension MSAT page
pub const MSAT_SECTOR: SectorId = -4;

/// "No such entry" directory ID
pub const END: DirectoryId = -1;

/// Name of the root directory entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";
