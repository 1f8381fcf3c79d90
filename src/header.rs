//! Codec for the 512-byte file header.
//!
//! The header carries the format identification fields, the table start
//! sectors and counts, and the first 109 MSAT slots. Reserved regions are
//! preserved verbatim when an existing file is parsed and zero-initialised
//! for new files.

use crate::binary::{BinaryReader, BinaryWriter};
use crate::consts::*;
use crate::error::{Error, Result};
use crate::SectorId;

/// Parsed representation of the file header.
#[derive(Debug, Clone)]
pub struct Header {
    /// log2 of the sector size (9 for 512-byte sectors)
    pub sector_size_power: u16,
    /// log2 of the short sector size (6 for 64-byte short sectors)
    pub short_sector_size_power: u16,
    /// Directory sector count; always zero in version 3 files
    pub num_directory_sectors: u32,
    /// Number of SAT pages (the MSAT's occupied entry count)
    pub num_sat_sectors: u32,
    /// First sector of the directory chain
    pub directory_start: SectorId,
    /// Streams shorter than this are stored in short sectors
    pub mini_cutoff: u32,
    /// First sector of the SSAT chain, or negative if none exists
    pub ssat_start: SectorId,
    /// SSAT length in sectors
    pub num_short_sectors: u32,
    /// First extension MSAT sector, or negative if the MSAT fits inline
    pub extra_msat_start: SectorId,
    /// Number of extension MSAT sectors
    pub num_msat_sectors: u32,
    /// Inline MSAT slots
    pub msat: [SectorId; INLINE_MSAT_ENTRIES],

    revision: u16,
    version: u16,
    clsid: [u8; 16],
    reserved: [u8; 6],
    transaction_signature: u32,
}

impl Header {
    /// Header for a freshly created document: no tables, no directory,
    /// reserved regions zeroed.
    pub fn new() -> Self {
        Self {
            sector_size_power: SECTOR_SIZE_POWER,
            short_sector_size_power: SHORT_SECTOR_SIZE_POWER,
            num_directory_sectors: 0,
            num_sat_sectors: 0,
            directory_start: END_OF_CHAIN,
            mini_cutoff: MINI_CUTOFF,
            ssat_start: END_OF_CHAIN,
            num_short_sectors: 0,
            extra_msat_start: END_OF_CHAIN,
            num_msat_sectors: 0,
            msat: [FREE_SECTOR; INLINE_MSAT_ENTRIES],
            revision: REVISION,
            version: VERSION_3,
            clsid: [0; 16],
            reserved: [0; 6],
            transaction_signature: 0,
        }
    }

    /// Parse and validate a header from the first 512 bytes of a file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::MalformedHeader(format!(
                "header is {} bytes, expected {}",
                data.len(),
                HEADER_SIZE
            )));
        }
        if &data[0..8] != MAGIC {
            return Err(Error::BadMagic);
        }

        let mut reader = BinaryReader::new(data);
        reader.set_offset(8);

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(reader.read_bytes(16)?);

        let revision = reader.read_u16()?;
        let version = reader.read_u16()?;
        if version != VERSION_3 {
            return Err(Error::UnsupportedVersion(version));
        }

        let byte_order = reader.read_u16()?;
        if byte_order != BYTE_ORDER_MARK {
            return Err(Error::MalformedHeader(format!(
                "byte-order mark {:#06x}",
                byte_order
            )));
        }

        let sector_size_power = reader.read_u16()?;
        let short_sector_size_power = reader.read_u16()?;
        if sector_size_power != SECTOR_SIZE_POWER {
            return Err(Error::MalformedHeader(format!(
                "sector size power {} does not match version 3",
                sector_size_power
            )));
        }
        if short_sector_size_power >= sector_size_power {
            return Err(Error::MalformedHeader(format!(
                "short sector size power {} not below sector size power {}",
                short_sector_size_power, sector_size_power
            )));
        }

        let mut reserved = [0u8; 6];
        reserved.copy_from_slice(reader.read_bytes(6)?);

        let num_directory_sectors = reader.read_u32()?;
        let num_sat_sectors = reader.read_u32()?;
        let directory_start = reader.read_i32()?;
        let transaction_signature = reader.read_u32()?;
        let mini_cutoff = reader.read_u32()?;
        let ssat_start = reader.read_i32()?;
        let num_short_sectors = reader.read_u32()?;
        let extra_msat_start = reader.read_i32()?;
        let num_msat_sectors = reader.read_u32()?;

        let mut msat = [FREE_SECTOR; INLINE_MSAT_ENTRIES];
        for slot in msat.iter_mut() {
            *slot = reader.read_i32()?;
        }

        Ok(Self {
            sector_size_power,
            short_sector_size_power,
            num_directory_sectors,
            num_sat_sectors,
            directory_start,
            mini_cutoff,
            ssat_start,
            num_short_sectors,
            extra_msat_start,
            num_msat_sectors,
            msat,
            revision,
            version,
            clsid,
            reserved,
            transaction_signature,
        })
    }

    /// Serialise the header into its 512-byte on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_SIZE);
        let mut writer = BinaryWriter::new(&mut data);

        writer.write_bytes(MAGIC);
        writer.write_bytes(&self.clsid);
        writer.write_u16(self.revision);
        writer.write_u16(self.version);
        writer.write_u16(BYTE_ORDER_MARK);
        writer.write_u16(self.sector_size_power);
        writer.write_u16(self.short_sector_size_power);
        writer.write_bytes(&self.reserved);
        writer.write_u32(self.num_directory_sectors);
        writer.write_u32(self.num_sat_sectors);
        writer.write_i32(self.directory_start);
        writer.write_u32(self.transaction_signature);
        writer.write_u32(self.mini_cutoff);
        writer.write_i32(self.ssat_start);
        writer.write_u32(self.num_short_sectors);
        writer.write_i32(self.extra_msat_start);
        writer.write_u32(self.num_msat_sectors);
        for &slot in &self.msat {
            writer.write_i32(slot);
        }

        data
    }

    /// Sector size in bytes
    #[inline]
    pub fn sector_size(&self) -> usize {
        1usize << self.sector_size_power
    }

    /// Short sector size in bytes
    #[inline]
    pub fn short_sector_size(&self) -> usize {
        1usize << self.short_sector_size_power
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_header_round_trips() {
        let header = Header::new();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..8], MAGIC);
        assert_eq!(&bytes[28..30], &BYTE_ORDER_MARK.to_le_bytes());

        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(parsed.sector_size(), 512);
        assert_eq!(parsed.short_sector_size(), 64);
        assert_eq!(parsed.directory_start, END_OF_CHAIN);
        assert_eq!(parsed.ssat_start, END_OF_CHAIN);
        assert_eq!(parsed.mini_cutoff, MINI_CUTOFF);
        assert!(parsed.msat.iter().all(|&s| s == FREE_SECTOR));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Header::new().to_bytes();
        bytes[0] = 0x00;
        assert!(matches!(Header::parse(&bytes), Err(Error::BadMagic)));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = Header::new().to_bytes();
        bytes[26..28].copy_from_slice(&4u16.to_le_bytes());
        assert!(matches!(
            Header::parse(&bytes),
            Err(Error::UnsupportedVersion(4))
        ));
    }

    #[test]
    fn test_bad_byte_order_rejected() {
        let mut bytes = Header::new().to_bytes();
        bytes[28..30].copy_from_slice(&0xFEFFu16.to_le_bytes());
        assert!(matches!(
            Header::parse(&bytes),
            Err(Error::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = Header::new().to_bytes();
        assert!(Header::parse(&bytes[..100]).is_err());
    }

    #[test]
    fn test_reserved_bytes_preserved() {
        let mut bytes = Header::new().to_bytes();
        bytes[34..40].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(&parsed.to_bytes()[34..40], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_inline_msat_slots() {
        let mut header = Header::new();
        header.msat[0] = 3;
        header.msat[1] = 7;
        header.num_sat_sectors = 2;
        let bytes = header.to_bytes();
        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(parsed.msat[0], 3);
        assert_eq!(parsed.msat[1], 7);
        assert_eq!(parsed.msat[2], FREE_SECTOR);
        assert_eq!(parsed.num_sat_sectors, 2);
    }
}
