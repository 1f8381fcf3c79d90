//! The compound document engine.
//!
//! A [`CompoundDocument`] binds to one backing byte stream for its
//! lifetime: [`CompoundDocument::open`] parses an existing file through a
//! `Read + Seek` source, [`CompoundDocument::create`] builds a fresh one
//! through a `Write + Seek` sink. All mutations are written through: every
//! allocation persists the tables it touched before returning, so a
//! partially written document is at worst leaking an unreachable sector,
//! never dangling.

use crate::binary::{BinaryReader, BinaryWriter};
use crate::consts::*;
use crate::entry::{validate_name, DirectoryEntry, EntryType};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::rbtree::{self, DirectoryTree};
use crate::{DirectoryId, SectorId};
use smallvec::SmallVec;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};

/// A followed sector chain; most chains are short
type SectorChain = SmallVec<[SectorId; 8]>;

/// Check whether a byte buffer starts like a compound file.
pub fn is_compound_file(data: &[u8]) -> bool {
    data.len() >= MINIMAL_FILE_SIZE && &data[0..8] == MAGIC
}

/// Walk `table` from `start` until the end-of-chain sentinel.
///
/// An empty chain is a start of `END_OF_CHAIN`. Any other sentinel in
/// chain position, an out-of-range index, or a revisited sector is a
/// structural error.
fn follow_chain(table: &[SectorId], start: SectorId) -> Result<SectorChain> {
    let mut chain = SectorChain::new();
    if start == END_OF_CHAIN {
        return Ok(chain);
    }

    let mut visited = vec![false; table.len()];
    let mut current = start;

    while current >= 0 {
        let index = current as usize;
        if index >= table.len() {
            return Err(Error::Corrupted(format!(
                "sector {} lies outside the allocation table ({} slots)",
                current,
                table.len()
            )));
        }
        if visited[index] {
            return Err(Error::CycleInChain(current));
        }
        visited[index] = true;
        chain.push(current);
        current = table[index];
    }

    if current != END_OF_CHAIN {
        return Err(Error::Corrupted(format!(
            "chain terminated by sentinel {} instead of end-of-chain",
            current
        )));
    }

    Ok(chain)
}

/// A compound document bound to a backing byte stream.
///
/// The allocation tables, the directory and the rebuilt parent tables are
/// owned exclusively by the instance; the type is not reentrant and must
/// not be shared across threads without external mutual exclusion.
#[derive(Debug)]
pub struct CompoundDocument<B> {
    backing: B,
    header: Header,
    /// Sector ids of the SAT pages, in table order
    msat: Vec<SectorId>,
    /// Sector ids of the extension MSAT sectors, in chain order
    msat_ext: Vec<SectorId>,
    sat: Vec<SectorId>,
    ssat: Vec<SectorId>,
    entries: Vec<DirectoryEntry>,
    /// Tree parent per entry, rebuilt on load, never persisted
    parent: Vec<DirectoryId>,
    /// Owning storage per entry, rebuilt on load, never persisted
    parent_storage: Vec<DirectoryId>,
}

impl<B> CompoundDocument<B> {
    /// Sector size in bytes (512 for version 3 files)
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.header.sector_size()
    }

    /// Short sector size in bytes (64)
    #[inline]
    pub fn short_sector_size(&self) -> usize {
        self.header.short_sector_size()
    }

    /// Streams shorter than this live in the mini-stream
    #[inline]
    pub fn mini_cutoff(&self) -> u32 {
        self.header.mini_cutoff
    }

    /// The directory entry at `id`, if it exists
    pub fn entry(&self, id: DirectoryId) -> Option<&DirectoryEntry> {
        usize::try_from(id).ok().and_then(|i| self.entries.get(i))
    }

    /// The root storage entry
    pub fn root(&self) -> &DirectoryEntry {
        &self.entries[0]
    }

    /// Number of directory entry records, allocated or not
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The sector allocation table
    pub fn sat(&self) -> &[SectorId] {
        &self.sat
    }

    /// The short-sector allocation table
    pub fn ssat(&self) -> &[SectorId] {
        &self.ssat
    }

    /// Sector ids of the SAT pages
    pub fn msat(&self) -> &[SectorId] {
        &self.msat
    }

    /// Follow a chain through the SAT
    pub fn chain(&self, start: SectorId) -> Result<Vec<SectorId>> {
        Ok(follow_chain(&self.sat, start)?.into_vec())
    }

    /// Follow a chain through the SSAT
    pub fn short_chain(&self, start: SectorId) -> Result<Vec<SectorId>> {
        Ok(follow_chain(&self.ssat, start)?.into_vec())
    }

    /// Immediate children of a storage, ascending by case-folded name
    pub fn children(&self, storage_id: DirectoryId) -> Vec<DirectoryId> {
        if self.entry(storage_id).is_none() {
            return Vec::new();
        }
        rbtree::walk_in_order(&self.entries, storage_id)
    }

    /// Whether an entry with this path and type exists
    pub fn contains(&self, path: &str, entry_type: EntryType) -> bool {
        self.find_entry(path, entry_type).is_some()
    }

    /// Resolve a `/`-separated path to a directory id of the given type.
    pub fn find_entry(&self, path: &str, entry_type: EntryType) -> Option<DirectoryId> {
        if self.entries.is_empty() {
            return None;
        }
        if entry_type == EntryType::RootStorage && (path == "/" || path == "/Root Entry") {
            return Some(0);
        }

        let components = path_components(path);
        if components.is_empty() {
            return (entry_type == EntryType::RootStorage).then_some(0);
        }

        let mut storage: DirectoryId = 0;
        for (depth, component) in components.iter().enumerate() {
            let id = rbtree::find_child(&self.entries, storage, component);
            if id < 0 {
                return None;
            }
            if depth + 1 == components.len() {
                return (self.entries[id as usize].entry_type == entry_type).then_some(id);
            }
            if self.entries[id as usize].entry_type != EntryType::UserStorage {
                return None;
            }
            storage = id;
        }

        None
    }

    /// Paths of every user stream in the document.
    ///
    /// Debugging aid; the order follows directory ids, not the trees.
    pub fn stream_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(id, entry)| {
                entry.entry_type == EntryType::UserStream && self.parent_storage[*id] >= 0
            })
            .map(|(id, _)| self.entry_path(id as DirectoryId))
            .collect()
    }

    /// Reconstruct an entry's absolute path from the parent-storage table.
    fn entry_path(&self, id: DirectoryId) -> String {
        let mut names = vec![self.entries[id as usize].name.as_str()];
        let mut storage = self.parent_storage[id as usize];
        while storage > 0 {
            names.push(self.entries[storage as usize].name.as_str());
            storage = self.parent_storage[storage as usize];
        }

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        path
    }

    /// Consume the document and return the backing stream.
    pub fn into_inner(self) -> B {
        self.backing
    }

    fn blank(backing: B, header: Header) -> Self {
        Self {
            backing,
            header,
            msat: Vec::new(),
            msat_ext: Vec::new(),
            sat: Vec::new(),
            ssat: Vec::new(),
            entries: Vec::new(),
            parent: Vec::new(),
            parent_storage: Vec::new(),
        }
    }
}

fn path_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

// ---------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------

impl<B: Read + Seek> CompoundDocument<B> {
    /// Parse an existing compound file.
    ///
    /// Loads the header, the MSAT, the SAT, the SSAT and the directory,
    /// and rebuilds the in-memory parent tables. Fails with a structural
    /// error on a bad magic, an unsupported version, a truncated table or
    /// a cyclic chain.
    pub fn open(mut backing: B) -> Result<Self> {
        let mut header_bytes = vec![0u8; HEADER_SIZE];
        backing.seek(SeekFrom::Start(0))?;
        backing.read_exact(&mut header_bytes).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::MalformedHeader("file is shorter than the header".to_string())
            } else {
                Error::Io(err)
            }
        })?;

        let header = Header::parse(&header_bytes)?;
        let mut document = Self::blank(backing, header);

        document.read_msat()?;
        document.read_sat()?;
        document.read_ssat()?;
        document.read_directory()?;

        Ok(document)
    }

    /// Read one sector's worth of bytes.
    fn read_sector(&mut self, id: SectorId) -> Result<Vec<u8>> {
        if id < 0 {
            return Err(Error::Corrupted(format!("read of reserved sector id {}", id)));
        }

        let sector_size = self.sector_size();
        let position = (HEADER_SIZE + sector_size * id as usize) as u64;
        self.backing.seek(SeekFrom::Start(position))?;

        let mut data = vec![0u8; sector_size];
        self.backing.read_exact(&mut data).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::TruncatedTable(format!("sector {} lies past the end of the file", id))
            } else {
                Error::Io(err)
            }
        })?;
        Ok(data)
    }

    /// Load the MSAT: 109 inline slots, then the extension chain with 127
    /// further slots and a trailing link per sector.
    fn read_msat(&mut self) -> Result<()> {
        self.msat.clear();
        self.msat_ext.clear();

        let total = self.header.num_sat_sectors as usize;
        for index in 0..total.min(INLINE_MSAT_ENTRIES) {
            self.msat.push(self.header.msat[index]);
        }

        let ids_per_extension = self.sector_size() / 4 - 1;
        let mut next = self.header.extra_msat_start;

        while self.msat.len() < total {
            if next < 0 {
                return Err(Error::TruncatedTable(format!(
                    "MSAT chain ends after {} of {} entries",
                    self.msat.len(),
                    total
                )));
            }
            if self.msat_ext.contains(&next) {
                return Err(Error::CycleInChain(next));
            }
            self.msat_ext.push(next);

            let data = self.read_sector(next)?;
            let mut reader = BinaryReader::new(&data);
            for _ in 0..ids_per_extension {
                let id = reader.read_i32()?;
                if self.msat.len() < total {
                    self.msat.push(id);
                }
            }
            next = reader.read_i32()?;
        }

        if let Some(&bad) = self.msat.iter().find(|&&page| page < 0) {
            return Err(Error::Corrupted(format!(
                "MSAT lists sentinel {} as a SAT page",
                bad
            )));
        }

        Ok(())
    }

    /// Load the SAT from the pages the MSAT names.
    fn read_sat(&mut self) -> Result<()> {
        self.sat.clear();

        let slots_per_sector = self.sector_size() / 4;
        let pages = self.msat.clone();
        for page in pages {
            let data = self.read_sector(page)?;
            let mut reader = BinaryReader::new(&data);
            for _ in 0..slots_per_sector {
                self.sat.push(reader.read_i32()?);
            }
        }

        Ok(())
    }

    /// Load the SSAT by following its chain through the SAT.
    fn read_ssat(&mut self) -> Result<()> {
        self.ssat.clear();

        // a negative start means no mini-stream exists yet
        if self.header.ssat_start < 0 {
            return Ok(());
        }

        let slots_per_sector = self.sector_size() / 4;
        let chain = follow_chain(&self.sat, self.header.ssat_start)?;
        for page in chain {
            let data = self.read_sector(page)?;
            let mut reader = BinaryReader::new(&data);
            for _ in 0..slots_per_sector {
                self.ssat.push(reader.read_i32()?);
            }
        }

        Ok(())
    }

    /// Load every directory record and rebuild the parent tables.
    fn read_directory(&mut self) -> Result<()> {
        self.entries.clear();

        if self.header.directory_start < 0 {
            return Err(Error::Corrupted("document has no directory chain".to_string()));
        }

        let entries_per_sector = self.sector_size() / DIRENTRY_SIZE;
        let chain = follow_chain(&self.sat, self.header.directory_start)?;
        for sector in chain {
            let data = self.read_sector(sector)?;
            for index in 0..entries_per_sector {
                let record = &data[index * DIRENTRY_SIZE..(index + 1) * DIRENTRY_SIZE];
                self.entries.push(DirectoryEntry::parse(record)?);
            }
        }

        if self.entries.first().map(|e| e.entry_type) != Some(EntryType::RootStorage) {
            return Err(Error::Corrupted(
                "first directory entry is not the root storage".to_string(),
            ));
        }

        rbtree::rebuild_parents(&self.entries, &mut self.parent, &mut self.parent_storage)
    }

    /// Read a user stream's bytes.
    pub fn read_stream(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self
            .find_entry(path, EntryType::UserStream)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let start = self.entries[id as usize].start;
        let size = self.entries[id as usize].size as usize;

        if (size as u64) < u64::from(self.header.mini_cutoff) {
            self.read_short_stream(start, size)
        } else {
            self.read_long_stream(start, size)
        }
    }

    /// Open a user stream for sequential reading.
    pub fn open_read_stream(&mut self, path: &str) -> Result<io::Cursor<Vec<u8>>> {
        Ok(io::Cursor::new(self.read_stream(path)?))
    }

    fn read_long_stream(&mut self, start: SectorId, size: usize) -> Result<Vec<u8>> {
        let sector_size = self.sector_size();
        let chain = follow_chain(&self.sat, start)?;
        if chain.len() * sector_size < size {
            return Err(Error::TruncatedTable(format!(
                "chain of {} sectors cannot hold {} bytes",
                chain.len(),
                size
            )));
        }

        let mut data = Vec::with_capacity(chain.len() * sector_size);
        for sector in chain {
            data.extend_from_slice(&self.read_sector(sector)?);
        }
        data.truncate(size);
        Ok(data)
    }

    fn read_short_stream(&mut self, start: SectorId, size: usize) -> Result<Vec<u8>> {
        let short_size = self.short_sector_size();
        let chain = follow_chain(&self.ssat, start)?;
        if chain.len() * short_size < size {
            return Err(Error::TruncatedTable(format!(
                "chain of {} short sectors cannot hold {} bytes",
                chain.len(),
                size
            )));
        }

        // materialise the mini-stream container once
        let container_chain = follow_chain(&self.sat, self.entries[0].start)?;
        let mut container = Vec::with_capacity(container_chain.len() * self.sector_size());
        for sector in container_chain {
            container.extend_from_slice(&self.read_sector(sector)?);
        }

        let mut data = Vec::with_capacity(chain.len() * short_size);
        for short in chain {
            let offset = short as usize * short_size;
            if offset + short_size > container.len() {
                return Err(Error::TruncatedTable(format!(
                    "short sector {} lies outside the mini-stream container",
                    short
                )));
            }
            data.extend_from_slice(&container[offset..offset + short_size]);
        }
        data.truncate(size);
        Ok(data)
    }
}

// ---------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------

impl<B: Write + Seek> CompoundDocument<B> {
    /// Create a fresh document: write the header and seed the root entry.
    pub fn create(backing: B) -> Result<Self> {
        let mut document = Self::blank(backing, Header::new());
        document.write_header()?;
        document.insert_entry(ROOT_ENTRY_NAME, EntryType::RootStorage, 0)?;
        Ok(document)
    }

    /// Write a whole user stream in one call.
    ///
    /// The entry is created on first use; intermediate path components
    /// become storages. Overwriting an existing stream releases its
    /// previous chain first.
    pub fn write_stream(&mut self, path: &str, data: &[u8]) -> Result<DirectoryId> {
        let id = self.prepare_stream_entry(path)?;
        self.commit_stream(id, data)?;
        Ok(id)
    }

    /// Open a user stream for sequential writing.
    ///
    /// Bytes accumulate in memory; the chain is allocated and the payload
    /// persisted when the writer is closed (or dropped).
    pub fn open_write_stream(&mut self, path: &str) -> Result<StreamWriter<'_, B>> {
        let id = self.prepare_stream_entry(path)?;
        Ok(StreamWriter {
            document: self,
            id,
            data: Vec::new(),
            committed: false,
        })
    }

    /// Flush the header, all tables and the directory to the backing.
    pub fn flush(&mut self) -> Result<()> {
        self.write_header()?;
        self.write_sat()?;
        self.write_msat_extension()?;
        self.write_ssat()?;
        if self.header.directory_start >= 0 {
            self.write_directory()?;
        }
        self.backing.flush()?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let bytes = self.header.to_bytes();
        self.backing.seek(SeekFrom::Start(0))?;
        self.backing.write_all(&bytes)?;
        Ok(())
    }

    /// Write at most one sector's worth of `src` at the sector position.
    fn write_sector(&mut self, id: SectorId, src: &[u8]) -> Result<()> {
        let sector_size = self.sector_size();
        let position = (HEADER_SIZE + sector_size * id as usize) as u64;
        self.backing.seek(SeekFrom::Start(position))?;
        let count = sector_size.min(src.len());
        self.backing.write_all(&src[..count])?;
        Ok(())
    }

    /// Write at most one short sector's worth of `src` into the
    /// mini-stream container.
    fn write_short_sector(&mut self, id: SectorId, src: &[u8]) -> Result<()> {
        let sector_size = self.sector_size();
        let short_size = self.short_sector_size();
        let ratio = sector_size / short_size;

        let container = follow_chain(&self.sat, self.entries[0].start)?;
        let sector = *container.get(id as usize / ratio).ok_or_else(|| {
            Error::Corrupted(format!(
                "short sector {} lies outside the mini-stream container",
                id
            ))
        })?;
        let offset = (id as usize % ratio) * short_size;

        let position = (HEADER_SIZE + sector_size * sector as usize + offset) as u64;
        self.backing.seek(SeekFrom::Start(position))?;
        let count = short_size.min(src.len());
        self.backing.write_all(&src[..count])?;
        Ok(())
    }

    /// Persist every SAT page.
    fn write_sat(&mut self) -> Result<()> {
        let slots_per_sector = self.sector_size() / 4;
        let pages = self.msat.clone();
        for (index, page) in pages.into_iter().enumerate() {
            let mut buf = Vec::with_capacity(self.sector_size());
            let mut writer = BinaryWriter::new(&mut buf);
            for &slot in &self.sat[index * slots_per_sector..(index + 1) * slots_per_sector] {
                writer.write_i32(slot);
            }
            self.write_sector(page, &buf)?;
        }
        Ok(())
    }

    /// Persist every SSAT page.
    fn write_ssat(&mut self) -> Result<()> {
        if self.header.ssat_start < 0 {
            return Ok(());
        }
        let slots_per_sector = self.sector_size() / 4;
        let chain = follow_chain(&self.sat, self.header.ssat_start)?;
        for (index, page) in chain.into_iter().enumerate() {
            let from = index * slots_per_sector;
            let to = ((index + 1) * slots_per_sector).min(self.ssat.len());
            let mut buf = Vec::with_capacity(self.sector_size());
            let mut writer = BinaryWriter::new(&mut buf);
            for &slot in &self.ssat[from..to] {
                writer.write_i32(slot);
            }
            self.write_sector(page, &buf)?;
        }
        Ok(())
    }

    /// Persist the extension MSAT sectors: 127 slots plus a trailing link
    /// to the next extension sector.
    fn write_msat_extension(&mut self) -> Result<()> {
        if self.msat_ext.is_empty() {
            return Ok(());
        }
        let ids_per_extension = self.sector_size() / 4 - 1;
        let extension = self.msat_ext.clone();
        for (index, sector) in extension.iter().enumerate() {
            let base = INLINE_MSAT_ENTRIES + index * ids_per_extension;
            let mut buf = Vec::with_capacity(self.sector_size());
            let mut writer = BinaryWriter::new(&mut buf);
            for slot in 0..ids_per_extension {
                writer.write_i32(self.msat.get(base + slot).copied().unwrap_or(FREE_SECTOR));
            }
            let next = extension.get(index + 1).copied().unwrap_or(END_OF_CHAIN);
            writer.write_i32(next);
            self.write_sector(*sector, &buf)?;
        }
        Ok(())
    }

    /// Persist one directory entry record.
    fn write_entry(&mut self, id: DirectoryId) -> Result<()> {
        let entries_per_sector = self.sector_size() / DIRENTRY_SIZE;
        let chain = follow_chain(&self.sat, self.header.directory_start)?;
        let sector = *chain.get(id as usize / entries_per_sector).ok_or_else(|| {
            Error::Corrupted(format!(
                "directory entry {} lies outside the directory chain",
                id
            ))
        })?;
        let offset = (id as usize % entries_per_sector) * DIRENTRY_SIZE;

        let bytes = self.entries[id as usize].to_bytes();
        let position = (HEADER_SIZE + self.sector_size() * sector as usize + offset) as u64;
        self.backing.seek(SeekFrom::Start(position))?;
        self.backing.write_all(&bytes)?;
        Ok(())
    }

    /// Persist every directory entry record.
    fn write_directory(&mut self) -> Result<()> {
        for id in 0..self.entries.len() {
            self.write_entry(id as DirectoryId)?;
        }
        Ok(())
    }

    /// Take the first free SAT slot, growing the table by one page if
    /// none is left. Returns a zeroed sector owned by a one-element chain.
    fn allocate_sector(&mut self) -> Result<SectorId> {
        let slots_per_sector = self.sector_size() / 4;

        if !self.sat.contains(&FREE_SECTOR) {
            // the new page indexes itself: its id is the first slot of
            // the region it describes
            let new_page = self.sat.len() as SectorId;
            self.sat.resize(self.sat.len() + slots_per_sector, FREE_SECTOR);
            self.sat[new_page as usize] = SAT_SECTOR;

            self.msat.push(new_page);
            let index = self.msat.len() - 1;
            self.header.num_sat_sectors = self.msat.len() as u32;
            if index < INLINE_MSAT_ENTRIES {
                self.header.msat[index] = new_page;
            } else {
                self.extend_msat()?;
            }
            self.write_header()?;
        }

        let next_free = match self.sat.iter().position(|&slot| slot == FREE_SECTOR) {
            Some(index) => index as SectorId,
            None => {
                return Err(Error::Corrupted(
                    "no free slot after allocation table growth".to_string(),
                ))
            },
        };

        self.sat[next_free as usize] = END_OF_CHAIN;
        self.write_sat()?;

        let zeroed = vec![0u8; self.sector_size()];
        self.write_sector(next_free, &zeroed)?;

        Ok(next_free)
    }

    /// Grow the extension MSAT chain until it holds every SAT page id
    /// beyond the 109 inline slots.
    fn extend_msat(&mut self) -> Result<()> {
        let ids_per_extension = self.sector_size() / 4 - 1;
        let overflow = self.msat.len() - INLINE_MSAT_ENTRIES;

        while self.msat_ext.len() * ids_per_extension < overflow {
            let slot = match self.sat.iter().position(|&s| s == FREE_SECTOR) {
                Some(index) => index as SectorId,
                None => {
                    return Err(Error::Corrupted(
                        "no free slot for an extension MSAT sector".to_string(),
                    ))
                },
            };
            self.sat[slot as usize] = MSAT_SECTOR;
            if self.msat_ext.is_empty() {
                self.header.extra_msat_start = slot;
            }
            self.msat_ext.push(slot);
            self.header.num_msat_sectors = self.msat_ext.len() as u32;
        }

        self.write_msat_extension()
    }

    /// Allocate a linked chain of `count` sectors.
    fn allocate_chain(&mut self, count: usize) -> Result<Vec<SectorId>> {
        let mut chain = Vec::with_capacity(count);
        if count == 0 {
            return Ok(chain);
        }

        let mut current = self.allocate_sector()?;
        chain.push(current);
        for _ in 1..count {
            let next = self.allocate_sector()?;
            self.sat[current as usize] = next;
            chain.push(next);
            current = next;
        }

        self.write_sat()?;
        Ok(chain)
    }

    /// Take the first free SSAT slot, growing the SSAT by one page and
    /// the mini-stream container as needed.
    fn allocate_short_sector(&mut self) -> Result<SectorId> {
        let slots_per_sector = self.sector_size() / 4;

        if !self.ssat.contains(&FREE_SECTOR) {
            let new_page = self.allocate_sector()?;
            self.header.num_short_sectors += 1;

            if self.header.ssat_start < 0 {
                self.header.ssat_start = new_page;
            } else {
                let chain = follow_chain(&self.sat, self.header.ssat_start)?;
                let tail = *chain.last().ok_or_else(|| {
                    Error::Corrupted("SSAT chain start names no sectors".to_string())
                })?;
                self.sat[tail as usize] = new_page;
                self.write_sat()?;
            }
            self.write_header()?;

            self.ssat.resize(self.ssat.len() + slots_per_sector, FREE_SECTOR);
        }

        let next_free = match self.ssat.iter().position(|&slot| slot == FREE_SECTOR) {
            Some(index) => index as SectorId,
            None => {
                return Err(Error::Corrupted(
                    "no free slot after short table growth".to_string(),
                ))
            },
        };

        self.ssat[next_free as usize] = END_OF_CHAIN;
        self.write_ssat()?;
        self.ensure_container_capacity(next_free)?;

        Ok(next_free)
    }

    /// Make sure the root entry's chain covers every allocated short
    /// sector, and keep the root's size at the mini-stream length.
    fn ensure_container_capacity(&mut self, highest: SectorId) -> Result<()> {
        let ratio = self.sector_size() / self.short_sector_size();
        let required = highest as usize / ratio + 1;

        if self.entries[0].start < 0 {
            let first = self.allocate_sector()?;
            self.entries[0].start = first;
        }

        loop {
            let chain = follow_chain(&self.sat, self.entries[0].start)?;
            if chain.len() >= required {
                break;
            }
            let tail = *chain.last().ok_or_else(|| {
                Error::Corrupted("mini-stream container names no sectors".to_string())
            })?;
            let fresh = self.allocate_sector()?;
            self.sat[tail as usize] = fresh;
            self.write_sat()?;
        }

        let used = self
            .ssat
            .iter()
            .rposition(|&slot| slot != FREE_SECTOR)
            .map_or(0, |position| position + 1);
        self.entries[0].size = (used * self.short_sector_size()) as u64;
        self.write_entry(0)
    }

    /// Allocate a linked chain of `count` short sectors.
    fn allocate_short_chain(&mut self, count: usize) -> Result<Vec<SectorId>> {
        let mut chain = Vec::with_capacity(count);
        if count == 0 {
            return Ok(chain);
        }

        let mut current = self.allocate_short_sector()?;
        chain.push(current);
        for _ in 1..count {
            let next = self.allocate_short_sector()?;
            self.ssat[current as usize] = next;
            chain.push(next);
            current = next;
        }

        self.write_ssat()?;
        Ok(chain)
    }

    /// First record of type `Empty`, growing the directory by one sector
    /// when every record is taken.
    ///
    /// A new directory sector is spliced into the directory chain before
    /// any record is written into it.
    fn next_empty_entry(&mut self) -> Result<DirectoryId> {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.entry_type == EntryType::Empty)
        {
            return Ok(index as DirectoryId);
        }

        let first_new = self.entries.len() as DirectoryId;
        let entries_per_sector = self.sector_size() / DIRENTRY_SIZE;

        let new_sector = self.allocate_sector()?;
        if self.header.directory_start < 0 {
            self.header.directory_start = new_sector;
        } else {
            let chain = follow_chain(&self.sat, self.header.directory_start)?;
            let tail = *chain.last().ok_or_else(|| {
                Error::Corrupted("directory chain start names no sectors".to_string())
            })?;
            self.sat[tail as usize] = new_sector;
            self.write_sat()?;
        }
        self.write_header()?;

        for _ in 0..entries_per_sector {
            self.entries.push(DirectoryEntry::empty());
            self.parent.push(END);
            self.parent_storage.push(END);
        }
        for offset in 0..entries_per_sector {
            self.write_entry(first_new + offset as DirectoryId)?;
        }

        Ok(first_new)
    }

    /// Create a directory entry and splice it into its parent storage's
    /// tree: allocate a record, persist it, then insert.
    fn insert_entry(
        &mut self,
        name: &str,
        entry_type: EntryType,
        storage_id: DirectoryId,
    ) -> Result<DirectoryId> {
        validate_name(name)?;
        if !self.entries.is_empty() && rbtree::find_child(&self.entries, storage_id, name) != END {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let id = self.next_empty_entry()?;
        {
            let entry = &mut self.entries[id as usize];
            entry.name = name.to_string();
            entry.entry_type = entry_type;
        }

        DirectoryTree::new(&mut self.entries, &mut self.parent, &mut self.parent_storage)
            .insert(id, storage_id);
        self.write_directory()?;

        Ok(id)
    }

    /// Descend the path's storage components, creating missing storages.
    fn resolve_parent_storage(&mut self, components: &[&str]) -> Result<DirectoryId> {
        let mut storage: DirectoryId = 0;
        for component in components {
            let found = rbtree::find_child(&self.entries, storage, component);
            if found >= 0 {
                // a case-folded match is only reusable when it is the same
                // storage, spelled the same way
                let entry = &self.entries[found as usize];
                if entry.entry_type != EntryType::UserStorage || entry.name != *component {
                    return Err(Error::DuplicateName((*component).to_string()));
                }
                storage = found;
            } else {
                storage = self.insert_entry(component, EntryType::UserStorage, storage)?;
            }
        }
        Ok(storage)
    }

    /// Find or create the stream entry a path names.
    fn prepare_stream_entry(&mut self, path: &str) -> Result<DirectoryId> {
        let components = path_components(path);
        let Some((leaf, parents)) = components.split_last() else {
            return Err(Error::NotFound(path.to_string()));
        };

        let parent = self.resolve_parent_storage(parents)?;
        match rbtree::find_child(&self.entries, parent, leaf) {
            found if found >= 0 => {
                // rewriting the same stream is fine; a name that merely
                // folds equal is a collision
                let entry = &self.entries[found as usize];
                if entry.entry_type != EntryType::UserStream || entry.name != *leaf {
                    return Err(Error::DuplicateName((*leaf).to_string()));
                }
                Ok(found)
            },
            _ => self.insert_entry(leaf, EntryType::UserStream, parent),
        }
    }

    /// Release a stream's current chain back to the free pool.
    fn release_stream_chain(&mut self, id: DirectoryId) -> Result<()> {
        let start = self.entries[id as usize].start;
        if start < 0 {
            return Ok(());
        }

        let size = self.entries[id as usize].size;
        if size < u64::from(self.header.mini_cutoff) && id != 0 {
            let chain = follow_chain(&self.ssat, start)?;
            for short in chain {
                self.ssat[short as usize] = FREE_SECTOR;
            }
            self.write_ssat()?;
        } else {
            let chain = follow_chain(&self.sat, start)?;
            for sector in chain {
                self.sat[sector as usize] = FREE_SECTOR;
            }
            self.write_sat()?;
        }

        self.entries[id as usize].start = END_OF_CHAIN;
        Ok(())
    }

    /// Allocate the right kind of chain for the payload and persist it.
    fn commit_stream(&mut self, id: DirectoryId, data: &[u8]) -> Result<()> {
        self.release_stream_chain(id)?;

        let start = if (data.len() as u64) < u64::from(self.header.mini_cutoff) {
            let short_size = self.short_sector_size();
            let count = data.len().div_ceil(short_size);
            let chain = self.allocate_short_chain(count)?;
            for (index, &short) in chain.iter().enumerate() {
                self.write_short_sector(short, &data[index * short_size..])?;
            }
            chain.first().copied().unwrap_or(END_OF_CHAIN)
        } else {
            let sector_size = self.sector_size();
            let count = data.len().div_ceil(sector_size);
            let chain = self.allocate_chain(count)?;
            for (index, &sector) in chain.iter().enumerate() {
                self.write_sector(sector, &data[index * sector_size..])?;
            }
            chain.first().copied().unwrap_or(END_OF_CHAIN)
        };

        self.entries[id as usize].start = start;
        self.entries[id as usize].size = data.len() as u64;
        self.write_entry(id)
    }
}

/// Buffered writer for one user stream.
///
/// Bytes accumulate in memory; the backing chain is chosen (short or full
/// sectors, by final length against the cutoff) and written when the
/// writer is closed. Dropping an unclosed writer commits best-effort,
/// swallowing errors; call [`StreamWriter::close`] to observe them.
#[derive(Debug)]
pub struct StreamWriter<'a, B: Write + Seek> {
    document: &'a mut CompoundDocument<B>,
    id: DirectoryId,
    data: Vec<u8>,
    committed: bool,
}

impl<B: Write + Seek> StreamWriter<'_, B> {
    /// Directory id of the entry being written
    pub fn id(&self) -> DirectoryId {
        self.id
    }

    /// Commit the buffered bytes to the document.
    pub fn close(mut self) -> Result<()> {
        self.commit()
    }

    fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        let data = std::mem::take(&mut self.data);
        self.document.commit_stream(self.id, &data)
    }
}

impl<B: Write + Seek> Write for StreamWriter<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: Write + Seek> Drop for StreamWriter<'_, B> {
    fn drop(&mut self) {
        let _ = self.commit();
    }
}
