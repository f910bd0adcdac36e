use crate::data::DataBlock;
use crate::errors::Error;
use crate::header::{CentralDirectoryFileHeader, CompressionMethod, LocalFileHeader};
use crate::locator::EndOfCentralDirectory;
use crate::parser::CentralDirectoryVisitor;
use crate::utils::le_u16;

const EMPTY_SLOT: u32 = u32::MAX;

/// Case-sensitive 32-bit hash of an entry name as stored in the central
/// directory. A slash-terminated directory name and its unterminated
/// counterpart hash (and compare) differently.
fn name_hash(name: &[u8]) -> u32 {
    crc32fast::hash(name)
}

/// A logical archive entry handed to consumers.
///
/// Borrowed data points into the retained central directory buffer. Two
/// entries are equal by full name.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    name: &'a str,
    directory: bool,
    method: CompressionMethod,
    crc32: u32,
    size: u64,
    compressed_size: u64,
    local_header_offset: u64,
    extra: &'a [u8],
    comment: &'a [u8],
}

impl<'a> Entry<'a> {
    fn from_header(header: &CentralDirectoryFileHeader<'a>) -> Entry<'a> {
        Entry {
            name: header.name(),
            directory: header.is_directory(),
            method: header.method(),
            crc32: header.crc32(),
            size: header.uncompressed_size(),
            compressed_size: header.compressed_size(),
            local_header_offset: header.local_header_offset(),
            extra: header.extra(),
            comment: header.comment(),
        }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The same entry seen through a directory-prefix view: identical record
    /// fields, name relative to the prefix.
    pub(crate) fn strip_name_prefix(mut self, prefix: &str) -> Entry<'a> {
        if let Some(stripped) = self.name.strip_prefix(prefix) {
            self.name = stripped;
        }
        self
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Uncompressed size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    pub fn extra(&self) -> &'a [u8] {
        self.extra
    }

    pub fn comment(&self) -> &'a [u8] {
        self.comment
    }
}

impl PartialEq for Entry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Entry<'_> {}

/// Table of the entries parsed from a central directory.
///
/// Three parallel arrays in central directory order carry the name hash, the
/// header offset, and the name position of every entry; a linear-probe table
/// sized for a load factor of at most 0.75 maps name hashes to slots.
/// Collisions are disambiguated by comparing the candidate name against the
/// central directory bytes, so names are never copied out. Construction is
/// deterministic: identical input bytes produce identical tables.
pub struct EntryIndex {
    central_directory: Vec<u8>,
    hashes: Vec<u32>,
    central_header_offsets: Vec<u32>,
    name_positions: Vec<u32>,
    table: Vec<u32>,
}

impl EntryIndex {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Look up an entry by its exact stored name.
    pub fn get<'a>(&'a self, name: &str) -> Option<Entry<'a>> {
        let slot = self.find_slot(name.as_bytes())?;
        self.entry_at(slot)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find_slot(name.as_bytes()).is_some()
    }

    /// Iterate entries in central directory order. Consumers rely on this
    /// order for deterministic classpath output.
    pub fn iter(&self) -> Entries<'_> {
        Entries {
            index: self,
            next: 0,
        }
    }

    fn find_slot(&self, name: &[u8]) -> Option<usize> {
        if self.table.is_empty() {
            return None;
        }
        let mask = self.table.len() - 1;
        let hash = name_hash(name);
        let mut probe = hash as usize & mask;
        loop {
            let slot = self.table[probe];
            if slot == EMPTY_SLOT {
                return None;
            }
            let slot = slot as usize;
            if self.hashes[slot] == hash && self.name_bytes(slot) == name {
                return Some(slot);
            }
            probe = (probe + 1) & mask;
        }
    }

    fn name_bytes(&self, slot: usize) -> &[u8] {
        let header_offset = self.central_header_offsets[slot] as usize;
        let name_len =
            le_u16(&self.central_directory[header_offset + 28..header_offset + 30]) as usize;
        let position = self.name_positions[slot] as usize;
        &self.central_directory[position..position + name_len]
    }

    fn entry_at(&self, slot: usize) -> Option<Entry<'_>> {
        let offset = self.central_header_offsets[slot] as usize;
        // The header was fully validated when the index was built, so the
        // re-parse cannot fail on the same bytes.
        let header = CentralDirectoryFileHeader::parse(&self.central_directory, offset).ok()?;
        Some(Entry::from_header(&header))
    }

    /// The payload byte range of an entry within the archive data.
    ///
    /// The local header's own name and extra lengths govern where the
    /// payload begins; they may differ from the central directory values.
    pub(crate) fn entry_payload(
        &self,
        data: &DataBlock,
        entry: &Entry<'_>,
    ) -> Result<DataBlock, Error> {
        let mut buf = [0u8; LocalFileHeader::SIZE];
        data.read_into(&mut buf, entry.local_header_offset())?;
        let local = LocalFileHeader::parse(&buf)?;
        let payload_offset =
            entry.local_header_offset() + LocalFileHeader::SIZE as u64 + local.variable_length();
        data.subsection(payload_offset, entry.compressed_size())
    }

    /// The byte range of an entry that is itself an archive.
    ///
    /// Only uncompressed entries can be viewed in place; a compressed inner
    /// archive is a hard error for this entry, never for its parent.
    pub(crate) fn nested_archive_data(
        &self,
        data: &DataBlock,
        entry: &Entry<'_>,
    ) -> Result<DataBlock, Error> {
        if entry.method() != CompressionMethod::Stored {
            return Err(Error::nested_entry_compressed(entry.name()));
        }
        self.entry_payload(data, entry)
    }
}

/// Ordered iterator over an [`EntryIndex`].
pub struct Entries<'a> {
    index: &'a EntryIndex,
    next: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Entry<'a>> {
        if self.next >= self.index.len() {
            return None;
        }
        let entry = self.index.entry_at(self.next);
        self.next += 1;
        entry
    }
}

/// [`CentralDirectoryVisitor`] that accumulates the parallel arrays and
/// finishes into an [`EntryIndex`] once handed the central directory buffer.
#[derive(Default)]
pub(crate) struct EntryIndexBuilder {
    hashes: Vec<u32>,
    central_header_offsets: Vec<u32>,
    name_positions: Vec<u32>,
}

impl CentralDirectoryVisitor for EntryIndexBuilder {
    fn visit_start(&mut self, eocd: &EndOfCentralDirectory, _central_directory: &DataBlock) {
        let count = eocd.entry_count() as usize;
        self.hashes.reserve(count);
        self.central_header_offsets.reserve(count);
        self.name_positions.reserve(count);
    }

    fn visit_file_header(&mut self, header: &CentralDirectoryFileHeader<'_>, data_offset: usize) {
        self.hashes.push(name_hash(header.name().as_bytes()));
        self.central_header_offsets.push(data_offset as u32);
        self.name_positions
            .push((data_offset + CentralDirectoryFileHeader::FIXED_SIZE) as u32);
    }
}

impl EntryIndexBuilder {
    pub(crate) fn build(self, central_directory: Vec<u8>) -> EntryIndex {
        let n = self.hashes.len();
        let capacity = table_capacity(n);
        let mut table = vec![EMPTY_SLOT; capacity];
        if capacity > 0 {
            let mask = capacity - 1;
            for (slot, hash) in self.hashes.iter().enumerate() {
                let mut probe = *hash as usize & mask;
                while table[probe] != EMPTY_SLOT {
                    probe = (probe + 1) & mask;
                }
                table[probe] = slot as u32;
            }
        }
        EntryIndex {
            central_directory,
            hashes: self.hashes,
            central_header_offsets: self.central_header_offsets,
            name_positions: self.name_positions,
            table,
        }
    }
}

/// Smallest power of two keeping the load factor at or below 0.75.
fn table_capacity(entries: usize) -> usize {
    if entries == 0 {
        return 0;
    }
    let minimum = (entries * 4).div_ceil(3);
    minimum.next_power_of_two()
}
