use crate::data::DataBlock;
use crate::errors::{Error, ErrorKind};
use crate::utils::{le_u16, le_u32, le_u64};
use tracing::debug;

pub(crate) const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06054b50;
pub(crate) const ZIP64_END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06064b50;
pub(crate) const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

const MINIMUM_SIZE: usize = 22;
const MAXIMUM_COMMENT_LENGTH: usize = 0xFFFF;
const MAXIMUM_SIZE: usize = MINIMUM_SIZE + MAXIMUM_COMMENT_LENGTH;
const COMMENT_LENGTH_OFFSET: usize = 20;
const READ_BLOCK_SIZE: usize = 256;

const SENTINEL_U16: u16 = u16::MAX;
const SENTINEL_U32: u32 = u32::MAX;

/// The located ZIP "end of central directory" record, together with the
/// ZIP64 end record when one precedes it.
///
/// Located by scanning backwards from the end of the data. A candidate
/// window is only accepted when the signature matches AND the record size
/// equals the structure size plus the stored comment length, which
/// disambiguates real records from signature look-alike bytes inside the
/// archive comment.
#[derive(Debug)]
pub(crate) struct EndOfCentralDirectory {
    record: Vec<u8>,
    zip64: Option<Zip64End>,
}

impl EndOfCentralDirectory {
    /// Search backwards from the end of `data` until a valid record is found.
    ///
    /// Reads a trailing block of up to [`READ_BLOCK_SIZE`] bytes and slides a
    /// window one byte at a time, growing the block when the window walks off
    /// its front. Gives up with `NotAZipArchive` once the window exceeds the
    /// format maximum of 22 + 0xFFFF bytes or the data itself.
    pub(crate) fn find(data: &DataBlock) -> Result<EndOfCentralDirectory, Error> {
        let mut block = read_tail_block(data, READ_BLOCK_SIZE)?;
        let mut size = MINIMUM_SIZE;
        loop {
            if size > MAXIMUM_SIZE || size as u64 > data.size() {
                return Err(Error::from(ErrorKind::NotAZipArchive));
            }
            if size > block.len() {
                block = read_tail_block(data, size + READ_BLOCK_SIZE)?;
                continue;
            }
            let offset = block.len() - size;
            if is_valid_record(&block[offset..], size) {
                break;
            }
            size += 1;
        }

        let record = block[block.len() - size..].to_vec();
        let stream_pos = data.size() - size as u64;
        let zip64 = Zip64End::find(data, stream_pos)?;
        debug!(
            eocd_offset = stream_pos,
            record_size = size,
            zip64 = zip64.is_some(),
            "located end of central directory"
        );

        let eocd = EndOfCentralDirectory { record, zip64 };
        if eocd.zip64.is_none() && eocd.has_sentinel_fields() {
            return Err(Error::malformed(
                "zip64 sentinel without zip64 end of central directory locator",
            ));
        }
        Ok(eocd)
    }

    fn has_sentinel_fields(&self) -> bool {
        le_u16(&self.record[10..12]) == SENTINEL_U16
            || le_u32(&self.record[12..16]) == SENTINEL_U32
            || le_u32(&self.record[16..20]) == SENTINEL_U32
    }

    /// Total number of entries in the central directory.
    pub(crate) fn entry_count(&self) -> u64 {
        match &self.zip64 {
            Some(zip64) => zip64.total_entries,
            None => u64::from(le_u16(&self.record[10..12])),
        }
    }

    fn central_directory_size(&self) -> u64 {
        match &self.zip64 {
            Some(zip64) => zip64.central_directory_size,
            None => u64::from(le_u32(&self.record[12..16])),
        }
    }

    fn central_directory_offset(&self) -> u64 {
        match &self.zip64 {
            Some(zip64) => zip64.central_directory_offset,
            None => u64::from(le_u32(&self.record[16..20])),
        }
    }

    /// Size of this record including its comment.
    pub(crate) fn record_size(&self) -> usize {
        self.record.len()
    }

    pub(crate) fn comment(&self) -> &[u8] {
        &self.record[MINIMUM_SIZE..]
    }

    pub(crate) fn is_zip64(&self) -> bool {
        self.zip64.is_some()
    }

    /// The location in the data at which the archive actually starts.
    ///
    /// For most files the archive starts at 0, but executable archives often
    /// prepend a launch stub. A prepended stub shifts every absolute offset
    /// by a constant while the stored central-directory offset remains the
    /// logical offset within the archive, so the start falls out of the
    /// trailing structure sizes:
    /// `size − eocd − cd_size − zip64_end − zip64_locator − cd_offset`.
    pub(crate) fn start_of_archive(&self, data: &DataBlock) -> Result<u64, Error> {
        let trailing = self.record.len() as u64
            + self.central_directory_size()
            + self.zip64.as_ref().map_or(0, |z| z.end_record_size)
            + self.zip64.as_ref().map_or(0, |_| Zip64End::LOCATOR_SIZE);
        let actual_offset = data
            .size()
            .checked_sub(trailing)
            .ok_or_else(|| Error::malformed("central directory size exceeds data"))?;
        actual_offset
            .checked_sub(self.central_directory_offset())
            .ok_or_else(|| Error::malformed("central directory offset exceeds data"))
    }

    /// The central directory bytes, as a view of the archive data.
    ///
    /// `data` must already be narrowed to the archive (prefix bytes removed)
    /// so that the stored logical offset is valid.
    pub(crate) fn central_directory(&self, data: &DataBlock) -> Result<DataBlock, Error> {
        data.subsection(
            self.central_directory_offset(),
            self.central_directory_size(),
        )
    }
}

fn read_tail_block(data: &DataBlock, size: usize) -> Result<Vec<u8>, Error> {
    let length = data.size().min(size as u64);
    data.read(data.size() - length, length as usize)
}

fn is_valid_record(record: &[u8], size: usize) -> bool {
    if record.len() < MINIMUM_SIZE || le_u32(&record[0..4]) != END_OF_CENTRAL_DIR_SIGNATURE {
        return false;
    }
    // Total size must be the structure size + comment
    let comment_length = le_u16(&record[COMMENT_LENGTH_OFFSET..COMMENT_LENGTH_OFFSET + 2]);
    size == MINIMUM_SIZE + comment_length as usize
}

/// 4.3.14
#[derive(Debug)]
struct Zip64End {
    /// Size of the zip64 end record as implied by the locator that points at
    /// it, extensible data sector included.
    end_record_size: u64,
    total_entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
}

impl Zip64End {
    /// 4.3.15: the locator is a fixed 20 bytes immediately before the EOCD.
    const LOCATOR_SIZE: u64 = 20;

    const FIXED_SIZE: usize = 56;

    /// Look for a zip64 locator directly preceding the record at
    /// `eocd_offset` and dereference it. Absence is not an error.
    fn find(data: &DataBlock, eocd_offset: u64) -> Result<Option<Zip64End>, Error> {
        let Some(locator_offset) = eocd_offset.checked_sub(Self::LOCATOR_SIZE) else {
            return Ok(None);
        };
        let locator = data.read(locator_offset, Self::LOCATOR_SIZE as usize)?;
        if le_u32(&locator[0..4]) != ZIP64_LOCATOR_SIGNATURE {
            return Ok(None);
        }
        let end_offset = le_u64(&locator[8..16]);
        if end_offset > locator_offset {
            return Err(Error::malformed("zip64 end of central directory offset"));
        }

        let block = data.read(end_offset, Self::FIXED_SIZE)?;
        let signature = le_u32(&block[0..4]);
        if signature != ZIP64_END_OF_CENTRAL_DIR_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: ZIP64_END_OF_CENTRAL_DIR_SIGNATURE,
                actual: signature,
            }));
        }
        Ok(Some(Zip64End {
            end_record_size: locator_offset - end_offset,
            total_entries: le_u64(&block[32..40]),
            central_directory_size: le_u64(&block[40..48]),
            central_directory_offset: le_u64(&block[48..56]),
        }))
    }
}
