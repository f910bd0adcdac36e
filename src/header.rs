use crate::errors::{Error, ErrorKind};
use crate::utils::{le_u16, le_u32, le_u64};

pub(crate) const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

const ZIP64_EXTRA_FIELD: u16 = 0x0001;

/// The compression method of an archive entry (4.4.5).
///
/// Only the two methods relevant to executable archives are modelled; the
/// rest carry their raw identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(id: u16) -> Self {
        match id {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            other => CompressionMethod::Unknown(other),
        }
    }
}

/// A central directory file header (4.3.12), borrowed from the central
/// directory buffer.
///
/// Classic 32-bit size and offset fields holding the sentinel `0xFFFFFFFF`
/// are resolved through the Zip64 extended-information extra block: each
/// sentinel field consumes 8 bytes there, in the fixed order uncompressed
/// size, compressed size, local header offset, then a 4-byte disk number
/// (4.5.3).
#[derive(Debug)]
pub(crate) struct CentralDirectoryFileHeader<'a> {
    method: CompressionMethod,
    dos_time: u16,
    dos_date: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    name: &'a str,
    extra: &'a [u8],
    comment: &'a [u8],
}

impl<'a> CentralDirectoryFileHeader<'a> {
    pub(crate) const FIXED_SIZE: usize = 46;

    pub(crate) fn parse(central_directory: &'a [u8], offset: usize) -> Result<Self, Error> {
        let data = central_directory
            .get(offset..)
            .ok_or(ErrorKind::Truncated)?;
        if data.len() < Self::FIXED_SIZE {
            return Err(Error::from(ErrorKind::Truncated));
        }
        let signature = le_u32(&data[0..4]);
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: CENTRAL_HEADER_SIGNATURE,
                actual: signature,
            }));
        }

        let name_len = le_u16(&data[28..30]) as usize;
        let extra_len = le_u16(&data[30..32]) as usize;
        let comment_len = le_u16(&data[32..34]) as usize;
        let variable = data
            .get(Self::FIXED_SIZE..Self::FIXED_SIZE + name_len + extra_len + comment_len)
            .ok_or(ErrorKind::Truncated)?;
        let (name, rest) = variable.split_at(name_len);
        let (extra, comment) = rest.split_at(extra_len);
        let name = std::str::from_utf8(name).map_err(Error::utf8)?;

        let mut header = CentralDirectoryFileHeader {
            method: CompressionMethod::from(le_u16(&data[10..12])),
            dos_time: le_u16(&data[12..14]),
            dos_date: le_u16(&data[14..16]),
            crc32: le_u32(&data[16..20]),
            compressed_size: u64::from(le_u32(&data[20..24])),
            uncompressed_size: u64::from(le_u32(&data[24..28])),
            local_header_offset: u64::from(le_u32(&data[42..46])),
            name,
            extra,
            comment,
        };
        header.resolve_zip64_extra()?;
        Ok(header)
    }

    fn resolve_zip64_extra(&mut self) -> Result<(), Error> {
        let needs_zip64 = self.uncompressed_size == u64::from(u32::MAX)
            || self.compressed_size == u64::from(u32::MAX)
            || self.local_header_offset == u64::from(u32::MAX);
        if !needs_zip64 {
            return Ok(());
        }

        let mut extra_fields = self.extra;
        while let (Some(kind), Some(size)) = (
            extra_fields.get(0..2).map(le_u16),
            extra_fields.get(2..4).map(le_u16),
        ) {
            extra_fields = &extra_fields[4..];
            let end_pos = (size as usize).min(extra_fields.len());
            let (mut field, rest) = extra_fields.split_at(end_pos);
            extra_fields = rest;

            if kind != ZIP64_EXTRA_FIELD {
                continue;
            }

            if self.uncompressed_size == u64::from(u32::MAX) {
                self.uncompressed_size =
                    field.get(..8).map(le_u64).ok_or(ErrorKind::Truncated)?;
                field = &field[8..];
            }
            if self.compressed_size == u64::from(u32::MAX) {
                self.compressed_size = field.get(..8).map(le_u64).ok_or(ErrorKind::Truncated)?;
                field = &field[8..];
            }
            if self.local_header_offset == u64::from(u32::MAX) {
                self.local_header_offset =
                    field.get(..8).map(le_u64).ok_or(ErrorKind::Truncated)?;
            }
            return Ok(());
        }
        Err(Error::malformed(
            "zip64 extended information extra field not found",
        ))
    }

    pub(crate) fn name(&self) -> &'a str {
        self.name
    }

    /// Directories are identified by a trailing slash; the terminated and
    /// unterminated spellings are distinct entries.
    pub(crate) fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub(crate) fn method(&self) -> CompressionMethod {
        self.method
    }

    #[allow(dead_code)]
    pub(crate) fn dos_timestamp(&self) -> u32 {
        (u32::from(self.dos_date) << 16) | u32::from(self.dos_time)
    }

    pub(crate) fn crc32(&self) -> u32 {
        self.crc32
    }

    pub(crate) fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub(crate) fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub(crate) fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    pub(crate) fn extra(&self) -> &'a [u8] {
        self.extra
    }

    pub(crate) fn comment(&self) -> &'a [u8] {
        self.comment
    }

    /// Total record size: the fixed part plus name, extra and comment.
    pub(crate) fn record_size(&self) -> usize {
        Self::FIXED_SIZE + self.name.len() + self.extra.len() + self.comment.len()
    }
}

/// A local file header (4.3.7).
///
/// The central directory is the source of truth for sizes and methods; the
/// local header is parsed only to verify the signature and find where the
/// payload begins, because its name and extra lengths are local to the
/// record and may differ from the central values.
pub(crate) struct LocalFileHeader {
    name_len: u16,
    extra_len: u16,
}

impl LocalFileHeader {
    pub(crate) const SIZE: usize = 30;

    pub(crate) fn parse(data: &[u8]) -> Result<LocalFileHeader, Error> {
        if data.len() < Self::SIZE {
            return Err(Error::from(ErrorKind::Truncated));
        }
        let signature = le_u32(&data[0..4]);
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: LOCAL_FILE_HEADER_SIGNATURE,
                actual: signature,
            }));
        }
        Ok(LocalFileHeader {
            name_len: le_u16(&data[26..28]),
            extra_len: le_u16(&data[28..30]),
        })
    }

    /// Bytes between the fixed header and the entry payload.
    pub(crate) fn variable_length(&self) -> u64 {
        u64::from(self.name_len) + u64::from(self.extra_len)
    }
}
