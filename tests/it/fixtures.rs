//! Deterministic Zip32 builder for test archives.
//!
//! Output uses fixed timestamps, explicit sizes and no data descriptors, so
//! the bytes (and therefore every parsed table) are stable across runs.
//! Stored offsets are logical, relative to the archive start, which is what
//! real tools produce when an executable stub is prepended.

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

const LOCAL_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: u32 = 0x06054b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;

pub struct EntrySpec {
    name: String,
    payload: Vec<u8>,
    method: u16,
    comment: Vec<u8>,
    local_extra: Vec<u8>,
    central_extra: Vec<u8>,
}

impl EntrySpec {
    pub fn new(name: &str, payload: impl Into<Vec<u8>>) -> EntrySpec {
        EntrySpec {
            name: name.to_owned(),
            payload: payload.into(),
            method: STORED,
            comment: Vec::new(),
            local_extra: Vec::new(),
            central_extra: Vec::new(),
        }
    }

    pub fn method(mut self, method: u16) -> EntrySpec {
        self.method = method;
        self
    }

    pub fn comment(mut self, comment: &str) -> EntrySpec {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    pub fn local_extra(mut self, extra: Vec<u8>) -> EntrySpec {
        self.local_extra = extra;
        self
    }

    pub fn central_extra(mut self, extra: Vec<u8>) -> EntrySpec {
        self.central_extra = extra;
        self
    }
}

#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<EntrySpec>,
    comment: Vec<u8>,
    prefix: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> ZipBuilder {
        ZipBuilder::default()
    }

    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> ZipBuilder {
        self.prefix = prefix.into();
        self
    }

    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> ZipBuilder {
        self.comment = comment.into();
        self
    }

    pub fn stored(self, name: &str, payload: impl Into<Vec<u8>>) -> ZipBuilder {
        self.entry(EntrySpec::new(name, payload))
    }

    pub fn deflated(self, name: &str, payload: impl Into<Vec<u8>>) -> ZipBuilder {
        self.entry(EntrySpec::new(name, payload).method(DEFLATED))
    }

    pub fn directory(self, name: &str) -> ZipBuilder {
        assert!(name.ends_with('/'), "directory names end in a slash");
        self.entry(EntrySpec::new(name, Vec::new()))
    }

    pub fn entry(mut self, entry: EntrySpec) -> ZipBuilder {
        self.entries.push(entry);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let comment = self.comment.clone();
        let (prefix, body, central, entries) = self.build_parts();
        let central_offset = body.len() as u32;
        let mut out = prefix;
        out.extend_from_slice(&body);
        out.extend_from_slice(&central);
        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]); // disk numbers
        out.extend_from_slice(&(entries as u16).to_le_bytes());
        out.extend_from_slice(&(entries as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&comment);
        out
    }

    fn build_parts(self) -> (Vec<u8>, Vec<u8>, Vec<u8>, usize) {
        let mut body = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let data = match entry.method {
                DEFLATED => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(&entry.payload).unwrap();
                    encoder.finish().unwrap()
                }
                _ => entry.payload.clone(),
            };
            let crc = if entry.payload.is_empty() {
                0
            } else {
                crc32fast::hash(&entry.payload)
            };
            let local_offset = body.len() as u32;

            body.extend_from_slice(&LOCAL_SIGNATURE.to_le_bytes());
            body.extend_from_slice(&20u16.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&entry.method.to_le_bytes());
            body.extend_from_slice(&[0u8; 4]); // timestamp
            body.extend_from_slice(&crc.to_le_bytes());
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(&(entry.payload.len() as u32).to_le_bytes());
            body.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            body.extend_from_slice(&(entry.local_extra.len() as u16).to_le_bytes());
            body.extend_from_slice(entry.name.as_bytes());
            body.extend_from_slice(&entry.local_extra);
            body.extend_from_slice(&data);

            central.extend_from_slice(&CENTRAL_SIGNATURE.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&entry.method.to_le_bytes());
            central.extend_from_slice(&[0u8; 4]); // timestamp
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.payload.len() as u32).to_le_bytes());
            central.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&(entry.central_extra.len() as u16).to_le_bytes());
            central.extend_from_slice(&(entry.comment.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 8]); // disk, attributes
            central.extend_from_slice(&local_offset.to_le_bytes());
            central.extend_from_slice(entry.name.as_bytes());
            central.extend_from_slice(&entry.central_extra);
            central.extend_from_slice(&entry.comment);
        }

        let entries = self.entries.len();
        (self.prefix, body, central, entries)
    }

    /// Like [`build`](ZipBuilder::build), but finish with a zip64 end record
    /// and locator. `sentinel` selects which classic fields are replaced by
    /// their sentinel values; the zip64 record always carries the real ones.
    pub fn build_zip64(self, sentinel: Zip64Sentinel) -> Vec<u8> {
        let (prefix, body, central, entries) = self.build_parts();
        assert!(prefix.is_empty());
        let central_offset = body.len() as u64;
        let central_len = central.len() as u64;
        let mut out = body;
        out.extend_from_slice(&central);

        let zip64_offset = out.len() as u64;
        out.extend_from_slice(&ZIP64_EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&44u64.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]); // versions
        out.extend_from_slice(&[0u8; 8]); // disk numbers
        out.extend_from_slice(&(entries as u64).to_le_bytes());
        out.extend_from_slice(&(entries as u64).to_le_bytes());
        out.extend_from_slice(&central_len.to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&ZIP64_LOCATOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&zip64_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());

        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        let classic_entries = if sentinel == Zip64Sentinel::EntryCount {
            u16::MAX
        } else {
            entries as u16
        };
        out.extend_from_slice(&classic_entries.to_le_bytes());
        out.extend_from_slice(&classic_entries.to_le_bytes());
        let classic_size = if sentinel == Zip64Sentinel::CentralDirectorySize {
            u32::MAX
        } else {
            central_len as u32
        };
        out.extend_from_slice(&classic_size.to_le_bytes());
        let classic_offset = if sentinel == Zip64Sentinel::CentralDirectoryOffset {
            u32::MAX
        } else {
            central_offset as u32
        };
        out.extend_from_slice(&classic_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zip64Sentinel {
    EntryCount,
    CentralDirectorySize,
    CentralDirectoryOffset,
}

/// A single-entry inner jar holding `m/r.txt` (or any given entry).
pub fn inner_jar(entry_name: &str, payload: &[u8]) -> Vec<u8> {
    ZipBuilder::new().stored(entry_name, payload).build()
}

/// Write archive bytes to a fresh temp file and return its guard and path.
pub fn temp_archive(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.jar");
    std::fs::write(&path, bytes).unwrap();
    (dir, path)
}
