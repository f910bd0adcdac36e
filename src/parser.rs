use crate::data::DataBlock;
use crate::errors::Error;
use crate::header::CentralDirectoryFileHeader;
use crate::locator::EndOfCentralDirectory;
use tracing::trace;

/// Callbacks triggered while walking the central directory.
///
/// Several visitors may be attached to one parse; they are invoked in
/// registration order for every event.
pub(crate) trait CentralDirectoryVisitor {
    fn visit_start(&mut self, _eocd: &EndOfCentralDirectory, _central_directory: &DataBlock) {}

    fn visit_file_header(&mut self, _header: &CentralDirectoryFileHeader<'_>, _data_offset: usize) {
    }

    fn visit_end(&mut self) {}
}

/// Everything a parse produces: the archive data with any executable prefix
/// removed, the located end record, and the buffered central directory.
pub(crate) struct ParsedArchive {
    pub(crate) data: DataBlock,
    pub(crate) eocd: EndOfCentralDirectory,
    pub(crate) central_directory: Vec<u8>,
}

/// Walks the central directory file headers, triggering
/// [`CentralDirectoryVisitor`]s.
pub(crate) struct CentralDirectoryParser<'v> {
    visitors: Vec<&'v mut dyn CentralDirectoryVisitor>,
}

impl<'v> CentralDirectoryParser<'v> {
    pub(crate) fn new() -> Self {
        CentralDirectoryParser {
            visitors: Vec::new(),
        }
    }

    pub(crate) fn add_visitor(&mut self, visitor: &'v mut dyn CentralDirectoryVisitor) {
        self.visitors.push(visitor);
    }

    /// Parse the source data. When `skip_prefix_bytes` is set the returned
    /// data is narrowed to the archive itself, so stored logical offsets are
    /// valid against it.
    pub(crate) fn parse(
        mut self,
        data: DataBlock,
        skip_prefix_bytes: bool,
    ) -> Result<ParsedArchive, Error> {
        let eocd = EndOfCentralDirectory::find(&data)?;
        let data = if skip_prefix_bytes {
            archive_data(&eocd, data)?
        } else {
            data
        };
        let central_directory = eocd.central_directory(&data)?;
        for visitor in self.visitors.iter_mut() {
            visitor.visit_start(&eocd, &central_directory);
        }

        let bytes = central_directory.read(0, central_directory.size() as usize)?;
        trace!(
            entries = eocd.entry_count(),
            central_directory_size = bytes.len(),
            end_record_size = eocd.record_size(),
            zip64 = eocd.is_zip64(),
            "parsing central directory"
        );
        let mut data_offset = 0usize;
        for _ in 0..eocd.entry_count() {
            let header = CentralDirectoryFileHeader::parse(&bytes, data_offset)?;
            for visitor in self.visitors.iter_mut() {
                visitor.visit_file_header(&header, data_offset);
            }
            data_offset += header.record_size();
        }
        for visitor in self.visitors.iter_mut() {
            visitor.visit_end();
        }

        Ok(ParsedArchive {
            data,
            eocd,
            central_directory: bytes,
        })
    }
}

fn archive_data(eocd: &EndOfCentralDirectory, data: DataBlock) -> Result<DataBlock, Error> {
    let offset = eocd.start_of_archive(&data)?;
    if offset == 0 {
        return Ok(data);
    }
    trace!(prefix_bytes = offset, "skipping executable prefix");
    let remaining = data.size() - offset;
    data.subsection(offset, remaining)
}
