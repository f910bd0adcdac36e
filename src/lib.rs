//! Loader for self-contained executable ZIP/JAR archives that embed their
//! dependencies as uncompressed inner archives.
//!
//! The outer archive is opened once and every nested archive is a sub-range
//! view of that file: nothing is extracted to disk. Views are addressed by
//! composite URLs of the form `jar:file:/app.jar!/lib/dep.jar!/entry`, and a
//! [`ClassPathResolver`] performs ordered class and resource lookups over a
//! list of such views.

#![forbid(unsafe_code)]

mod archive;
mod data;
mod errors;
mod header;
mod index;
mod locator;
mod manifest;
mod parser;
mod resolver;
mod unpack;
mod url;
mod utils;

pub use archive::{
    Archive, ArchiveEntry, ArchiveType, EntryFilter, EntryReader, NestedArchives, MANIFEST_NAME,
};
pub use data::{DataBlock, DataReader, FileSource, ReaderAt};
pub use errors::{Error, ErrorKind};
pub use header::CompressionMethod;
pub use index::{Entries, Entry, EntryIndex};
pub use manifest::{attribute_names, Attributes, Manifest};
pub use resolver::{
    ClassPathEntry, ClassPathIndexFile, ClassPathResolver, PackageDefinition,
    DEFAULT_CLASSPATH_INDEX_LOCATION,
};
pub use crate::url::{
    register_url_stream_handler, CompositeUrl, ResourceUrl, UrlContent, UrlStreamHandler,
};
