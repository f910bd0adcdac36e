use crate::data::{DataBlock, DataReader, FileSource};
use crate::errors::{Error, ErrorKind};
use crate::header::{CentralDirectoryFileHeader, CompressionMethod};
use crate::index::{Entry, EntryIndex, EntryIndexBuilder};
use crate::manifest::Manifest;
use crate::parser::{CentralDirectoryParser, CentralDirectoryVisitor};
use crate::unpack::{UnpackDirectory, UNPACK_MARKER};
use crate::url::{CompositeUrl, ResourceUrl};
use flate2::read::DeflateDecoder;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

const META_INF: &str = "META-INF/";
const SIGNATURE_FILE_EXTENSION: &str = ".SF";
const SEPARATOR: &str = "!/";

type ManifestSupplier = Arc<dyn Fn() -> Result<Option<Arc<Manifest>>, Error> + Send + Sync>;

/// How an [`Archive`] is rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// Opened directly from a file on disk.
    Direct,
    /// A view over the uncompressed bytes of an entry of an enclosing
    /// archive, with its own central directory.
    NestedJar,
    /// A filtered view of an enclosing archive's entries under a directory
    /// prefix. No central directory of its own.
    NestedDirectory,
    /// An archive unpacked to a directory tree on disk.
    ExplodedDirectory,
}

/// The minimal entry view handed to layout filters and child factories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    name: String,
    directory: bool,
}

impl ArchiveEntry {
    /// Entry name relative to the archive; directories keep their trailing
    /// slash.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, directory: bool) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_owned(),
            directory,
        }
    }
}

/// A predicate over entries, supplied by the caller. This is the extension
/// point by which a client enforces any layout convention.
pub type EntryFilter<'f> = &'f dyn Fn(&ArchiveEntry) -> bool;

/// Marks an archive as signed when any `META-INF/*.SF` entry shows up in the
/// central directory. Signed state is informational; nothing is verified.
#[derive(Default)]
struct SignedJarDetector {
    signed: bool,
}

impl CentralDirectoryVisitor for SignedJarDetector {
    fn visit_file_header(&mut self, header: &CentralDirectoryFileHeader<'_>, _data_offset: usize) {
        let name = header.name();
        if name.starts_with(META_INF) && name.ends_with(SIGNATURE_FILE_EXTENSION) {
            self.signed = true;
        }
    }
}

enum Backing {
    Zip {
        root: Arc<FileSource>,
        data: DataBlock,
        index: Arc<EntryIndex>,
        prefix: String,
        comment: Vec<u8>,
        signed: bool,
    },
    Directory {
        root: PathBuf,
    },
}

/// An archive view: the outer file, a nested archive within it, or an
/// exploded directory tree.
///
/// Nested views share the outer file handle; the file stays open while any
/// view is live. Closing the outermost archive invalidates every derived
/// view, while closing a nested view only invalidates that view.
pub struct Archive {
    backing: Backing,
    archive_type: ArchiveType,
    path_from_root: String,
    manifest_cache: Mutex<Weak<Manifest>>,
    manifest_fallback: Option<ManifestSupplier>,
    unpack: UnpackDirectory,
    closed: AtomicBool,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("archive_type", &self.archive_type)
            .field("path_from_root", &self.path_from_root)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Open an archive file, accounting for any executable prefix bytes.
    pub fn open(path: impl AsRef<Path>) -> Result<Archive, Error> {
        let source = FileSource::open(path)?;
        let data = DataBlock::whole(Arc::clone(&source));
        Archive::parse_zip(source, data, String::new(), ArchiveType::Direct)
    }

    /// Open an archive held in memory. Such archives have no URL.
    pub fn open_bytes(bytes: Vec<u8>) -> Result<Archive, Error> {
        let source = FileSource::from_bytes(bytes);
        let data = DataBlock::whole(Arc::clone(&source));
        Archive::parse_zip(source, data, String::new(), ArchiveType::Direct)
    }

    /// Treat a directory tree as an exploded archive.
    pub fn exploded(root: impl AsRef<Path>) -> Result<Archive, Error> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            )));
        }
        Ok(Archive {
            backing: Backing::Directory {
                root: root.to_path_buf(),
            },
            archive_type: ArchiveType::ExplodedDirectory,
            path_from_root: String::new(),
            manifest_cache: Mutex::new(Weak::new()),
            manifest_fallback: None,
            unpack: UnpackDirectory::default(),
            closed: AtomicBool::new(false),
        })
    }

    fn parse_zip(
        root: Arc<FileSource>,
        data: DataBlock,
        path_from_root: String,
        archive_type: ArchiveType,
    ) -> Result<Archive, Error> {
        let mut index_builder = EntryIndexBuilder::default();
        let mut signed = SignedJarDetector::default();
        let mut parser = CentralDirectoryParser::new();
        parser.add_visitor(&mut index_builder);
        parser.add_visitor(&mut signed);
        let parsed = parser.parse(data, true)?;
        let index = index_builder.build(parsed.central_directory);
        debug!(
            path_from_root = %path_from_root,
            entries = index.len(),
            signed = signed.signed,
            "opened archive"
        );
        Ok(Archive {
            backing: Backing::Zip {
                root,
                data: parsed.data,
                index: Arc::new(index),
                prefix: String::new(),
                comment: parsed.eocd.comment().to_vec(),
                signed: signed.signed,
            },
            archive_type,
            path_from_root,
            manifest_cache: Mutex::new(Weak::new()),
            manifest_fallback: None,
            unpack: UnpackDirectory::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }

    pub fn is_exploded(&self) -> bool {
        self.archive_type == ArchiveType::ExplodedDirectory
    }

    /// `""` for the outer archive, otherwise the chain of `!/`-joined entry
    /// names leading here. Uniquely identifies this view within the root.
    pub fn path_from_root(&self) -> &str {
        &self.path_from_root
    }

    pub fn is_signed(&self) -> bool {
        match &self.backing {
            Backing::Zip { signed, .. } => *signed,
            Backing::Directory { .. } => false,
        }
    }

    /// The archive comment from the end of central directory record.
    pub fn comment(&self) -> Result<&[u8], Error> {
        self.ensure_open()?;
        match &self.backing {
            Backing::Zip { comment, .. } => Ok(comment),
            Backing::Directory { .. } => Ok(&[]),
        }
    }

    /// A URL addressing this archive view.
    pub fn url(&self) -> Result<ResourceUrl, Error> {
        match &self.backing {
            Backing::Zip { root, .. } => {
                let path = root
                    .path()
                    .ok_or_else(|| Error::malformed("in-memory archive has no URL"))?;
                Ok(ResourceUrl::Archive(CompositeUrl::archive_handle(
                    path,
                    &self.path_from_root,
                )?))
            }
            Backing::Directory { root } => ResourceUrl::for_directory(root),
        }
    }

    /// Every entry visible in this view, in central directory order for
    /// archive backings and in sorted walk order for exploded directories.
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>, Error> {
        self.ensure_open()?;
        match &self.backing {
            Backing::Zip { index, prefix, .. } => Ok(visible_entries(index, prefix)
                .map(|(entry, stripped)| ArchiveEntry {
                    name: stripped.to_owned(),
                    directory: entry.is_directory(),
                })
                .collect()),
            Backing::Directory { root } => {
                let mut out = Vec::new();
                walk_directory(root, root, &mut out)?;
                out.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(out)
            }
        }
    }

    /// Full central directory record for an entry. Exploded directories have
    /// no central directory, so this is always `None` for them.
    pub fn entry(&self, name: &str) -> Result<Option<Entry<'_>>, Error> {
        self.ensure_open()?;
        match &self.backing {
            Backing::Zip { index, prefix, .. } => {
                if prefix.is_empty() {
                    Ok(index.get(name))
                } else {
                    let entry = index.get(&format!("{prefix}{name}"));
                    Ok(entry.map(|entry| entry.strip_name_prefix(prefix)))
                }
            }
            Backing::Directory { .. } => Ok(None),
        }
    }

    pub fn contains_entry(&self, name: &str) -> Result<bool, Error> {
        self.ensure_open()?;
        match &self.backing {
            Backing::Zip { index, prefix, .. } => {
                if prefix.is_empty() {
                    Ok(index.contains(name))
                } else {
                    Ok(index.contains(&format!("{prefix}{name}")))
                }
            }
            Backing::Directory { root } => Ok(resolve_directory_entry(root, name)
                .map(|path| path.exists())
                .unwrap_or(false)),
        }
    }

    /// Stream the bytes of an entry. `None` when the entry is absent;
    /// dropping the reader leaves the archive open.
    pub fn input_stream(&self, name: &str) -> Result<Option<EntryReader>, Error> {
        self.ensure_open()?;
        match &self.backing {
            Backing::Zip { index, data, .. } => match self.entry(name)? {
                Some(entry) => Ok(Some(entry_reader(index, data, &entry)?)),
                None => Ok(None),
            },
            Backing::Directory { root } => match resolve_directory_entry(root, name) {
                Some(path) if path.is_file() => Ok(Some(EntryReader::File(
                    std::fs::File::open(path).map_err(Error::io)?,
                ))),
                _ => Ok(None),
            },
        }
    }

    /// The archive's manifest, or its parent's when this view inherits one.
    ///
    /// The parse result is held through a weak reference: once every caller
    /// drops its handle the manifest may be rebuilt, and concurrent callers
    /// always observe the same logical manifest.
    pub fn manifest(&self) -> Result<Option<Arc<Manifest>>, Error> {
        self.ensure_open()?;
        let mut cache = self.manifest_cache.lock().unwrap();
        if let Some(manifest) = cache.upgrade() {
            return Ok(Some(manifest));
        }
        let mut manifest = self.read_own_manifest()?;
        if manifest.is_none() {
            if let Some(fallback) = &self.manifest_fallback {
                manifest = fallback()?;
            }
        }
        if let Some(manifest) = &manifest {
            *cache = Arc::downgrade(manifest);
        }
        Ok(manifest)
    }

    fn read_own_manifest(&self) -> Result<Option<Arc<Manifest>>, Error> {
        match self.input_stream(MANIFEST_NAME)? {
            Some(reader) => Ok(Some(Arc::new(Manifest::read_from(reader)?))),
            None => Ok(None),
        }
    }

    /// One child archive per entry matching both filters, in entry order.
    /// `None` filters match everything.
    ///
    /// A child that cannot be constructed (for example a compressed nested
    /// archive) surfaces as an `Err` item without invalidating this archive
    /// or the remaining children.
    pub fn nested_archives<'a>(
        &'a self,
        search_filter: Option<EntryFilter<'a>>,
        include_filter: Option<EntryFilter<'a>>,
    ) -> Result<NestedArchives<'a>, Error> {
        let entries = self.entries()?;
        Ok(NestedArchives {
            archive: self,
            entries: entries.into_iter(),
            search_filter,
            include_filter,
        })
    }

    /// Construct the child archive for a single entry.
    pub fn nested_archive(&self, entry: &ArchiveEntry) -> Result<Archive, Error> {
        self.ensure_open()?;
        match &self.backing {
            Backing::Zip { .. } => {
                if entry.is_directory() {
                    self.nested_directory_view(entry.name())
                } else {
                    let rich = self.entry(entry.name())?.ok_or_else(|| {
                        Error::io(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("no entry named '{}'", entry.name()),
                        ))
                    })?;
                    if rich.comment().starts_with(UNPACK_MARKER) {
                        self.unpacked_nested_archive(entry.name(), &rich)
                    } else {
                        self.nested_jar(entry.name())
                    }
                }
            }
            Backing::Directory { root } => {
                let path = resolve_directory_entry(root, entry.name()).ok_or_else(|| {
                    Error::io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no entry named '{}'", entry.name()),
                    ))
                })?;
                if entry.is_directory() {
                    Archive::exploded(path)
                } else {
                    Archive::open(path)
                }
            }
        }
    }

    /// Descend into the nested archive a name denotes: a nested jar when
    /// the name matches a file entry, otherwise a directory view. This is
    /// the walk composite URLs take segment by segment.
    pub fn nested_archive_by_name(&self, name: &str) -> Result<Archive, Error> {
        self.ensure_open()?;
        if self.entry(name)?.is_some() {
            return self.nested_jar(name);
        }
        let directory = format!("{}/", name.trim_end_matches('/'));
        if self.entry(&directory)?.is_some() {
            return self.nested_directory_view(&directory);
        }
        Err(Error::io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no nested archive named '{name}'"),
        )))
    }

    fn nested_jar(&self, name: &str) -> Result<Archive, Error> {
        let Backing::Zip {
            root,
            data,
            index,
            prefix,
            ..
        } = &self.backing
        else {
            return Err(Error::malformed("nested jars require an archive backing"));
        };
        let full = format!("{prefix}{name}");
        let entry = index.get(&full).ok_or_else(|| {
            Error::io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no entry named '{name}'"),
            ))
        })?;
        let entry_data = index.nested_archive_data(data, &entry)?;
        let path_from_root = format!("{}{}{}", self.path_from_root, SEPARATOR, name);
        Archive::parse_zip(
            Arc::clone(root),
            entry_data,
            path_from_root,
            ArchiveType::NestedJar,
        )
    }

    /// A filtered view of this archive's entries under a directory prefix.
    /// No central directory is re-parsed; the parent's index is shared with
    /// the prefix stripped from every visible name.
    fn nested_directory_view(&self, name: &str) -> Result<Archive, Error> {
        let Backing::Zip {
            root,
            data,
            index,
            prefix,
            comment,
            signed,
        } = &self.backing
        else {
            return Err(Error::malformed(
                "nested directory views require an archive backing",
            ));
        };
        let dir_name: Cow<str> = if name.ends_with('/') {
            Cow::Borrowed(name)
        } else {
            Cow::Owned(format!("{name}/"))
        };
        let path_from_root = format!(
            "{}{}{}",
            self.path_from_root,
            SEPARATOR,
            dir_name.trim_end_matches('/')
        );
        Ok(Archive {
            backing: Backing::Zip {
                root: Arc::clone(root),
                data: data.clone(),
                index: Arc::clone(index),
                prefix: format!("{prefix}{dir_name}"),
                comment: comment.clone(),
                signed: *signed,
            },
            archive_type: ArchiveType::NestedDirectory,
            path_from_root,
            manifest_cache: Mutex::new(Weak::new()),
            manifest_fallback: self.manifest_supplier(),
            unpack: UnpackDirectory::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// A closure that resolves this archive's manifest later without the
    /// child holding a reference back to the parent. Only archive backings
    /// spawn inheriting children.
    fn manifest_supplier(&self) -> Option<ManifestSupplier> {
        let Backing::Zip {
            data,
            index,
            prefix,
            ..
        } = &self.backing
        else {
            return None;
        };
        let data = data.clone();
        let index = Arc::clone(index);
        let prefix = prefix.clone();
        let fallback = self.manifest_fallback.clone();
        Some(Arc::new(move || {
            let name = format!("{prefix}{MANIFEST_NAME}");
            if let Some(entry) = index.get(&name) {
                let reader = entry_reader(&index, &data, &entry)?;
                return Ok(Some(Arc::new(Manifest::read_from(reader)?)));
            }
            match &fallback {
                Some(fallback) => fallback(),
                None => Ok(None),
            }
        }))
    }

    fn unpacked_nested_archive(&self, name: &str, rich: &Entry<'_>) -> Result<Archive, Error> {
        let Backing::Zip { root, data, index, .. } = &self.backing else {
            return Err(Error::malformed("unpacking requires an archive backing"));
        };
        let archive_name = root
            .path()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_owned());
        let reader = entry_reader(index, data, rich)?;
        let unpacked = self
            .unpack
            .unpack(&archive_name, name, rich.size(), reader)?;
        Archive::open(unpacked)
    }

    /// Close this view. Closing a directly-opened archive releases the file
    /// and invalidates every derived view; closing a nested view only
    /// invalidates this handle. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.archive_type == ArchiveType::Direct {
            if let Backing::Zip { root, .. } = &self.backing {
                root.close();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::from(ErrorKind::Closed));
        }
        if let Backing::Zip { root, .. } = &self.backing {
            root.ensure_open()?;
        }
        Ok(())
    }
}

/// Iterator over the child archives of an [`Archive`], in entry order.
pub struct NestedArchives<'a> {
    archive: &'a Archive,
    entries: std::vec::IntoIter<ArchiveEntry>,
    search_filter: Option<EntryFilter<'a>>,
    include_filter: Option<EntryFilter<'a>>,
}

impl Iterator for NestedArchives<'_> {
    type Item = Result<Archive, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            let searched = self.search_filter.map(|f| f(&entry)).unwrap_or(true);
            let included = self.include_filter.map(|f| f(&entry)).unwrap_or(true);
            if searched && included {
                return Some(self.archive.nested_archive(&entry));
            }
        }
        None
    }
}

/// A byte stream over one entry.
pub enum EntryReader {
    Stored(DataReader),
    Deflated(Box<DeflateDecoder<DataReader>>),
    File(std::fs::File),
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            EntryReader::Stored(_) => "Stored",
            EntryReader::Deflated(_) => "Deflated",
            EntryReader::File(_) => "File",
        };
        f.debug_tuple(&format!("EntryReader::{variant}")).finish()
    }
}

impl std::io::Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            EntryReader::Stored(reader) => reader.read(buf),
            EntryReader::Deflated(reader) => reader.read(buf),
            EntryReader::File(reader) => reader.read(buf),
        }
    }
}

fn entry_reader(
    index: &EntryIndex,
    data: &DataBlock,
    entry: &Entry<'_>,
) -> Result<EntryReader, Error> {
    let payload = index.entry_payload(data, entry)?;
    match entry.method() {
        CompressionMethod::Stored => Ok(EntryReader::Stored(payload.reader())),
        CompressionMethod::Deflated => Ok(EntryReader::Deflated(Box::new(DeflateDecoder::new(
            payload.reader(),
        )))),
        CompressionMethod::Unknown(_) => Err(Error::malformed("unsupported compression method")),
    }
}

/// Entries visible through a directory-prefix view, names stripped. The
/// prefix entry itself is not visible.
fn visible_entries<'a>(
    index: &'a EntryIndex,
    prefix: &'a str,
) -> impl Iterator<Item = (Entry<'a>, &'a str)> {
    index.iter().filter_map(move |entry| {
        let stripped = entry.name().strip_prefix(prefix)?;
        if stripped.is_empty() {
            return None;
        }
        Some((entry, stripped))
    })
}

/// Resolve an entry name against an exploded root, rejecting anything that
/// would escape it.
fn resolve_directory_entry(root: &Path, name: &str) -> Option<PathBuf> {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let mut path = root.to_path_buf();
    for part in trimmed.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return None;
        }
        path.push(part);
    }
    Some(path)
}

fn walk_directory(root: &Path, dir: &Path, out: &mut Vec<ArchiveEntry>) -> Result<(), Error> {
    for entry in std::fs::read_dir(dir).map_err(Error::io)? {
        let entry = entry.map_err(Error::io)?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let mut name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file_type = entry.file_type().map_err(Error::io)?;
        if file_type.is_dir() {
            name.push('/');
            out.push(ArchiveEntry {
                name,
                directory: true,
            });
            walk_directory(root, &path, out)?;
        } else if file_type.is_file() {
            out.push(ArchiveEntry {
                name,
                directory: false,
            });
        }
    }
    Ok(())
}
