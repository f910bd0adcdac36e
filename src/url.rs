use crate::archive::{Archive, EntryReader};
use crate::errors::Error;
use once_cell::sync::OnceCell;
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use url::Url;

pub(crate) const SEPARATOR: &str = "!/";
const SCHEME_PREFIX: &str = "jar:";

/// A URL addressing an archive view or a single entry through any nesting
/// depth: `jar:<file-url>!/<segment>(!/<segment>)*`.
///
/// Segments may contain `/` but never the `!/` separator; a trailing `!/`
/// (an empty final segment) denotes the archive itself rather than an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeUrl {
    root: Url,
    segments: Vec<String>,
}

impl CompositeUrl {
    /// Parse the composite grammar. The root file URL is canonicalised so
    /// that `file:////` (UNC spelling) becomes `file://`.
    pub fn parse(input: &str) -> Result<CompositeUrl, Error> {
        let rest = input
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| Error::malformed("composite URL must use the jar: scheme"))?;
        let mut pieces = rest.split(SEPARATOR);
        let root = pieces.next().unwrap_or_default();
        if root.is_empty() {
            return Err(Error::malformed("composite URL has no root URL"));
        }
        let root = normalize_unc(root);
        let root = Url::parse(&root)
            .map_err(|_| Error::malformed("composite URL root is not a valid URL"))?;
        let segments: Vec<String> = pieces.map(ToOwned::to_owned).collect();
        if segments.is_empty() {
            return Err(Error::malformed("composite URL requires a '!/' separator"));
        }
        if segments[..segments.len() - 1]
            .iter()
            .any(|segment| segment.is_empty())
        {
            return Err(Error::malformed(
                "composite URL has an empty non-terminal segment",
            ));
        }
        Ok(CompositeUrl { root, segments })
    }

    /// The URL of the archive itself at `path_from_root` within the file at
    /// `path`: `jar:<file-url><path-from-root>!/`.
    pub(crate) fn archive_handle(
        path: &Path,
        path_from_root: &str,
    ) -> Result<CompositeUrl, Error> {
        let root = file_url(path)?;
        let mut segments: Vec<String> = path_from_root
            .split(SEPARATOR)
            .skip(1)
            .map(ToOwned::to_owned)
            .collect();
        segments.push(String::new());
        Ok(CompositeUrl { root, segments })
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this URL denotes an archive (trailing `!/`) rather than an
    /// entry.
    pub fn is_archive_handle(&self) -> bool {
        self.segments.last().is_some_and(String::is_empty)
    }

    /// Address an entry within the archive this URL denotes.
    pub fn join_entry(&self, name: &str) -> CompositeUrl {
        let mut segments = self.segments.clone();
        if segments.last().is_some_and(String::is_empty) {
            segments.pop();
        }
        segments.push(name.to_owned());
        CompositeUrl {
            root: self.root.clone(),
            segments,
        }
    }

    /// Open what the URL addresses: walk the segments left to right,
    /// descending into nested archives, and yield either the final archive
    /// (for a trailing `!/`) or a byte stream over the final entry.
    pub fn open(&self) -> Result<UrlContent, Error> {
        let path = self
            .root
            .to_file_path()
            .map_err(|_| Error::malformed("composite URL root is not a file URL"))?;
        let mut archive = Archive::open(path)?;
        let count = self.segments.len();
        for (position, segment) in self.segments.iter().enumerate() {
            if segment.is_empty() {
                return Ok(UrlContent::Archive(archive));
            }
            if position + 1 == count {
                return match archive.input_stream(segment)? {
                    Some(stream) => Ok(UrlContent::Stream(stream)),
                    // A terminal segment may name a nested archive without
                    // the trailing separator.
                    None => archive
                        .nested_archive_by_name(segment)
                        .map(UrlContent::Archive),
                };
            }
            archive = archive.nested_archive_by_name(segment)?;
        }
        Ok(UrlContent::Archive(archive))
    }
}

impl fmt::Display for CompositeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME_PREFIX, self.root)?;
        for segment in &self.segments {
            write!(f, "{}{}", SEPARATOR, segment)?;
        }
        Ok(())
    }
}

/// What opening a URL produced.
pub enum UrlContent {
    Archive(Archive),
    Stream(EntryReader),
}

/// A resolved classpath location: either an archive view addressed by a
/// composite URL or a plain filesystem URL from an exploded layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUrl {
    Archive(CompositeUrl),
    File(Url),
}

impl ResourceUrl {
    pub(crate) fn for_directory(path: &Path) -> Result<ResourceUrl, Error> {
        Url::from_directory_path(path)
            .map(ResourceUrl::File)
            .map_err(|_| Error::malformed("directory path is not absolute"))
    }

    pub fn as_archive(&self) -> Option<&CompositeUrl> {
        match self {
            ResourceUrl::Archive(url) => Some(url),
            ResourceUrl::File(_) => None,
        }
    }

    pub fn open(&self) -> Result<UrlContent, Error> {
        match self {
            ResourceUrl::Archive(url) => url.open(),
            ResourceUrl::File(url) => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::malformed("resource URL is not a file URL"))?;
                if path.is_dir() {
                    Ok(UrlContent::Archive(Archive::exploded(path)?))
                } else {
                    let file = std::fs::File::open(path).map_err(Error::io)?;
                    Ok(UrlContent::Stream(EntryReader::File(file)))
                }
            }
        }
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUrl::Archive(url) => url.fmt(f),
            ResourceUrl::File(url) => url.fmt(f),
        }
    }
}

fn file_url(path: &Path) -> Result<Url, Error> {
    Url::from_file_path(path).map_err(|_| Error::malformed("archive path is not absolute"))
}

fn normalize_unc(root: &str) -> Cow<'_, str> {
    match root.strip_prefix("file:////") {
        Some(rest) => Cow::Owned(format!("file://{rest}")),
        None => Cow::Borrowed(root),
    }
}

static URL_STREAM_HANDLER: OnceCell<UrlStreamHandler> = OnceCell::new();

/// Process-wide stream handler for the composite scheme.
///
/// Obtained through [`register_url_stream_handler`]; there is exactly one
/// per process.
pub struct UrlStreamHandler {
    _private: (),
}

impl UrlStreamHandler {
    /// Parse and open a composite URL string.
    pub fn open(&self, url: &str) -> Result<UrlContent, Error> {
        CompositeUrl::parse(url)?.open()
    }
}

/// Register the composite scheme with the process URL machinery. Idempotent:
/// calling this any number of times has the effect of calling it once, and
/// every call returns the same handler.
pub fn register_url_stream_handler() -> &'static UrlStreamHandler {
    URL_STREAM_HANDLER.get_or_init(|| UrlStreamHandler { _private: () })
}
