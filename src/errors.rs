/// The error type for archive parsing and resolution operations.
#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

impl Error {
    pub(crate) fn io(err: std::io::Error) -> Error {
        Error::from(ErrorKind::Io(err))
    }

    pub(crate) fn utf8(err: std::str::Utf8Error) -> Error {
        Error::from(ErrorKind::InvalidUtf8(err))
    }

    pub(crate) fn malformed(field: &'static str) -> Error {
        Error::from(ErrorKind::Malformed { field })
    }

    pub(crate) fn nested_entry_compressed(name: &str) -> Error {
        Error::from(ErrorKind::NestedEntryCompressed {
            name: name.to_owned(),
        })
    }

    /// The kind of failure behind this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
}

/// Classifies every failure this crate can report.
///
/// Absent resources are never errors: lookup operations signal them with
/// `None` and reserve this type for structural and I/O failures.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No end-of-central-directory record within the format-permitted range.
    NotAZipArchive,
    /// A signature did not match the structure being parsed.
    InvalidSignature { expected: u32, actual: u32 },
    /// A field's bytes contradict another part of the archive.
    Malformed { field: &'static str },
    /// A read reached end-of-data before the requested range was satisfied.
    Truncated,
    /// An inner archive entry is stored with compression. Only uncompressed
    /// entries can be viewed in place as nested archives.
    NestedEntryCompressed { name: String },
    /// An entry name is not valid UTF-8.
    InvalidUtf8(std::str::Utf8Error),
    /// Underlying filesystem error.
    Io(std::io::Error),
    /// Operation attempted on a closed archive view.
    Closed,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.inner.kind {
            ErrorKind::Io(err) => Some(err),
            ErrorKind::InvalidUtf8(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.inner.kind)?;
        Ok(())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ErrorKind::NotAZipArchive => {
                write!(f, "Unable to find ZIP end of central directory record")
            }
            ErrorKind::InvalidSignature { expected, actual } => {
                write!(
                    f,
                    "Invalid signature: expected 0x{:08x}, got 0x{:08x}",
                    expected, actual
                )
            }
            ErrorKind::Malformed { field } => {
                write!(f, "Malformed archive structure: {}", field)
            }
            ErrorKind::Truncated => {
                write!(f, "Unexpected end of data")
            }
            ErrorKind::NestedEntryCompressed { ref name } => {
                write!(
                    f,
                    "Unable to open nested entry '{}'. It has been compressed and nested \
                     archives must be stored without compression",
                    name
                )
            }
            ErrorKind::InvalidUtf8(ref err) => {
                write!(f, "Invalid UTF-8: {}", err)
            }
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Closed => {
                write!(f, "Archive has been closed")
            }
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: ErrorInner { kind },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::io(err)
    }
}
