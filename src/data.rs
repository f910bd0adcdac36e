use crate::errors::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Provides reading bytes at a specific offset.
///
/// This trait is similar to [`std::io::Read`] but with an additional offset
/// parameter that signals where the read should begin offset from the start
/// of the data. Reads take `&self`, which lets any number of archive views
/// stream entries concurrently from one shared file handle.
pub trait ReaderAt {
    /// Read bytes from the reader at a specific offset
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;

    /// Sibling to [`read_exact`](std::io::Read::read_exact), but at an offset
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let mut read = 0;
        while read < buf.len() {
            let latest = self.read_at(&mut buf[read..], offset + (read as u64))?;
            if latest == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            read += latest;
        }
        Ok(())
    }
}

impl<T: ReaderAt> ReaderAt for &'_ T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        (*self).read_at(buf, offset)
    }
}

impl ReaderAt for &[u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let skip = self.len().min(offset as usize);
        let data = &self[skip..];
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}

#[cfg(unix)]
struct FileBacking(std::fs::File);

#[cfg(unix)]
impl ReaderAt for FileBacking {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.0.read_at(buf, offset)
    }
}

/// On platforms without positional reads the file position is process
/// global, so reads emulate `pread` with a seek inside a mutex. This is how
/// Go backs `io.ReaderAt` for files on Windows.
#[cfg(not(unix))]
struct FileBacking(std::sync::Mutex<std::fs::File>);

#[cfg(not(unix))]
impl ReaderAt for FileBacking {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::io::{Read, Seek};
        let mut lock = self.0.lock().unwrap();
        let original_position = lock.stream_position()?;
        lock.seek(std::io::SeekFrom::Start(offset))?;
        let result = lock.read(buf);
        lock.seek(std::io::SeekFrom::Start(original_position))?;
        result
    }
}

enum Backing {
    File(FileBacking),
    Memory(Vec<u8>),
}

/// The shared root of every view derived from one archive file.
///
/// All [`DataBlock`] views rooted in the same file alias this source through
/// an [`Arc`]; the file handle stays open while any view is live. Closing the
/// source flips a flag that every subsequent read observes, so views derived
/// from a closed root fail with a definite error instead of reading a stale
/// descriptor.
pub struct FileSource {
    backing: Backing,
    path: Option<PathBuf>,
    size: u64,
    closed: AtomicBool,
}

impl FileSource {
    /// Open the file and take its current length as the fixed source size.
    /// The path is absolutized so derived URLs are stable regardless of the
    /// working directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<FileSource>, Error> {
        let path = std::path::absolute(path).map_err(Error::io)?;
        let file = std::fs::File::open(&path).map_err(Error::io)?;
        let size = file.metadata().map_err(Error::io)?.len();
        Ok(Arc::new(FileSource {
            #[cfg(unix)]
            backing: Backing::File(FileBacking(file)),
            #[cfg(not(unix))]
            backing: Backing::File(FileBacking(std::sync::Mutex::new(file))),
            path: Some(path),
            size,
            closed: AtomicBool::new(false),
        }))
    }

    /// An in-memory source, mostly useful for archives that were unpacked or
    /// generated rather than read from disk.
    pub fn from_bytes(bytes: Vec<u8>) -> Arc<FileSource> {
        let size = bytes.len() as u64;
        Arc::new(FileSource {
            backing: Backing::Memory(bytes),
            path: None,
            size,
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Invalidate every view rooted in this source. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::from(ErrorKind::Closed));
        }
        Ok(())
    }
}

impl ReaderAt for FileSource {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        match &self.backing {
            Backing::File(file) => file.read_at(buf, offset),
            Backing::Memory(bytes) => bytes.as_slice().read_at(buf, offset),
        }
    }
}

/// A view over the contiguous byte range `[start, start + len)` of a shared
/// [`FileSource`].
///
/// Sub-ranges are views, never copies: a block derived from another block
/// shares the same source and simply narrows the window. The length is fixed
/// at construction.
#[derive(Clone)]
pub struct DataBlock {
    source: Arc<FileSource>,
    start: u64,
    len: u64,
}

impl std::fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBlock")
            .field("start", &self.start)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl DataBlock {
    /// A view spanning the entire source.
    pub fn whole(source: Arc<FileSource>) -> DataBlock {
        let len = source.size();
        DataBlock {
            source,
            start: 0,
            len,
        }
    }

    pub fn size(&self) -> u64 {
        self.len
    }

    /// Offset of this view within the root source.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn source(&self) -> &Arc<FileSource> {
        &self.source
    }

    /// Narrow to `[offset, offset + len)` within this view.
    pub fn subsection(&self, offset: u64, len: u64) -> Result<DataBlock, Error> {
        let end = offset.checked_add(len).ok_or(ErrorKind::Truncated)?;
        if end > self.len {
            return Err(Error::from(ErrorKind::Truncated));
        }
        Ok(DataBlock {
            source: Arc::clone(&self.source),
            start: self.start + offset,
            len,
        })
    }

    /// Read exactly `buf.len()` bytes starting at `offset` within the view.
    pub fn read_into(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        self.source.ensure_open()?;
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(ErrorKind::Truncated)?;
        if end > self.len {
            return Err(Error::from(ErrorKind::Truncated));
        }
        self.source
            .read_exact_at(buf, self.start + offset)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::from(ErrorKind::Truncated),
                _ => Error::io(e),
            })
    }

    /// Read exactly `len` bytes starting at `offset` within the view.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf, offset)?;
        Ok(buf)
    }

    /// A sequential reader over the whole view.
    pub fn reader(&self) -> DataReader {
        DataReader {
            block: self.clone(),
            pos: 0,
        }
    }
}

/// Sequential [`Read`](std::io::Read) adapter over a [`DataBlock`].
///
/// Dropping the reader never affects the archive it came from.
pub struct DataReader {
    block: DataBlock,
    pos: u64,
}

impl std::io::Read for DataReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.block.source.is_closed() {
            return Err(std::io::Error::other("archive has been closed"));
        }
        let remaining = self.block.len - self.pos;
        let read_size = buf.len().min(remaining as usize);
        if read_size == 0 {
            return Ok(0);
        }
        let read = self
            .block
            .source
            .read_at(&mut buf[..read_size], self.block.start + self.pos)?;
        self.pos += read as u64;
        Ok(read)
    }
}
