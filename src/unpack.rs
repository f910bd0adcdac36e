use crate::errors::Error;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Entries whose central directory comment starts with this marker cannot be
/// used in place (typically because a library insists on a real file) and are
/// extracted to a process-scoped temp directory instead.
pub(crate) const UNPACK_MARKER: &[u8] = b"UNPACK:";

const BUFFER_SIZE: usize = 32 * 1024;

/// Lazily-created unpack target, shared by every entry of one archive so the
/// UUID-suffixed directory is only minted once per process.
#[derive(Default)]
pub(crate) struct UnpackDirectory {
    path: Mutex<Option<PathBuf>>,
}

impl UnpackDirectory {
    /// Extract `reader` to `<tmp>/<archive-stem>-libs-<uuid>/<entry-stem>`,
    /// reusing a previous extraction when the size already matches.
    pub(crate) fn unpack(
        &self,
        archive_name: &str,
        entry_name: &str,
        expected_size: u64,
        mut reader: impl Read,
    ) -> Result<PathBuf, Error> {
        let file_name = entry_name.rsplit('/').next().unwrap_or(entry_name);
        let target = self.directory(archive_name)?.join(file_name);
        let reusable = match std::fs::metadata(&target) {
            Ok(metadata) => metadata.len() == expected_size,
            Err(_) => false,
        };
        if reusable {
            return Ok(target);
        }

        debug!(entry = entry_name, target = %target.display(), "unpacking nested entry");
        let mut file = create_private_file(&target)?;
        let mut buffer = [0u8; BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer).map_err(Error::io)?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read]).map_err(Error::io)?;
        }
        file.flush().map_err(Error::io)?;
        Ok(target)
    }

    fn directory(&self, archive_name: &str) -> Result<PathBuf, Error> {
        let mut cached = self.path.lock().unwrap();
        if let Some(path) = cached.as_ref() {
            return Ok(path.clone());
        }
        let stem = Path::new(archive_name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_owned());
        let directory = std::env::temp_dir().join(format!("{}-libs-{}", stem, Uuid::new_v4()));
        create_private_dir(&directory)?;
        *cached = Some(directory.clone());
        Ok(directory)
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .mode(0o700)
        .create(path)
        .map_err(Error::io)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<(), Error> {
    std::fs::create_dir(path).map_err(Error::io)
}

#[cfg(unix)]
fn create_private_file(path: &Path) -> Result<std::fs::File, Error> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(Error::io)
}

#[cfg(not(unix))]
fn create_private_file(path: &Path) -> Result<std::fs::File, Error> {
    std::fs::File::create(path).map_err(Error::io)
}
