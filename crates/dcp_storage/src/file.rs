//! File-based storage backend for layered checkpoint files.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Consecutive stalled (zero-progress or interrupted) writes tolerated
/// before an append is reported as failed.
pub const MAX_WRITE_ATTEMPTS: u32 = 16;

/// A file-based storage backend.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` additionally calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use dcp_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("dcp-id0-rank0.fti")).unwrap();
/// backend.append(b"layer zero").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file, keeping existing content.
    ///
    /// Appends go to the end of the existing data.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Creates a file, truncating any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Opens an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes all of `data`, retrying stalled writes up to [`MAX_WRITE_ATTEMPTS`]
/// consecutive times.
pub(crate) fn write_with_retry<W: Write>(writer: &mut W, data: &[u8]) -> StorageResult<()> {
    let mut written = 0;
    let mut stalled = 0u32;

    while written < data.len() {
        match writer.write(&data[written..]) {
            Ok(0) => stalled += 1,
            Ok(n) => {
                written += n;
                stalled = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => stalled += 1,
            Err(e) => return Err(StorageError::Io(e)),
        }

        if stalled >= MAX_WRITE_ATTEMPTS {
            return Err(StorageError::ShortWrite {
                written,
                expected: data.len(),
                attempts: stalled,
            });
        }
    }

    Ok(())
}

impl StorageBackend for FileBackend {
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let size = *self.size.read();
        let len = buf.len();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        write_with_retry(&mut *file, data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {new_size} which is greater than current size {}",
                    *size
                ),
            )));
        }

        file.set_len(new_size)?;
        *size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Writer that stalls a fixed number of times before accepting bytes.
    struct StallingWriter {
        stalls_left: u32,
        interrupt: bool,
        accepted: Vec<u8>,
    }

    impl Write for StallingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stalls_left > 0 {
                self.stalls_left -= 1;
                if self.interrupt {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
                }
                return Ok(0);
            }
            // Accept at most two bytes per call to exercise partial writes.
            let n = buf.len().min(2);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn file_create_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dcp-id0-rank0.fti");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"old layer").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::create(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn file_open_appends_after_existing_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layers.fti");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"base").unwrap();
            backend.sync().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        let offset = backend.append(b"delta").unwrap();
        assert_eq!(offset, 4);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"basedelta");
    }

    #[test]
    fn file_read_into_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layers.fti");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"hello world").unwrap();

        let mut buf = [0u8; 5];
        backend.read_into(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layers.fti");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_read_only_missing_fails() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_read_only(&dir.path().join("missing.fti"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layers.fti");

        {
            let mut backend = FileBackend::create(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn file_truncate_discards_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layers.fti");

        let mut backend = FileBackend::create(&path).unwrap();
        backend.append(b"committed").unwrap();
        backend.append(b"partial").unwrap();
        backend.truncate(9).unwrap();

        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.append(b"!").unwrap(), 9);
        assert!(backend.truncate(100).is_err());
    }

    #[test]
    fn retry_recovers_from_transient_stalls() {
        let mut writer = StallingWriter {
            stalls_left: 3,
            interrupt: true,
            accepted: Vec::new(),
        };
        write_with_retry(&mut writer, b"header").unwrap();
        assert_eq!(writer.accepted, b"header");
    }

    #[test]
    fn retry_gives_up_after_bound() {
        let mut writer = StallingWriter {
            stalls_left: MAX_WRITE_ATTEMPTS,
            interrupt: false,
            accepted: Vec::new(),
        };
        let result = write_with_retry(&mut writer, b"header");
        assert!(matches!(
            result,
            Err(StorageError::ShortWrite {
                written: 0,
                expected: 6,
                ..
            })
        ));
    }
}
