//! Append-only byte logs.
//!
//! A log is an opaque byte sequence the document store appends revision
//! records to and replays on open. Record framing is owned by the caller.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{StorageError, StorageResult};

/// An append-only byte log.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously appended there
/// - after `sync` returns, appended bytes survive process termination
pub trait LogBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the range extends beyond
    /// the log, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data`, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Current size in bytes; the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything after `new_size`. Used to cut a torn tail.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is beyond the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

/// Log kept in a `Vec`. Contents die with the value.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLog {
    data: Vec<u8>,
}

impl InMemoryLog {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A log pre-filled with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Copy of the contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

fn check_range(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    let end = offset.saturating_add(len as u64);
    if offset > size || end > size {
        return Err(StorageError::ReadPastEnd { offset, len, size });
    }
    Ok(())
}

fn check_truncate(new_size: u64, size: u64) -> StorageResult<()> {
    if new_size > size {
        return Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cannot truncate to {new_size}, log holds {size} bytes"),
        )));
    }
    Ok(())
}

impl LogBackend for InMemoryLog {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.data.len() as u64)?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(data);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        check_truncate(new_size, self.data.len() as u64)?;
        self.data.truncate(new_size as usize);
        Ok(())
    }
}

/// Log in a single file, held under an exclusive advisory lock.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileLog {
    /// Opens (creating if needed) the log at `path`, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPath`] if `path` is a directory,
    /// [`StorageError::Locked`] if another process holds the log.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if path.is_dir() {
            return Err(StorageError::InvalidPath(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.to_path_buf()));
        }
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogBackend for FileLog {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.size)?;
        let mut buffer = vec![0u8; len];
        if len == 0 {
            return Ok(buffer);
        }
        // `&File` implements Read + Seek, so reads need no exclusive borrow.
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        check_truncate(new_size, self.size)?;
        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_append_and_read() {
        let mut log = InMemoryLog::new();
        assert_eq!(log.append(b"hello").unwrap(), 0);
        assert_eq!(log.append(b" world").unwrap(), 5);
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.read_at(6, 5).unwrap(), b"world");
        assert!(matches!(
            log.read_at(8, 5),
            Err(StorageError::ReadPastEnd { size: 11, .. })
        ));
    }

    #[test]
    fn memory_truncate() {
        let mut log = InMemoryLog::with_data(b"abcdef".to_vec());
        log.truncate(2).unwrap();
        assert_eq!(log.data(), b"ab");
        assert!(log.truncate(10).is_err());
    }

    #[test]
    fn file_contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("revisions.log");
        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"first").unwrap();
            log.append(b"second").unwrap();
            log.sync().unwrap();
        }
        let mut log = FileLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.read_at(5, 6).unwrap(), b"second");
        assert_eq!(log.append(b"!").unwrap(), 11);
    }

    #[test]
    fn file_truncate_cuts_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revisions.log");
        {
            let mut log = FileLog::open(&path).unwrap();
            log.append(b"keep-torn").unwrap();
            log.truncate(4).unwrap();
        }
        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.read_at(0, 4).unwrap(), b"keep");
        assert_eq!(log.size().unwrap(), 4);
    }

    #[test]
    fn file_is_single_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revisions.log");
        let _held = FileLog::open(&path).unwrap();
        assert!(matches!(FileLog::open(&path), Err(StorageError::Locked(_))));
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FileLog::open(dir.path()),
            Err(StorageError::InvalidPath(_))
        ));
    }
}
