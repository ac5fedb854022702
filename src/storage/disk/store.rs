use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Byte-addressable persistent store. The page manager's only dependency
/// on the outside world.
pub trait PageStore: Send + Debug {
    /// Fills `buf` from `offset`. Reading past the end is an error.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Writes `buf` at `offset`, growing the store if necessary.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()>;

    fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;

    fn sync(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()> {
        self.sync()
    }
}

#[derive(Debug)]
pub struct FileStore {
    file: File,
    path: PathBuf,
}

impl FileStore {
    /// Creates a new, empty file, truncating any existing one.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens the file at `path`, creating it and its parent directories
    /// if it does not exist yet.
    pub fn open_or_create(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageStore for FileStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// In-memory store, used for tests and scratch page managers.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl PageStore for MemoryStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of [{}, {}) past end {}", start, end, self.bytes.len()),
            ));
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.bytes.resize(size as usize, 0);
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_read_write() -> io::Result<()> {
        let dir = tempdir()?;
        let mut store = FileStore::create(&dir.path().join("test.db"))?;

        store.write_at(b"hello", 10)?;
        assert_eq!(store.size()?, 15);

        let mut buf = [0u8; 5];
        store.read_at(&mut buf, 10)?;
        assert_eq!(&buf, b"hello");

        // Gap before the write reads back as zeros
        let mut gap = [1u8; 10];
        store.read_at(&mut gap, 0)?;
        assert_eq!(gap, [0u8; 10]);

        Ok(())
    }

    #[test]
    fn test_file_store_read_past_end() -> io::Result<()> {
        let dir = tempdir()?;
        let mut store = FileStore::create(&dir.path().join("test.db"))?;
        store.write_at(b"abc", 0)?;

        let mut buf = [0u8; 8];
        assert!(store.read_at(&mut buf, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_file_store_truncate() -> io::Result<()> {
        let dir = tempdir()?;
        let mut store = FileStore::create(&dir.path().join("test.db"))?;
        store.write_at(&[7u8; 100], 0)?;
        store.truncate(40)?;
        assert_eq!(store.size()?, 40);
        store.close()?;
        Ok(())
    }

    #[test]
    fn test_file_store_open_or_create() -> io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("pages.db");
        assert!(FileStore::open(&path).is_err());

        {
            let mut store = FileStore::open_or_create(&path)?;
            store.write_at(b"persisted", 0)?;
            store.sync()?;
        }

        let mut store = FileStore::open_or_create(&path)?;
        let mut buf = [0u8; 9];
        store.read_at(&mut buf, 0)?;
        assert_eq!(&buf, b"persisted");
        assert_eq!(store.path(), path.as_path());
        Ok(())
    }

    #[test]
    fn test_memory_store() -> io::Result<()> {
        let mut store = MemoryStore::new();
        store.write_at(b"data", 4)?;
        assert_eq!(store.size()?, 8);

        let mut buf = [0u8; 4];
        store.read_at(&mut buf, 4)?;
        assert_eq!(&buf, b"data");

        let err = store.read_at(&mut buf, 6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        store.truncate(2)?;
        assert_eq!(store.into_bytes(), vec![0, 0]);
        Ok(())
    }
}
