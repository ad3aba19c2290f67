use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::TransferError;

/// A byte source that can be uploaded in chunks.
///
/// Slicing must be free of side effects and safe to call from several
/// workers at once.
pub trait UploadFile: Send + Sync {
    /// File name reported to the service.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Reads exactly the bytes in `range`.
    fn slice(&self, range: Range<u64>) -> io::Result<Bytes>;
}

/// A file on the local filesystem.
///
/// The size is captured when the file is opened; every slice reopens the
/// file so concurrent reads never share a cursor.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
}

impl LocalFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!(file = %name, size = metadata.len(), "opened upload file");
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UploadFile for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn slice(&self, range: Range<u64>) -> io::Result<Bytes> {
        if range.end > self.size || range.start > range.end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {range:?} outside file of {} bytes", self.size),
            ));
        }
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// An in-memory file.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl UploadFile for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn slice(&self, range: Range<u64>) -> io::Result<Bytes> {
        if range.end > self.size() || range.start > range.end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {range:?} outside file of {} bytes", self.size()),
            ));
        }
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{chunk_byte_range, total_blocks};
    use tempfile::TempDir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn local_file_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.apk");
        std::fs::write(&path, pattern(250)).unwrap();

        let file = LocalFile::open(&path).unwrap();
        assert_eq!(file.name(), "app.apk");
        assert_eq!(file.size(), 250);
        assert_eq!(file.path(), path);
    }

    #[test]
    fn local_file_slices_reassemble() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        let data = pattern(1000);
        std::fs::write(&path, &data).unwrap();

        let file = LocalFile::open(&path).unwrap();
        let mut rebuilt = Vec::new();
        for n in 1..=total_blocks(file.size(), 300).unwrap() {
            let range = chunk_byte_range(n, 300, file.size());
            rebuilt.extend_from_slice(&file.slice(range).unwrap());
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn local_file_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, b"abc").unwrap();

        let file = LocalFile::open(&path).unwrap();
        assert!(file.slice(0..4).is_err());
    }

    #[test]
    fn local_file_missing_path() {
        let dir = TempDir::new().unwrap();
        let err = LocalFile::open(dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn local_file_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let err = LocalFile::open(dir.path()).unwrap_err();
        assert!(matches!(err, TransferError::NotAFile(_)));
    }

    #[test]
    fn memory_file_slices() {
        let file = MemoryFile::new("m.bin", pattern(10));
        assert_eq!(file.size(), 10);
        assert_eq!(&file.slice(2..5).unwrap()[..], &[2, 3, 4]);
        assert!(file.slice(8..11).is_err());
    }
}
