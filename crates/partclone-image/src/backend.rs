use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::util::{checked_range, usize_from};
use crate::{ImageError, Result};

/// Read-only, byte-addressed random-access provider backing an image.
///
/// Methods take `&self` so a single backend can serve concurrent readers. Implementations own
/// their concurrency discipline; the session never locks around them.
pub trait ImageBackend: Send + Sync {
    /// Current length in bytes. May grow between calls for images that are still being written.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fill `buf` from `offset`. Reads past the end fail with [`ImageError::OutOfBounds`].
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<T: ImageBackend + ?Sized> ImageBackend for &T {
    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }
}

impl<T: ImageBackend + ?Sized> ImageBackend for Arc<T> {
    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }
}

impl<T: ImageBackend + ?Sized> ImageBackend for Box<T> {
    fn len(&self) -> Result<u64> {
        (**self).len()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }
}

/// In-memory image, mostly for tests and for images that were fetched whole.
#[derive(Debug, Clone, Default)]
pub struct MemBackend {
    data: Bytes,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn from_bytes(data: Bytes) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl ImageBackend for MemBackend {
    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_range(offset, buf.len(), self.data.len() as u64)?;
        let start = usize_from(offset)?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}

/// `std::fs::File` backend using positional reads.
///
/// On Unix and Windows reads never touch the shared file cursor, so concurrent callers need no
/// lock. Other targets fall back to a mutex-guarded seek + read.
#[derive(Debug)]
pub struct StdFileBackend {
    #[cfg(any(unix, windows))]
    file: File,
    #[cfg(not(any(unix, windows)))]
    file: std::sync::Mutex<File>,
}

impl StdFileBackend {
    pub fn from_file(file: File) -> Self {
        Self {
            #[cfg(any(unix, windows))]
            file,
            #[cfg(not(any(unix, windows)))]
            file: std::sync::Mutex::new(file),
        }
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_file(file))
    }

    pub fn into_file(self) -> File {
        #[cfg(any(unix, windows))]
        {
            self.file
        }
        #[cfg(not(any(unix, windows)))]
        {
            self.file
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    #[cfg(unix)]
    fn pread(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn pread(&self, mut offset: u64, mut buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset) {
                Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    let rest = buf;
                    buf = &mut rest[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn pread(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn metadata_len(&self) -> std::io::Result<u64> {
        #[cfg(any(unix, windows))]
        {
            Ok(self.file.metadata()?.len())
        }
        #[cfg(not(any(unix, windows)))]
        {
            let file = self
                .file
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(file.metadata()?.len())
        }
    }
}

impl ImageBackend for StdFileBackend {
    fn len(&self) -> Result<u64> {
        Ok(self.metadata_len()?)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        offset
            .checked_add(buf.len() as u64)
            .ok_or(ImageError::OffsetOverflow)?;
        if buf.is_empty() {
            return Ok(());
        }
        match self.pread(offset, buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ImageError::OutOfBounds {
                    offset,
                    len: buf.len(),
                    capacity: self.len()?,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backend_reads_and_bounds() {
        let backend = MemBackend::from_vec((0u8..16).collect());
        assert_eq!(backend.len().unwrap(), 16);

        let mut buf = [0u8; 4];
        backend.read_at(12, &mut buf).unwrap();
        assert_eq!(buf, [12, 13, 14, 15]);

        let err = backend.read_at(13, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            ImageError::OutOfBounds {
                offset: 13,
                len: 4,
                capacity: 16
            }
        ));
    }

    #[test]
    fn arc_backend_forwards() {
        let backend = Arc::new(MemBackend::from_vec(vec![7u8; 8]));
        let shared: &dyn ImageBackend = &backend;
        let mut buf = [0u8; 2];
        shared.read_at(6, &mut buf).unwrap();
        assert_eq!(buf, [7, 7]);
        assert!(!shared.is_empty().unwrap());
    }
}
