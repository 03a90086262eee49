//! The backing store (C1): random-access byte I/O over a fixed-length, memory-mapped file.
//!
//! [`BackingStore`] is the narrow trait every other component reads and writes through. The
//! production implementation, [`MmapStore`], maps the whole file into the process once at
//! [`MmapStore::open`] and serves every read/write out of that mapping; [`MemStore`] is an
//! in-memory stand-in used by tests so that allocator/registry/list behavior can be exercised
//! without touching disk.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;

/// Random-access byte I/O over a fixed-size region.
///
/// Implementations are not expected to retry partial or out-of-range accesses: an out-of-range
/// `read`/`write` is an `io::Error` of kind `UnexpectedEof`, not a panic.
pub trait BackingStore {
    /// Reads `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `buf` starting at `offset`. Writes are visible to subsequent reads immediately.
    fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Drives durability: flushes outstanding modifications to the underlying file.
    fn flush(&self) -> io::Result<()>;

    /// Total size, in bytes, of the backing region.
    fn len(&self) -> u64;
}

fn check_bounds(len: u64, offset: u64, buf_len: usize) -> io::Result<()> {
    let end = offset
        .checked_add(buf_len as u64)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
    if end > len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "access [{}, {}) out of range for backing store of length {}",
                offset, end, len
            ),
        ));
    }
    Ok(())
}

/// Production [`BackingStore`]: a single file, mapped read-write for its entire lifetime.
pub struct MmapStore {
    mmap: MmapMut,
    len: u64,
}

impl MmapStore {
    /// Opens `path`, creating it and extending it to `file_size` bytes if it does not already
    /// exist or is smaller than `file_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created/opened, resized, or memory-mapped.
    #[instrument(level = "debug", skip(path))]
    pub fn open<P: AsRef<Path>>(path: P, file_size: u64) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let metadata = file.metadata()?;
        if metadata.len() < file_size {
            debug!(
                path = %path.display(),
                current_len = metadata.len(),
                target_len = file_size,
                "Extending backing file to target size."
            );
            file.set_len(file_size)?;
        }

        // SAFETY: the exclusive file lock acquired before this call guarantees no other process
        // writes through this mapping for its lifetime.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            mmap,
            len: file_size,
        })
    }
}

impl BackingStore for MmapStore {
    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(self.len, offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.mmap[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        check_bounds(self.len, offset, buf.len())?;
        let start = offset as usize;
        self.mmap[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// In-memory [`BackingStore`] used by tests that want deterministic, disk-free I/O.
#[derive(Debug, Default)]
pub struct MemStore {
    bytes: Vec<u8>,
}

impl MemStore {
    /// Creates a zero-filled store of `len` bytes.
    pub fn new(len: u64) -> Self {
        Self {
            bytes: vec![0u8; len as usize],
        }
    }
}

impl BackingStore for MemStore {
    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(self.bytes.len() as u64, offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        check_bounds(self.bytes.len() as u64, offset, buf.len())?;
        let start = offset as usize;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut store = MemStore::new(4096);
        store.write(100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        store.read(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn out_of_range_access_fails_with_io_error() {
        let store = MemStore::new(16);
        let mut buf = [0u8; 4];
        let err = store.read(15, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
