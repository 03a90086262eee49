//! The storage allocator (C4): partitions the backing file into metaslabs and dispatches
//! allocate/free calls to whichever metaslab owns (or can satisfy) the request.

use snafu::Snafu;

use crate::io::BackingStore;
use crate::spacemap::{Extent, Spacemap, SpacemapError};
use crate::METASLAB_SIZE;

/// Errors raised by the storage allocator.
#[derive(Debug, Snafu)]
pub enum AllocatorError {
    #[snafu(display("allocator I/O error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("no metaslab has at least {} free bytes", requested))]
    OutOfSpace { requested: u64 },

    #[snafu(display("invalid argument: {}", reason))]
    InvalidArgument { reason: String },

    #[snafu(display("allocator corruption: {}", reason))]
    Corruption { reason: String },
}

impl From<SpacemapError> for AllocatorError {
    fn from(err: SpacemapError) -> Self {
        match err {
            SpacemapError::Io { source } => AllocatorError::Io { source },
            SpacemapError::OutOfSpace { requested } => AllocatorError::OutOfSpace { requested },
            SpacemapError::Corruption { reason } => AllocatorError::Corruption { reason },
        }
    }
}

/// A 1 GiB contiguous subregion of the backing file, with its own spacemap log.
#[derive(Debug)]
struct Metaslab {
    base: u64,
    size: u64,
    spacemap: Spacemap,
}

impl Metaslab {
    fn open(
        store: &mut dyn BackingStore,
        base: u64,
        size: u64,
        log_size: u64,
    ) -> Result<Self, AllocatorError> {
        let spacemap = Spacemap::open(store, base, log_size, size - log_size)?;
        Ok(Self { base, size, spacemap })
    }

    fn cached_free_bytes(&self) -> u64 {
        self.spacemap.cached_free_bytes()
    }

    fn data_base(&self) -> u64 {
        self.spacemap.data_base()
    }

    fn data_size(&self) -> u64 {
        self.spacemap.data_size()
    }

    /// `true` if this metaslab's extent strictly contains `[offset, offset + size)`.
    fn strictly_contains(&self, offset: u64, size: u64) -> bool {
        self.base < offset && (self.base + self.size) > (offset + size)
    }
}

/// Owns the ordered list of metaslabs spanning `[file_base, file_base + file_size)`.
#[derive(Debug)]
pub struct StorageAllocator {
    metaslabs: Vec<Metaslab>,
}

impl StorageAllocator {
    /// Partitions `[file_base, file_base + file_size)` into `⌊file_size / METASLAB_SIZE⌋`
    /// metaslabs, replaying (or initializing) each one's spacemap.
    #[instrument(level = "info", skip(store))]
    pub fn open(
        store: &mut dyn BackingStore,
        file_base: u64,
        file_size: u64,
    ) -> Result<Self, AllocatorError> {
        Self::open_with_log_size(store, file_base, file_size, crate::SPACEMAP_LOG_SIZE)
    }

    /// As [`Self::open`], but with an explicit per-metaslab log size and metaslab size. Exposed
    /// so tests can exercise multi-metaslab behavior without allocating gigabytes of backing
    /// storage.
    pub(crate) fn open_with_log_size(
        store: &mut dyn BackingStore,
        file_base: u64,
        file_size: u64,
        log_size: u64,
    ) -> Result<Self, AllocatorError> {
        Self::open_sized(store, file_base, file_size, log_size, METASLAB_SIZE)
    }

    /// As [`Self::open`], but with an explicit per-metaslab log size and metaslab size.
    /// `pub(crate)` so other modules' tests can build small-footprint allocators.
    pub(crate) fn open_sized(
        store: &mut dyn BackingStore,
        file_base: u64,
        file_size: u64,
        log_size: u64,
        metaslab_size: u64,
    ) -> Result<Self, AllocatorError> {
        if file_size < metaslab_size {
            return Err(AllocatorError::InvalidArgument {
                reason: format!(
                    "file size {} is smaller than one metaslab ({} bytes)",
                    file_size, metaslab_size
                ),
            });
        }

        let count = file_size / metaslab_size;
        let mut metaslabs = Vec::with_capacity(count as usize);
        for i in 0..count {
            let base = file_base + i * metaslab_size;
            metaslabs.push(Metaslab::open(store, base, metaslab_size, log_size)?);
        }

        info!(metaslab_count = metaslabs.len(), "Storage allocator opened.");
        Ok(Self { metaslabs })
    }

    /// Allocates `n` bytes from the first metaslab whose cached free space exceeds `n`.
    #[instrument(level = "debug", skip(self, store))]
    pub fn allocate(&mut self, store: &mut dyn BackingStore, n: u64) -> Result<Extent, AllocatorError> {
        for metaslab in &mut self.metaslabs {
            if metaslab.cached_free_bytes() > n {
                return Ok(metaslab.spacemap.allocate(store, n)?);
            }
        }
        Err(AllocatorError::OutOfSpace { requested: n })
    }

    /// Frees `[offset, offset + size)`. A no-op if no metaslab's extent strictly contains the
    /// range (not a crash).
    #[instrument(level = "debug", skip(self, store))]
    pub fn deallocate(&mut self, store: &mut dyn BackingStore, offset: u64, size: u64) -> Result<(), AllocatorError> {
        for metaslab in &mut self.metaslabs {
            if metaslab.strictly_contains(offset, size) {
                metaslab.spacemap.deallocate(store, offset, size)?;
                return Ok(());
            }
        }
        warn!(offset, size, "Deallocate request matched no metaslab; ignoring.");
        Ok(())
    }

    pub fn metaslab_count(&self) -> usize {
        self.metaslabs.len()
    }

    /// The file offset the registry region starts at: the first byte of the first metaslab's
    /// data region. Deterministic because the registry is always the first thing ever carved
    /// out of metaslab 0.
    pub(crate) fn registry_region_base(&self) -> u64 {
        self.metaslabs[0].data_base()
    }

    /// `true` once anything (in practice, only ever the registry region) has been allocated out
    /// of metaslab 0 — distinguishes "registry region not yet carved" from "carved, but
    /// currently holds zero live entries" so [`crate::registry::Registry::open`] never
    /// re-allocates the same region on a reopen.
    pub(crate) fn registry_region_is_carved(&self) -> bool {
        let first = &self.metaslabs[0];
        first.cached_free_bytes() < first.data_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemStore;

    const TEST_METASLAB_SIZE: u64 = 1 << 20;
    const TEST_LOG_SIZE: u64 = 4096;

    fn open_allocator(metaslab_count: u64) -> (MemStore, StorageAllocator) {
        let mut store = MemStore::new(TEST_METASLAB_SIZE * metaslab_count);
        let allocator = StorageAllocator::open_sized(
            &mut store,
            0,
            TEST_METASLAB_SIZE * metaslab_count,
            TEST_LOG_SIZE,
            TEST_METASLAB_SIZE,
        )
        .unwrap();
        (store, allocator)
    }

    #[test]
    fn partitions_file_into_expected_metaslab_count() {
        let (_, allocator) = open_allocator(3);
        assert_eq!(allocator.metaslab_count(), 3);
    }

    #[test]
    fn allocate_dispatches_to_first_metaslab_with_room() {
        let (mut store, mut allocator) = open_allocator(2);
        let extent = allocator.allocate(&mut store, 1024).unwrap();
        assert_eq!(extent.size, 1024);
        assert!(extent.base >= TEST_LOG_SIZE);
        assert!(extent.base < TEST_METASLAB_SIZE);
    }

    #[test]
    fn deallocate_unknown_range_is_a_silent_no_op() {
        let (mut store, mut allocator) = open_allocator(1);
        allocator.deallocate(&mut store, 999_999_999, 10).unwrap();
    }

    #[test]
    fn file_smaller_than_one_metaslab_is_rejected() {
        let mut store = MemStore::new(TEST_METASLAB_SIZE);
        let err = StorageAllocator::open_sized(
            &mut store,
            0,
            TEST_METASLAB_SIZE - 1,
            TEST_LOG_SIZE,
            TEST_METASLAB_SIZE,
        )
        .unwrap_err();
        assert!(matches!(err, AllocatorError::InvalidArgument { .. }));
    }
}
