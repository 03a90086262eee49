//! The registry (C5): a bump-allocated, signature-scanned index of every live data structure
//! (and snapshot) the engine knows about.
//!
//! The registry occupies one fixed-size region carved out of metaslab 0 on first use. Within it,
//! entries are laid out contiguously at `ALIGN`-byte steps starting at the region's first byte;
//! opening the registry means scanning those steps for [`crate::REGISTRY_SIGNATURE`] until the
//! first slot that doesn't carry it.

use snafu::Snafu;

use crate::allocator::{AllocatorError, StorageAllocator};
use crate::codec::{self, CodecError};
use crate::io::BackingStore;
use crate::{round_up, ALIGN, REGISTRY_SIGNATURE};

/// Errors raised by registry open/scan or mutation.
#[derive(Debug, Snafu)]
pub enum RegistryError {
    #[snafu(display("registry I/O error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("registry lookup failed: {}", reason))]
    NotFound { reason: String },

    #[snafu(display("registry corruption: {}", reason))]
    Corruption { reason: String },

    #[snafu(display("registry region allocation failed: {}", source))]
    Allocator { source: AllocatorError },
}

impl From<CodecError> for RegistryError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io { source, .. } => RegistryError::Io { source },
            CodecError::ChecksumMismatch { .. } | CodecError::PayloadTooLarge { .. } => {
                RegistryError::Corruption {
                    reason: err.to_string(),
                }
            }
        }
    }
}

impl From<AllocatorError> for RegistryError {
    fn from(source: AllocatorError) -> Self {
        RegistryError::Allocator { source }
    }
}

/// The kind of data structure a registry entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RegistryKind {
    List = 0,
    BTree = 1,
    BPTree = 2,
}

impl RegistryKind {
    fn from_u32(v: u32) -> Result<Self, RegistryError> {
        match v {
            0 => Ok(RegistryKind::List),
            1 => Ok(RegistryKind::BTree),
            2 => Ok(RegistryKind::BPTree),
            _ => Err(RegistryError::Corruption {
                reason: format!("unknown registry entry type tag {}", v),
            }),
        }
    }
}

/// One registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryRecord {
    pub version: u32,
    pub key: u64,
    /// Parent key; `0` if this is a root (non-snapshot) entry.
    pub pkey: u64,
    pub is_snap: bool,
    pub write_gen: u64,
    /// Offset of this entry's own slot in the registry region; immutable after insert.
    pub phys_curr: u64,
    /// Offset of the data structure's head node/root, if any.
    pub phys_next: u64,
    pub nr_elements: u64,
    pub kind: RegistryKind,
}

const RECORD_PAYLOAD_LEN: usize = 8 + 4 + 8 + 8 + 1 + 8 + 8 + 8 + 8 + 4;

fn encode_record(record: &RegistryRecord) -> [u8; RECORD_PAYLOAD_LEN] {
    let mut buf = [0u8; RECORD_PAYLOAD_LEN];
    let mut pos = 0;

    buf[pos..pos + 8].copy_from_slice(&REGISTRY_SIGNATURE.to_le_bytes());
    pos += 8;
    buf[pos..pos + 4].copy_from_slice(&record.version.to_le_bytes());
    pos += 4;
    buf[pos..pos + 8].copy_from_slice(&record.key.to_le_bytes());
    pos += 8;
    buf[pos..pos + 8].copy_from_slice(&record.pkey.to_le_bytes());
    pos += 8;
    buf[pos] = record.is_snap as u8;
    pos += 1;
    buf[pos..pos + 8].copy_from_slice(&record.write_gen.to_le_bytes());
    pos += 8;
    buf[pos..pos + 8].copy_from_slice(&record.phys_curr.to_le_bytes());
    pos += 8;
    buf[pos..pos + 8].copy_from_slice(&record.phys_next.to_le_bytes());
    pos += 8;
    buf[pos..pos + 8].copy_from_slice(&record.nr_elements.to_le_bytes());
    pos += 8;
    buf[pos..pos + 4].copy_from_slice(&(record.kind as u32).to_le_bytes());

    buf
}

fn decode_record(buf: &[u8]) -> Result<RegistryRecord, RegistryError> {
    if buf.len() != RECORD_PAYLOAD_LEN {
        return Err(RegistryError::Corruption {
            reason: format!(
                "registry entry payload had length {}, expected {}",
                buf.len(),
                RECORD_PAYLOAD_LEN
            ),
        });
    }

    let mut pos = 0;
    let inner_magic = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    if inner_magic != REGISTRY_SIGNATURE {
        return Err(RegistryError::Corruption {
            reason: format!("registry entry payload magic mismatch: {:#x}", inner_magic),
        });
    }
    pos += 8;
    let version = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let key = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let pkey = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let is_snap = buf[pos] != 0;
    pos += 1;
    let write_gen = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let phys_curr = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let phys_next = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let nr_elements = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
    pos += 8;
    let kind = RegistryKind::from_u32(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()))?;

    Ok(RegistryRecord {
        version,
        key,
        pkey,
        is_snap,
        write_gen,
        phys_curr,
        phys_next,
        nr_elements,
        kind,
    })
}

/// The registry: an in-memory mirror of every entry discovered in its on-disk region, plus the
/// bump cursor for the next insert.
#[derive(Debug)]
pub struct Registry {
    region_base: u64,
    region_size: u64,
    cursor: u64,
    entries: Vec<RegistryRecord>,
}

impl Registry {
    /// Scans the registry region (carving it from `allocator` on first use) and reconstructs
    /// the in-memory entry list.
    #[instrument(level = "info", skip(store, allocator))]
    pub fn open(
        store: &mut dyn BackingStore,
        allocator: &mut StorageAllocator,
        region_size: u64,
    ) -> Result<Self, RegistryError> {
        let region_base = allocator.registry_region_base();
        let mut entries = Vec::new();
        let mut cursor = region_base;
        let region_end = region_base + region_size;

        loop {
            if cursor >= region_end {
                break;
            }
            match codec::read_record_u64(store, cursor, REGISTRY_SIGNATURE)? {
                None => break,
                Some((payload, consumed)) => {
                    let record = decode_record(&payload)?;
                    entries.push(record);
                    cursor = round_up(cursor + consumed, ALIGN);
                }
            }
        }

        if entries.is_empty() && !allocator.registry_region_is_carved() {
            let extent = allocator.allocate(store, region_size)?;
            if extent.base != region_base {
                return Err(RegistryError::Corruption {
                    reason: format!(
                        "registry region allocated at {} but expected {}",
                        extent.base, region_base
                    ),
                });
            }
            cursor = round_up(region_base, ALIGN);
        }

        info!(entry_count = entries.len(), region_base, "Registry opened.");
        Ok(Self {
            region_base,
            region_size,
            cursor,
            entries,
        })
    }

    fn write_entry(&mut self, store: &mut dyn BackingStore, record: &RegistryRecord) -> Result<(), RegistryError> {
        let payload = encode_record(record);
        let consumed = codec::write_record_u64(store, record.phys_curr, REGISTRY_SIGNATURE, &payload)?;
        self.cursor = round_up(record.phys_curr + consumed, ALIGN);
        Ok(())
    }

    fn rewrite_entry(&self, store: &mut dyn BackingStore, record: &RegistryRecord) -> Result<(), RegistryError> {
        let payload = encode_record(record);
        codec::rewrite_payload_u64(store, record.phys_curr, &payload, RECORD_PAYLOAD_LEN)?;
        Ok(())
    }

    /// Linear scan by key.
    pub fn find(&self, key: u64) -> Option<&RegistryRecord> {
        self.entries.iter().find(|e| e.key == key)
    }

    fn find_index(&self, key: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Inserts a fresh root entry of `kind` for `key` at the current bump cursor.
    #[instrument(level = "debug", skip(self, store))]
    pub fn insert(
        &mut self,
        store: &mut dyn BackingStore,
        key: u64,
        kind: RegistryKind,
    ) -> Result<RegistryRecord, RegistryError> {
        let record = RegistryRecord {
            version: 0,
            key,
            pkey: 0,
            is_snap: false,
            write_gen: 0,
            phys_curr: self.cursor,
            phys_next: 0,
            nr_elements: 0,
            kind,
        };
        self.write_entry(store, &record)?;
        self.entries.push(record);
        Ok(record)
    }

    /// Rewrites an existing entry's payload in place. A no-op if `key` isn't registered.
    #[instrument(level = "debug", skip(self, store))]
    pub fn update(&mut self, store: &mut dyn BackingStore, record: RegistryRecord) -> Result<(), RegistryError> {
        let Some(idx) = self.find_index(record.key) else {
            return Ok(());
        };
        self.rewrite_entry(store, &record)?;
        self.entries[idx] = record;
        Ok(())
    }

    /// Tombstones an entry: zeroes `phys_next`/`nr_elements`/`write_gen` on disk and drops it
    /// from the in-memory list. A no-op if `key` isn't registered. The on-disk slot itself is
    /// never reclaimed (§3.4).
    #[instrument(level = "debug", skip(self, store))]
    pub fn remove(&mut self, store: &mut dyn BackingStore, key: u64) -> Result<(), RegistryError> {
        let Some(idx) = self.find_index(key) else {
            return Ok(());
        };
        let mut record = self.entries[idx];
        record.phys_next = 0;
        record.nr_elements = 0;
        record.write_gen = 0;
        self.rewrite_entry(store, &record)?;
        self.entries.remove(idx);
        Ok(())
    }

    /// Creates a snapshot entry `child_key` pinned to `parent_key`, copying the parent's current
    /// `phys_next`/`nr_elements`/`kind`. Fails with `NotFound` if `parent_key` isn't live — the
    /// resolution this spec adopts for "snapshot of a removed parent" rather than silently
    /// duplicating a stale entry.
    #[instrument(level = "debug", skip(self, store))]
    pub fn snapshot(
        &mut self,
        store: &mut dyn BackingStore,
        child_key: u64,
        parent_key: u64,
    ) -> Result<RegistryRecord, RegistryError> {
        let parent = self.find(parent_key).copied().ok_or_else(|| RegistryError::NotFound {
            reason: format!("snapshot parent key {} has no live registry entry", parent_key),
        })?;

        let child = RegistryRecord {
            version: 0,
            key: child_key,
            pkey: parent_key,
            is_snap: true,
            write_gen: 0,
            phys_curr: self.cursor,
            phys_next: parent.phys_next,
            nr_elements: parent.nr_elements,
            kind: parent.kind,
        };
        self.write_entry(store, &child)?;
        self.entries.push(child);
        Ok(child)
    }

    /// Maximum `nr_elements` across every live entry whose `pkey == parent_key` (`0` if none).
    /// C6 uses this to avoid popping elements a surviving snapshot still observes.
    pub fn snap_elements(&self, parent_key: u64) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.pkey == parent_key)
            .map(|e| e.nr_elements)
            .max()
            .unwrap_or(0)
    }

    pub fn region_base(&self) -> u64 {
        self.region_base
    }

    pub fn region_size(&self) -> u64 {
        self.region_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemStore;

    const TEST_METASLAB_SIZE: u64 = 1 << 20;
    const TEST_LOG_SIZE: u64 = 4096;
    const TEST_REGION_SIZE: u64 = 8192;

    fn fresh_allocator() -> (MemStore, StorageAllocator) {
        let mut store = MemStore::new(TEST_METASLAB_SIZE);
        let allocator = StorageAllocator::open_sized(
            &mut store,
            0,
            TEST_METASLAB_SIZE,
            TEST_LOG_SIZE,
            TEST_METASLAB_SIZE,
        )
        .unwrap();
        (store, allocator)
    }

    #[test]
    fn insert_find_round_trips() {
        let (mut store, mut allocator) = fresh_allocator();
        let mut registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();

        let inserted = registry.insert(&mut store, 42, RegistryKind::List).unwrap();
        assert_eq!(inserted.key, 42);
        assert_eq!(inserted.pkey, 0);

        let found = registry.find(42).unwrap();
        assert_eq!(found.phys_curr, inserted.phys_curr);
    }

    #[test]
    fn registry_state_survives_reopen() {
        let (mut store, mut allocator) = fresh_allocator();
        let first_base;
        {
            let mut registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();
            let rec = registry.insert(&mut store, 7, RegistryKind::BPTree).unwrap();
            first_base = rec.phys_curr;
            let mut updated = rec;
            updated.nr_elements = 3;
            updated.phys_next = 1234;
            registry.update(&mut store, updated).unwrap();
        }

        let registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();
        let found = registry.find(7).unwrap();
        assert_eq!(found.phys_curr, first_base);
        assert_eq!(found.nr_elements, 3);
        assert_eq!(found.phys_next, 1234);
    }

    #[test]
    fn remove_tombstones_but_keeps_slot() {
        let (mut store, mut allocator) = fresh_allocator();
        let mut registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();
        registry.insert(&mut store, 1, RegistryKind::List).unwrap();
        registry.remove(&mut store, 1).unwrap();
        assert!(registry.find(1).is_none());
    }

    #[test]
    fn snapshot_copies_parent_state_and_tracks_snap_elements() {
        let (mut store, mut allocator) = fresh_allocator();
        let mut registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();

        let parent = registry.insert(&mut store, 1, RegistryKind::List).unwrap();
        let mut parent_updated = parent;
        parent_updated.nr_elements = 5;
        parent_updated.phys_next = 500;
        registry.update(&mut store, parent_updated).unwrap();

        let child = registry.snapshot(&mut store, 2, 1).unwrap();
        assert_eq!(child.pkey, 1);
        assert!(child.is_snap);
        assert_eq!(child.nr_elements, 5);
        assert_eq!(child.phys_next, 500);

        assert_eq!(registry.snap_elements(1), 5);
        assert_eq!(registry.snap_elements(999), 0);
    }

    #[test]
    fn reopen_after_remove_rediscovers_a_dead_slot() {
        // `remove` tombstones a slot's `phys_next`/`nr_elements` but leaves its on-disk
        // signature and key untouched, so a reopen's linear scan finds it again. This is the
        // documented "dead slots are tolerated" policy, not a leak: `find` on the rediscovered
        // entry reports zero elements, matching the state `remove` left it in.
        let (mut store, mut allocator) = fresh_allocator();
        {
            let mut registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();
            registry.insert(&mut store, 9, RegistryKind::List).unwrap();
            registry.remove(&mut store, 9).unwrap();
            assert!(registry.find(9).is_none());
        }

        let registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();
        let found = registry.find(9).expect("tombstoned slot is rediscovered on reopen");
        assert_eq!(found.nr_elements, 0);
        assert_eq!(found.phys_next, 0);
    }

    #[test]
    fn snapshot_of_missing_parent_is_not_found() {
        let (mut store, mut allocator) = fresh_allocator();
        let mut registry = Registry::open(&mut store, &mut allocator, TEST_REGION_SIZE).unwrap();
        let err = registry.snapshot(&mut store, 2, 999).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }
}
