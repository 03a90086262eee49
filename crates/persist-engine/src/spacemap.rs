//! The spacemap (C3): a per-metaslab, first-fit allocator backed by an append-only log.
//!
//! A spacemap log is a sequence of records, each tagged with [`crate::RECORD_SIGNATURE`] and
//! encoding `(base, size, op)` where `op` is one of [`SpacemapOp::Free`], [`SpacemapOp::Allocate`],
//! or [`SpacemapOp::Deallocate`]. Replaying the log in order reconstructs the in-memory
//! `free_map`/`alloc_map` pair exactly; this module is the only place that format is known.

use std::collections::BTreeMap;

use snafu::Snafu;

use crate::codec::{self, CodecError};
use crate::io::BackingStore;
use crate::RECORD_SIGNATURE;

/// Errors raised by spacemap replay or allocation.
#[derive(Debug, Snafu)]
pub enum SpacemapError {
    #[snafu(display("spacemap I/O error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("no free extent of at least {} bytes available in this metaslab", requested))]
    OutOfSpace { requested: u64 },

    #[snafu(display("spacemap log corrupted: {}", reason))]
    Corruption { reason: String },
}

impl From<CodecError> for SpacemapError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io { source, .. } => SpacemapError::Io { source },
            CodecError::ChecksumMismatch { .. } | CodecError::PayloadTooLarge { .. } => {
                SpacemapError::Corruption {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// A contiguous byte range tracked by the spacemap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub base: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum SpacemapOp {
    Free = 0,
    Allocate = 1,
    Deallocate = 2,
}

impl SpacemapOp {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(SpacemapOp::Free),
            1 => Some(SpacemapOp::Allocate),
            2 => Some(SpacemapOp::Deallocate),
            _ => None,
        }
    }
}

const RECORD_PAYLOAD_LEN: usize = 8 + 8 + 4;

fn encode_payload(base: u64, size: u64, op: SpacemapOp) -> [u8; RECORD_PAYLOAD_LEN] {
    let mut buf = [0u8; RECORD_PAYLOAD_LEN];
    buf[0..8].copy_from_slice(&base.to_le_bytes());
    buf[8..16].copy_from_slice(&size.to_le_bytes());
    buf[16..20].copy_from_slice(&(op as u32).to_le_bytes());
    buf
}

fn decode_payload(buf: &[u8]) -> Result<(u64, u64, SpacemapOp), SpacemapError> {
    if buf.len() != RECORD_PAYLOAD_LEN {
        return Err(SpacemapError::Corruption {
            reason: format!(
                "spacemap record payload had length {}, expected {}",
                buf.len(),
                RECORD_PAYLOAD_LEN
            ),
        });
    }
    let base = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let op_raw = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    let op = SpacemapOp::from_u32(op_raw).ok_or_else(|| SpacemapError::Corruption {
        reason: format!("unknown spacemap op tag {}", op_raw),
    })?;
    Ok((base, size, op))
}

/// The per-metaslab allocator: an append-only log plus the in-memory free/alloc trees it
/// reconstructs.
#[derive(Debug)]
pub struct Spacemap {
    log_base: u64,
    log_size: u64,
    data_base: u64,
    data_size: u64,
    log_cursor: u64,
    free_map: BTreeMap<u64, Extent>,
    alloc_map: BTreeMap<u64, Extent>,
    cached_free_bytes: u64,
}

impl Spacemap {
    /// Opens (by replay) or initializes the spacemap for one metaslab.
    ///
    /// `log_base` is the metaslab's file offset; the log occupies `[log_base, log_base +
    /// log_size)` and the data region is `[log_base + log_size, log_base + log_size +
    /// data_size)`.
    #[instrument(level = "debug", skip(store))]
    pub fn open(
        store: &mut dyn BackingStore,
        log_base: u64,
        log_size: u64,
        data_size: u64,
    ) -> Result<Self, SpacemapError> {
        let data_base = log_base + log_size;
        let mut spacemap = Spacemap {
            log_base,
            log_size,
            data_base,
            data_size,
            log_cursor: log_base,
            free_map: BTreeMap::new(),
            alloc_map: BTreeMap::new(),
            cached_free_bytes: 0,
        };

        let log_end = log_base + log_size;
        loop {
            if spacemap.log_cursor >= log_end {
                break;
            }
            match codec::read_record_u32(store, spacemap.log_cursor, RECORD_SIGNATURE)? {
                None => break,
                Some((payload, consumed)) => {
                    let (base, size, op) = decode_payload(&payload)?;
                    spacemap.apply(base, size, op);
                    spacemap.log_cursor += consumed;
                }
            }
        }

        if spacemap.log_cursor == log_base {
            debug!(data_base, data_size, "Initializing fresh spacemap.");
            spacemap.append(store, data_base, data_size, SpacemapOp::Free)?;
        }

        spacemap.cached_free_bytes = spacemap.free_map.values().map(|e| e.size).sum();

        Ok(spacemap)
    }

    fn apply(&mut self, base: u64, size: u64, op: SpacemapOp) {
        match op {
            SpacemapOp::Free => {
                self.alloc_map.remove(&base);
                self.free_map.insert(base, Extent { base, size });
            }
            SpacemapOp::Allocate => {
                self.free_map.remove(&base);
                self.alloc_map.insert(base, Extent { base, size });
            }
            SpacemapOp::Deallocate => {
                self.alloc_map.remove(&base);
                self.free_map.insert(base, Extent { base, size });
            }
        }
    }

    fn append(
        &mut self,
        store: &mut dyn BackingStore,
        base: u64,
        size: u64,
        op: SpacemapOp,
    ) -> Result<(), SpacemapError> {
        let payload = encode_payload(base, size, op);
        let consumed = codec::write_record_u32(store, self.log_cursor, RECORD_SIGNATURE, &payload)?;
        self.apply(base, size, op);
        self.log_cursor += consumed;
        Ok(())
    }

    /// Allocates the first free extent of at least `n` bytes (first-fit by ascending base).
    #[instrument(level = "debug", skip(self, store))]
    pub fn allocate(&mut self, store: &mut dyn BackingStore, n: u64) -> Result<Extent, SpacemapError> {
        let chosen = self
            .free_map
            .values()
            .find(|e| e.size >= n)
            .copied()
            .ok_or(SpacemapError::OutOfSpace { requested: n })?;

        self.append(store, chosen.base, n, SpacemapOp::Allocate)?;
        self.cached_free_bytes -= n;

        if chosen.size > n {
            let remainder_base = chosen.base + n;
            let remainder_size = chosen.size - n;
            self.append(store, remainder_base, remainder_size, SpacemapOp::Free)?;
        }

        Ok(Extent { base: chosen.base, size: n })
    }

    /// Marks `[base, base + size)` free again.
    #[instrument(level = "debug", skip(self, store))]
    pub fn deallocate(
        &mut self,
        store: &mut dyn BackingStore,
        base: u64,
        size: u64,
    ) -> Result<(), SpacemapError> {
        self.append(store, base, size, SpacemapOp::Deallocate)?;
        self.cached_free_bytes += size;
        Ok(())
    }

    /// Cached total of free bytes; always equal to the sum of `free_map` extent sizes.
    pub fn cached_free_bytes(&self) -> u64 {
        self.cached_free_bytes
    }

    pub fn data_base(&self) -> u64 {
        self.data_base
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn log_base(&self) -> u64 {
        self.log_base
    }

    pub fn log_size(&self) -> u64 {
        self.log_size
    }

    /// Returns `true` if `alloc_map` and `free_map` exactly and disjointly cover the data region,
    /// recomputed by sorting and walking every tracked extent.
    pub fn covers_data_region_exactly(&self) -> bool {
        let mut extents: Vec<Extent> = self
            .free_map
            .values()
            .chain(self.alloc_map.values())
            .copied()
            .collect();
        extents.sort_by_key(|e| e.base);

        let mut cursor = self.data_base;
        for extent in &extents {
            if extent.base != cursor {
                return false;
            }
            cursor += extent.size;
        }
        cursor == self.data_base + self.data_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemStore;

    // A small stand-in metaslab: the log needs room for a handful of records, the data region
    // just needs to be big enough to exercise first-fit allocation without exhausting it.
    const TEST_LOG_SIZE: u64 = 4096;
    const TEST_DATA_SIZE: u64 = 1 << 20;

    fn fresh_store() -> MemStore {
        MemStore::new(TEST_LOG_SIZE + TEST_DATA_SIZE)
    }

    #[test]
    fn fresh_metaslab_starts_with_one_free_extent() {
        let mut store = fresh_store();
        let sm = Spacemap::open(&mut store, 0, TEST_LOG_SIZE, TEST_DATA_SIZE).unwrap();
        assert_eq!(sm.cached_free_bytes(), TEST_DATA_SIZE);
        assert!(sm.covers_data_region_exactly());
    }

    #[test]
    fn scenario_first_fit_three_allocations() {
        let mut store = fresh_store();
        let data_size = TEST_DATA_SIZE;
        let mut sm = Spacemap::open(&mut store, 0, TEST_LOG_SIZE, data_size).unwrap();

        let a = sm.allocate(&mut store, 100).unwrap();
        let b = sm.allocate(&mut store, 200).unwrap();
        let c = sm.allocate(&mut store, 400).unwrap();

        assert_eq!(a.base, sm.data_base());
        assert_eq!(b.base, a.base + 100);
        assert_eq!(c.base, b.base + 200);

        assert_eq!(sm.cached_free_bytes(), data_size - 700);
        assert!(sm.covers_data_region_exactly());
    }

    #[test]
    fn replay_reconstructs_identical_state() {
        let mut store = fresh_store();
        let data_size = TEST_DATA_SIZE;
        {
            let mut sm = Spacemap::open(&mut store, 0, TEST_LOG_SIZE, data_size).unwrap();
            sm.allocate(&mut store, 64).unwrap();
            let second = sm.allocate(&mut store, 128).unwrap();
            sm.deallocate(&mut store, second.base, second.size).unwrap();
        }

        let replayed = Spacemap::open(&mut store, 0, TEST_LOG_SIZE, data_size).unwrap();
        assert_eq!(replayed.cached_free_bytes(), data_size - 64);
        assert!(replayed.covers_data_region_exactly());
    }

    #[test]
    fn out_of_space_when_no_extent_fits() {
        let mut store = fresh_store();
        let data_size = TEST_DATA_SIZE;
        let mut sm = Spacemap::open(&mut store, 0, TEST_LOG_SIZE, data_size).unwrap();
        let err = sm.allocate(&mut store, data_size + 1).unwrap_err();
        assert!(matches!(err, SpacemapError::OutOfSpace { .. }));
    }
}
