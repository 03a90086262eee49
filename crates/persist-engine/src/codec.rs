//! The record codec (C2): length-prefixed, magic-tagged records.
//!
//! Every externally readable record on disk follows the same shape:
//!
//! ```text
//! magic (u32 or u64, component-dependent) | size: u64 | checksum: u32 | payload[size]
//! ```
//!
//! All multibyte integers are little-endian, host order; there is no cross-machine portability
//! guarantee. The trailing checksum lives inside the record's own header bytes and lets a reader
//! detect a torn or corrupted payload before ever handing it to a deserializer.

use bytes::{Bytes, BytesMut};
use crc32fast::Hasher;
use snafu::{ResultExt, Snafu};

use crate::io::BackingStore;

/// Errors raised while encoding or decoding a record.
#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("I/O error while {} record: {}", action, source))]
    Io {
        action: &'static str,
        source: std::io::Error,
    },

    #[snafu(display(
        "record checksum mismatch at offset {}: expected {:#x}, computed {:#x}",
        offset,
        expected,
        computed
    ))]
    ChecksumMismatch {
        offset: u64,
        expected: u32,
        computed: u32,
    },

    #[snafu(display(
        "payload of {} bytes exceeds the {} bytes reserved for this slot at offset {}",
        attempted,
        capacity,
        offset
    ))]
    PayloadTooLarge {
        offset: u64,
        capacity: usize,
        attempted: usize,
    },
}

fn checksum_of(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Writes `magic | size | checksum | payload` at `offset` and returns the number of bytes written.
pub fn write_record_u32(
    store: &mut dyn BackingStore,
    offset: u64,
    magic: u32,
    payload: &[u8],
) -> Result<u64, CodecError> {
    let mut pos = offset;
    store
        .write(pos, &magic.to_le_bytes())
        .context(IoSnafu { action: "writing magic for" })?;
    pos += 4;
    store
        .write(pos, &(payload.len() as u64).to_le_bytes())
        .context(IoSnafu { action: "writing size for" })?;
    pos += 8;
    store
        .write(pos, &checksum_of(payload).to_le_bytes())
        .context(IoSnafu { action: "writing checksum for" })?;
    pos += 4;
    store
        .write(pos, payload)
        .context(IoSnafu { action: "writing payload for" })?;
    pos += payload.len() as u64;
    Ok(pos - offset)
}

/// Reads a `magic(u32)`-tagged record at `offset`.
///
/// Returns `Ok(None)` if the stored magic does not match `expected_magic` (the scan-terminating
/// condition used by both the spacemap log and the registry). Returns `Err` if the magic matches
/// but the checksum does not, which is a genuine corruption signal.
pub fn read_record_u32(
    store: &dyn BackingStore,
    offset: u64,
    expected_magic: u32,
) -> Result<Option<(Bytes, u64)>, CodecError> {
    let mut magic_buf = [0u8; 4];
    if store.read(offset, &mut magic_buf).is_err() {
        return Ok(None);
    }
    let magic = u32::from_le_bytes(magic_buf);
    if magic != expected_magic {
        return Ok(None);
    }

    let mut pos = offset + 4;
    let mut size_buf = [0u8; 8];
    store
        .read(pos, &mut size_buf)
        .context(IoSnafu { action: "reading size for" })?;
    let size = u64::from_le_bytes(size_buf);
    pos += 8;

    let mut checksum_buf = [0u8; 4];
    store
        .read(pos, &mut checksum_buf)
        .context(IoSnafu { action: "reading checksum for" })?;
    let expected_checksum = u32::from_le_bytes(checksum_buf);
    pos += 4;

    let mut payload = BytesMut::zeroed(size as usize);
    store
        .read(pos, &mut payload)
        .context(IoSnafu { action: "reading payload for" })?;
    pos += size;

    let computed_checksum = checksum_of(&payload);
    if computed_checksum != expected_checksum {
        return Err(CodecError::ChecksumMismatch {
            offset,
            expected: expected_checksum,
            computed: computed_checksum,
        });
    }

    Ok(Some((payload.freeze(), pos - offset)))
}

/// Writes `magic(u64) | size | checksum | payload` at `offset`, as used by registry entries.
pub fn write_record_u64(
    store: &mut dyn BackingStore,
    offset: u64,
    magic: u64,
    payload: &[u8],
) -> Result<u64, CodecError> {
    let mut pos = offset;
    store
        .write(pos, &magic.to_le_bytes())
        .context(IoSnafu { action: "writing magic for" })?;
    pos += 8;
    store
        .write(pos, &(payload.len() as u64).to_le_bytes())
        .context(IoSnafu { action: "writing size for" })?;
    pos += 8;
    store
        .write(pos, &checksum_of(payload).to_le_bytes())
        .context(IoSnafu { action: "writing checksum for" })?;
    pos += 4;
    store
        .write(pos, payload)
        .context(IoSnafu { action: "writing payload for" })?;
    pos += payload.len() as u64;
    Ok(pos - offset)
}

/// Reads a `magic(u64)`-tagged record at `offset`. See [`read_record_u32`] for semantics.
pub fn read_record_u64(
    store: &dyn BackingStore,
    offset: u64,
    expected_magic: u64,
) -> Result<Option<(Bytes, u64)>, CodecError> {
    let mut magic_buf = [0u8; 8];
    if store.read(offset, &mut magic_buf).is_err() {
        return Ok(None);
    }
    let magic = u64::from_le_bytes(magic_buf);
    if magic != expected_magic {
        return Ok(None);
    }

    let mut pos = offset + 8;
    let mut size_buf = [0u8; 8];
    store
        .read(pos, &mut size_buf)
        .context(IoSnafu { action: "reading size for" })?;
    let size = u64::from_le_bytes(size_buf);
    pos += 8;

    let mut checksum_buf = [0u8; 4];
    store
        .read(pos, &mut checksum_buf)
        .context(IoSnafu { action: "reading checksum for" })?;
    let expected_checksum = u32::from_le_bytes(checksum_buf);
    pos += 4;

    let mut payload = BytesMut::zeroed(size as usize);
    store
        .read(pos, &mut payload)
        .context(IoSnafu { action: "reading payload for" })?;
    pos += size;

    let computed_checksum = checksum_of(&payload);
    if computed_checksum != expected_checksum {
        return Err(CodecError::ChecksumMismatch {
            offset,
            expected: expected_checksum,
            computed: computed_checksum,
        });
    }

    Ok(Some((payload.freeze(), pos - offset)))
}

/// Rewrites only the `size | checksum | payload` portion of an already-written `magic(u64)`
/// record, leaving the magic untouched — the registry's signature is never rewritten once
/// placed. `max_payload_len` is the payload length recorded when the slot was first inserted; a
/// longer `payload` is rejected rather than silently truncating a neighboring slot.
pub fn rewrite_payload_u64(
    store: &mut dyn BackingStore,
    magic_offset: u64,
    payload: &[u8],
    max_payload_len: usize,
) -> Result<(), CodecError> {
    if payload.len() > max_payload_len {
        return Err(CodecError::PayloadTooLarge {
            offset: magic_offset,
            capacity: max_payload_len,
            attempted: payload.len(),
        });
    }

    let mut pos = magic_offset + 8;
    store
        .write(pos, &(payload.len() as u64).to_le_bytes())
        .context(IoSnafu { action: "rewriting size for" })?;
    pos += 8;
    store
        .write(pos, &checksum_of(payload).to_le_bytes())
        .context(IoSnafu { action: "rewriting checksum for" })?;
    pos += 4;
    store
        .write(pos, payload)
        .context(IoSnafu { action: "rewriting payload for" })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemStore;

    #[test]
    fn round_trips_u32_tagged_record() {
        let mut store = MemStore::new(4096);
        let payload = b"hello world".to_vec();
        let n = write_record_u32(&mut store, 0, 0xdead_face, &payload).unwrap();
        assert_eq!(n, 4 + 8 + 4 + payload.len() as u64);

        let (decoded, consumed) = read_record_u32(&store, 0, 0xdead_face).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(consumed, n);
    }

    #[test]
    fn mismatched_magic_terminates_scan() {
        let store = MemStore::new(4096);
        assert!(read_record_u32(&store, 0, 0xdead_face).unwrap().is_none());
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let mut store = MemStore::new(4096);
        let payload = b"payload".to_vec();
        write_record_u64(&mut store, 0, 0xdead_beef, &payload).unwrap();

        // Flip a byte in the payload without touching the checksum.
        let mut byte = [0u8; 1];
        store.read(8 + 8 + 4, &mut byte).unwrap();
        byte[0] ^= 0xff;
        store.write(8 + 8 + 4, &byte).unwrap();

        let err = read_record_u64(&store, 0, 0xdead_beef).unwrap_err();
        assert!(matches!(err, CodecError::ChecksumMismatch { .. }));
    }
}
