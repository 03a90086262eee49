//! The persistent linked list (C6): an append-only chain of fixed-size nodes, rooted at a
//! registry entry, supporting snapshot-aware `pop_back`.
//!
//! Nodes carry no magic/signature of their own — unlike the spacemap log or the registry, the
//! number of physical nodes to read back is always known up front from the registry's
//! `nr_elements`, so there is nothing to scan for. Each node stores its successor's offset
//! explicitly (`phys_next`, `0` meaning "no successor yet"); the allocator makes no contiguity
//! promise across calls, so the chain is never inferred from `phys_curr + NODE_LEN` (§9).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use snafu::Snafu;

use crate::allocator::{AllocatorError, StorageAllocator};
use crate::io::BackingStore;
use crate::registry::{Registry, RegistryError, RegistryKind};

/// Errors raised by list bind/push/pop/clear.
#[derive(Debug, Snafu)]
pub enum ListError {
    #[snafu(display("list I/O error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("list conflict: {}", reason))]
    Conflict { reason: String },

    #[snafu(display("list registry error: {}", source))]
    Registry { source: RegistryError },

    #[snafu(display("list allocator error: {}", source))]
    Allocator { source: AllocatorError },
}

impl From<std::io::Error> for ListError {
    fn from(source: std::io::Error) -> Self {
        ListError::Io { source }
    }
}

impl From<RegistryError> for ListError {
    fn from(source: RegistryError) -> Self {
        ListError::Registry { source }
    }
}

impl From<AllocatorError> for ListError {
    fn from(source: AllocatorError) -> Self {
        ListError::Allocator { source }
    }
}

/// Derives the registry key for a user-visible list id. Uses the standard library's hasher
/// rather than pulling in a crate for it; stable for the lifetime of one compiled binary, which
/// is the same "no cross-build portability guarantee" posture the codec takes for its integers.
pub fn hash_id(id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

const NODE_LEN: u64 = 8 + 8 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Node {
    value: u64,
    phys_curr: u64,
    phys_birth: u64,
    /// Offset of the successor node, or `0` if this is (so far) the tail.
    phys_next: u64,
}

fn encode_node(node: &Node) -> [u8; NODE_LEN as usize] {
    let mut buf = [0u8; NODE_LEN as usize];
    buf[0..8].copy_from_slice(&node.value.to_le_bytes());
    buf[8..16].copy_from_slice(&node.phys_curr.to_le_bytes());
    buf[16..24].copy_from_slice(&node.phys_birth.to_le_bytes());
    buf[24..32].copy_from_slice(&node.phys_next.to_le_bytes());
    buf
}

fn decode_node(buf: &[u8]) -> Node {
    Node {
        value: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        phys_curr: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        phys_birth: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        phys_next: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
    }
}

fn read_node(store: &dyn BackingStore, offset: u64) -> Result<Node, ListError> {
    let mut buf = [0u8; NODE_LEN as usize];
    store.read(offset, &mut buf)?;
    Ok(decode_node(&buf))
}

fn write_node(store: &mut dyn BackingStore, node: &Node) -> Result<(), ListError> {
    let buf = encode_node(node);
    store.write(node.phys_curr, &buf)?;
    Ok(())
}

/// An in-memory mirror of one persistent linked list, bound to a registry key.
#[derive(Debug)]
pub struct PersistentLinkList {
    key: u64,
    /// Every physical node ever pushed, including tombstones, in append order.
    nodes: Vec<Node>,
    /// value -> index of its current live representative in `nodes`.
    live: HashMap<u64, usize>,
}

impl PersistentLinkList {
    /// Binds to (creating if absent) the registry entry for `id`, rebuilding in-memory state
    /// from the physical chain if the entry already has elements.
    #[instrument(level = "debug", skip(store, registry))]
    pub fn bind(store: &mut dyn BackingStore, registry: &mut Registry, id: &str) -> Result<Self, ListError> {
        let key = hash_id(id);
        let record = match registry.find(key) {
            Some(r) => *r,
            None => registry.insert(store, key, RegistryKind::List)?,
        };

        let mut list = Self {
            key,
            nodes: Vec::new(),
            live: HashMap::new(),
        };

        if record.nr_elements > 0 {
            list.rebuild(store, record.phys_next, record.nr_elements)?;
        }

        Ok(list)
    }

    fn rebuild(&mut self, store: &dyn BackingStore, phys_next: u64, nr_elements: u64) -> Result<(), ListError> {
        let mut cursor = phys_next;
        for _ in 0..nr_elements {
            let node = read_node(store, cursor)?;
            let idx = self.nodes.len();
            if node.phys_birth != 0 {
                self.live.insert(node.value, idx);
            } else {
                self.live.remove(&node.value);
            }
            cursor = node.phys_next;
            self.nodes.push(node);
        }
        Ok(())
    }

    /// Registry key this list is bound to.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Appends a node for `value`. `tombstone = true` marks it dead on arrival (used internally
    /// by `pop_back`); an ordinary caller always pushes live values.
    #[instrument(level = "debug", skip(self, store, allocator, registry))]
    pub fn push_back(
        &mut self,
        store: &mut dyn BackingStore,
        allocator: &mut StorageAllocator,
        registry: &mut Registry,
        value: u64,
        tombstone: bool,
    ) -> Result<(), ListError> {
        let extent = allocator.allocate(store, NODE_LEN)?;
        let phys_curr = extent.base;
        let phys_birth = if tombstone { 0 } else { phys_curr };
        let node = Node { value, phys_curr, phys_birth, phys_next: 0 };
        write_node(store, &node)?;

        let mut record = registry.find(self.key).copied().ok_or_else(|| RegistryError::NotFound {
            reason: format!("list key {} has no registry entry", self.key),
        })?;
        if let Some(prev_tail) = self.nodes.last_mut() {
            prev_tail.phys_next = phys_curr;
            write_node(store, prev_tail)?;
        } else {
            record.phys_next = phys_curr;
        }
        record.nr_elements += 1;
        registry.update(store, record)?;

        let idx = self.nodes.len();
        self.nodes.push(node);
        if !tombstone {
            self.live.insert(value, idx);
        }
        Ok(())
    }

    /// Logically removes the current tail, refusing if doing so would remove a value still
    /// observed by an existing snapshot (§4.6.3).
    #[instrument(level = "debug", skip(self, store, allocator, registry))]
    pub fn pop_back(
        &mut self,
        store: &mut dyn BackingStore,
        allocator: &mut StorageAllocator,
        registry: &mut Registry,
    ) -> Result<(), ListError> {
        if self.nodes.is_empty() {
            return Ok(());
        }

        let snap_items = registry.snap_elements(self.key) as usize;
        let boundary_value = if snap_items == 0 {
            None
        } else {
            self.nodes.get(snap_items - 1).map(|n| n.value)
        };

        for idx in (0..self.nodes.len()).rev() {
            let node = self.nodes[idx];
            let is_live = node.phys_birth != 0 && self.live.get(&node.value) == Some(&idx);
            if !is_live {
                // A dead node's value carries no weight here: only the first *live* node
                // encountered is ever a removal candidate (§4.6.3).
                continue;
            }
            if let Some(boundary) = boundary_value {
                if node.value == boundary {
                    return Err(ListError::Conflict {
                        reason: format!(
                            "value {} at physical index {} is pinned by a snapshot observing the first {} elements",
                            node.value, idx, snap_items
                        ),
                    });
                }
            }
            self.push_back(store, allocator, registry, node.value, true)?;
            self.live.remove(&node.value);
            return Ok(());
        }

        Ok(())
    }

    /// Frees the entire physical chain and drops the registry entry. Refused with `Conflict` if
    /// any snapshot still points at this list.
    #[instrument(level = "debug", skip(self, store, allocator, registry))]
    pub fn clear(
        &mut self,
        store: &mut dyn BackingStore,
        allocator: &mut StorageAllocator,
        registry: &mut Registry,
    ) -> Result<(), ListError> {
        let record = registry.find(self.key).copied().ok_or_else(|| RegistryError::NotFound {
            reason: format!("list key {} has no registry entry", self.key),
        })?;

        if record.phys_next == 0 {
            registry.remove(store, self.key)?;
            self.nodes.clear();
            self.live.clear();
            return Ok(());
        }

        if registry.snap_elements(self.key) > 0 {
            return Err(ListError::Conflict {
                reason: format!("list key {} has live snapshots; refusing to clear", self.key),
            });
        }

        // Nodes are not contiguous: the allocator may have interleaved unrelated extents between
        // pushes. Free each node's own NODE_LEN extent individually, walking `phys_next` the same
        // way `rebuild` does, rather than treating the chain as one `nr_elements * NODE_LEN` run.
        let zeros = [0u8; NODE_LEN as usize];
        let mut cursor = record.phys_next;
        for _ in 0..record.nr_elements {
            let node = read_node(store, cursor)?;
            store.write(node.phys_curr, &zeros)?;
            allocator.deallocate(store, node.phys_curr, NODE_LEN)?;
            cursor = node.phys_next;
        }

        self.nodes.clear();
        self.live.clear();
        registry.remove(store, self.key)?;
        Ok(())
    }

    /// The live values, in physical (append) order — the "structural dump" side effect of §4.8.
    pub fn dump(&self) -> Vec<u64> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(idx, node)| self.live.get(&node.value) == Some(idx))
            .map(|(_, node)| node.value)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
