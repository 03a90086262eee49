//! The [`Engine`] facade: wires the storage allocator, registry, and the list/B+-tree handles
//! bound to it behind one entry point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fslock::LockFile;
use snafu::{ensure, ResultExt};

use crate::allocator::StorageAllocator;
use crate::bptree::BPTree;
use crate::error::{ConflictSnafu, InvalidArgumentSnafu, IoSnafu};
use crate::io::{BackingStore, MmapStore};
use crate::list::{hash_id, PersistentLinkList};
use crate::registry::{Registry, RegistryKind};
use crate::{EngineError, Result, METASLAB_SIZE, REGISTRY_REGION_SIZE};

fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

/// Builder for [`Engine::open`]: a path is required up front, everything else defaults and can
/// be overridden before `open`.
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    path: PathBuf,
    file_size: Option<u64>,
    registry_region_size: Option<u64>,
}

impl EngineConfigBuilder {
    /// Starts a builder for the backing file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file_size: None,
            registry_region_size: None,
        }
    }

    /// Total size, in bytes, of the backing file. Defaults to one metaslab
    /// ([`crate::METASLAB_SIZE`]). Must be at least one metaslab.
    pub fn file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }

    /// Size, in bytes, of the registry region carved from metaslab 0. Defaults to
    /// [`crate::REGISTRY_REGION_SIZE`].
    pub fn registry_region_size(mut self, bytes: u64) -> Self {
        self.registry_region_size = Some(bytes);
        self
    }

    /// Validates the builder's parameters and opens the engine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `file_size` is smaller than one metaslab or
    /// `registry_region_size` is zero, `Conflict` if another process already holds the backing
    /// file's lock, and `IO`/`Corruption` for failures opening or replaying the backing store.
    #[instrument(level = "info", skip(self))]
    pub fn open(self) -> Result<Engine> {
        let file_size = self.file_size.unwrap_or(METASLAB_SIZE);
        let registry_region_size = self.registry_region_size.unwrap_or(REGISTRY_REGION_SIZE);

        ensure!(
            file_size >= METASLAB_SIZE,
            InvalidArgumentSnafu {
                reason: format!(
                    "file_size {} is smaller than one metaslab ({} bytes)",
                    file_size, METASLAB_SIZE
                ),
            }
        );
        ensure!(
            registry_region_size > 0,
            InvalidArgumentSnafu {
                reason: "registry_region_size must be greater than zero".to_string(),
            }
        );

        let lock_path = lock_path_for(&self.path);
        let mut lock = LockFile::open(&lock_path).context(IoSnafu)?;
        let acquired = lock.try_lock().context(IoSnafu)?;
        ensure!(
            acquired,
            ConflictSnafu {
                reason: format!("backing file {} is already locked by another process", self.path.display()),
            }
        );

        let mut store: Box<dyn BackingStore> = Box::new(MmapStore::open(&self.path, file_size).context(IoSnafu)?);

        let mut allocator = StorageAllocator::open(store.as_mut(), 0, file_size)?;
        let registry = Registry::open(store.as_mut(), &mut allocator, registry_region_size)?;

        info!(path = %self.path.display(), file_size, "Engine opened.");
        Ok(Engine {
            store,
            allocator,
            registry,
            _lock: lock,
            lists: HashMap::new(),
            bptrees: HashMap::new(),
        })
    }
}

/// The facade tying together the storage allocator, registry, and the data-structure handles
/// bound to it. Single-threaded/synchronous: no internal locking beyond the exclusive file lock
/// acquired at open.
pub struct Engine {
    store: Box<dyn BackingStore>,
    allocator: StorageAllocator,
    registry: Registry,
    _lock: LockFile,
    lists: HashMap<u64, PersistentLinkList>,
    bptrees: HashMap<u64, BPTree>,
}

impl Engine {
    /// Opens (or creates) the engine backed by `path`, sized to `file_size` bytes, with default
    /// configuration. Equivalent to
    /// `EngineConfigBuilder::from_path(path).file_size(file_size).open()`.
    pub fn open<P: AsRef<Path>>(path: P, file_size: u64) -> Result<Engine> {
        EngineConfigBuilder::from_path(path).file_size(file_size).open()
    }

    /// Creates or reopens the `LIST`-typed registry entry for `id`, returning a handle bound to
    /// it. Rebinding an id already bound this session reuses the cached in-memory list rather
    /// than re-scanning the physical chain.
    #[instrument(level = "debug", skip(self))]
    pub fn bind_list(&mut self, id: &str) -> Result<ListHandle<'_>> {
        let key = hash_id(id);
        if !self.lists.contains_key(&key) {
            let list = PersistentLinkList::bind(self.store.as_mut(), &mut self.registry, id)?;
            self.lists.insert(key, list);
        }
        Ok(ListHandle { engine: self, key })
    }

    /// Registry-level snapshot: creates a new entry `child_id` pinned to `parent_id`'s current
    /// `phys_next`/`nr_elements`.
    #[instrument(level = "debug", skip(self))]
    pub fn snapshot(&mut self, child_id: &str, parent_id: &str) -> Result<()> {
        let child_key = hash_id(child_id);
        let parent_key = hash_id(parent_id);
        self.registry.snapshot(self.store.as_mut(), child_key, parent_key)?;
        // Any cached handle under the child id predates the snapshot and is now stale.
        self.lists.remove(&child_key);
        Ok(())
    }

    /// Creates a named in-memory B+-tree with branching factor `m`, registering its name/kind in
    /// the registry. The tree itself is a pure in-memory structure: the registry entry exists
    /// only so the CLI can discover the id and dispatch by kind, not to persist node contents
    /// across restarts (those never touch the backing store).
    #[instrument(level = "debug", skip(self))]
    pub fn create_bptree(&mut self, id: &str, m: usize) -> Result<()> {
        let key = hash_id(id);
        if self.registry.find(key).is_none() {
            self.registry.insert(self.store.as_mut(), key, RegistryKind::BPTree)?;
        }
        let tree = BPTree::new(m)?;
        self.bptrees.insert(key, tree);
        Ok(())
    }

    /// Drops a named B+-tree and its registry entry.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_bptree(&mut self, id: &str) -> Result<()> {
        let key = hash_id(id);
        self.bptrees.remove(&key);
        self.registry.remove(self.store.as_mut(), key)?;
        Ok(())
    }

    /// Borrows the named B+-tree, if one has been created this session.
    pub fn bptree_mut(&mut self, id: &str) -> Option<&mut BPTree> {
        self.bptrees.get_mut(&hash_id(id))
    }

    /// Borrows the named B+-tree, if one has been created this session.
    pub fn bptree(&self, id: &str) -> Option<&BPTree> {
        self.bptrees.get(&hash_id(id))
    }

    /// `true` if the registry has a live entry for `id`, of any kind.
    pub fn contains(&self, id: &str) -> bool {
        self.registry.find(hash_id(id)).is_some()
    }

    /// Flushes the backing store, driving durability at teardown (§4.1).
    pub fn flush(&self) -> Result<()> {
        self.store.flush().map_err(EngineError::from)
    }
}

/// A handle to one persistent linked list, borrowing the [`Engine`] it's bound to (§6.1). Only
/// one handle (for any id) can be live at a time, which is exactly the single-threaded,
/// sequential-call discipline §5 requires: drop the handle to get another.
pub struct ListHandle<'a> {
    engine: &'a mut Engine,
    key: u64,
}

impl ListHandle<'_> {
    /// Appends `value` to the tail.
    pub fn push(&mut self, value: u64) -> Result<()> {
        let Engine { store, allocator, registry, lists, .. } = &mut *self.engine;
        let list = lists.get_mut(&self.key).expect("bind_list always populates its own entry");
        list.push_back(store.as_mut(), allocator, registry, value, false)?;
        Ok(())
    }

    /// Logically removes the current tail (§4.6.3). A no-op on an empty list; `Conflict` if the
    /// tail is pinned by a snapshot.
    pub fn pop(&mut self) -> Result<()> {
        let Engine { store, allocator, registry, lists, .. } = &mut *self.engine;
        let list = lists.get_mut(&self.key).expect("bind_list always populates its own entry");
        list.pop_back(store.as_mut(), allocator, registry)?;
        Ok(())
    }

    /// Frees the entire chain and removes the registry entry (§4.6.4). Refused with `Conflict`
    /// if a live snapshot still observes this list.
    pub fn clear(&mut self) -> Result<()> {
        let Engine { store, allocator, registry, lists, .. } = &mut *self.engine;
        let list = lists.get_mut(&self.key).expect("bind_list always populates its own entry");
        list.clear(store.as_mut(), allocator, registry)?;
        lists.remove(&self.key);
        Ok(())
    }

    /// The live values, in physical append order.
    pub fn dump(&self) -> Vec<u64> {
        self.engine.lists.get(&self.key).map(PersistentLinkList::dump).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.engine.lists.get(&self.key).map_or(0, PersistentLinkList::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_engine(dir: &std::path::Path, name: &str) -> Engine {
        EngineConfigBuilder::from_path(dir.join(name))
            .file_size(METASLAB_SIZE)
            .registry_region_size(8192)
            .open()
            .unwrap()
    }

    #[test]
    fn file_size_below_one_metaslab_is_rejected() {
        let dir = tempdir().unwrap();
        let err = EngineConfigBuilder::from_path(dir.path().join("db"))
            .file_size(METASLAB_SIZE - 1)
            .open()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }

    #[test]
    fn bind_push_pop_round_trips_through_a_handle() {
        let dir = tempdir().unwrap();
        let mut engine = small_engine(dir.path(), "db");

        {
            let mut list = engine.bind_list("P").unwrap();
            list.push(10).unwrap();
            list.push(20).unwrap();
            assert_eq!(list.dump(), vec![10, 20]);
        }
        {
            let mut list = engine.bind_list("P").unwrap();
            list.pop().unwrap();
            assert_eq!(list.dump(), vec![10]);
        }
    }

    #[test]
    fn snapshot_pins_the_parents_tail() {
        let dir = tempdir().unwrap();
        let mut engine = small_engine(dir.path(), "db");

        {
            let mut list = engine.bind_list("P").unwrap();
            list.push(1).unwrap();
            list.push(2).unwrap();
        }
        engine.snapshot("C", "P").unwrap();

        let mut list = engine.bind_list("P").unwrap();
        let err = list.pop().unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[test]
    fn opening_the_same_file_twice_is_a_conflict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let _first = EngineConfigBuilder::from_path(&path).file_size(METASLAB_SIZE).open().unwrap();
        let err = EngineConfigBuilder::from_path(&path).file_size(METASLAB_SIZE).open().unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
    }

    #[test]
    fn bptree_create_and_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let mut engine = small_engine(dir.path(), "db");
        engine.create_bptree("idx", 4).unwrap();

        let tree = engine.bptree_mut("idx").unwrap();
        tree.insert(1, crate::bptree::Mapping { reference: 0, offset: 0, size: 8 }).unwrap();
        assert!(tree.lookup(1).is_ok());
        assert!(engine.contains("idx"));
    }
}
