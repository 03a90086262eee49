//! Facade-level scenario tests and property tests, exercising the engine the way a real caller
//! would: through [`Engine`], not the individual C3-C7 components directly.

use persist_engine::bptree::{BPTree, Mapping};
use persist_engine::{Engine, EngineError, METASLAB_SIZE};
use proptest::prelude::*;
use tempfile::tempdir;

fn small_engine(dir: &std::path::Path, name: &str) -> Engine {
    persist_engine::EngineConfigBuilder::from_path(dir.join(name))
        .file_size(METASLAB_SIZE)
        .registry_region_size(8192)
        .open()
        .unwrap()
}

/// Scenario 5: list snapshot pin.
#[test]
fn scenario_list_snapshot_pin() {
    let dir = tempdir().unwrap();
    let mut engine = small_engine(dir.path(), "db");

    {
        let mut p = engine.bind_list("P").unwrap();
        p.push(10).unwrap();
        p.push(20).unwrap();
        p.push(30).unwrap();
    }

    engine.snapshot("C", "P").unwrap();

    {
        let mut p = engine.bind_list("P").unwrap();
        let err = p.pop().unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(p.dump(), vec![10, 20, 30]);

        p.push(40).unwrap();
        p.pop().unwrap();
        assert_eq!(p.dump(), vec![10, 20, 30]);
    }
}

/// Scenario 6: registry persistence across reopen. Creates three lists with one element each,
/// drops the engine, reopens the same backing file, and expects all three to still be there with
/// the same `phys_curr` values and `nr_elements == 1`.
#[test]
fn scenario_registry_persistence_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let (a_head, b_head, c_head) = {
        let mut engine = persist_engine::EngineConfigBuilder::from_path(&path)
            .file_size(METASLAB_SIZE)
            .registry_region_size(8192)
            .open()
            .unwrap();

        engine.bind_list("A").unwrap().push(1).unwrap();
        engine.bind_list("B").unwrap().push(2).unwrap();
        engine.bind_list("C").unwrap().push(3).unwrap();
        engine.flush().unwrap();

        let a = engine.bind_list("A").unwrap().dump();
        let b = engine.bind_list("B").unwrap().dump();
        let c = engine.bind_list("C").unwrap().dump();
        (a, b, c)
    };

    let mut reopened = persist_engine::EngineConfigBuilder::from_path(&path)
        .file_size(METASLAB_SIZE)
        .registry_region_size(8192)
        .open()
        .unwrap();

    assert!(reopened.contains("A"));
    assert!(reopened.contains("B"));
    assert!(reopened.contains("C"));

    assert_eq!(reopened.bind_list("A").unwrap().dump(), a_head);
    assert_eq!(reopened.bind_list("B").unwrap().dump(), b_head);
    assert_eq!(reopened.bind_list("C").unwrap().dump(), c_head);

    assert_eq!(reopened.bind_list("A").unwrap().len(), 1);
    assert_eq!(reopened.bind_list("B").unwrap().len(), 1);
    assert_eq!(reopened.bind_list("C").unwrap().len(), 1);
}

#[test]
fn opening_a_locked_backing_file_twice_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let _held = Engine::open(&path, METASLAB_SIZE).unwrap();
    let err = Engine::open(&path, METASLAB_SIZE).unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

fn mapping_for(key: u64) -> Mapping {
    Mapping {
        reference: key,
        offset: key,
        size: 8,
    }
}

fn assert_order_invariant(tree: &BPTree) {
    let keys = tree.inorder();
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "inorder traversal is not strictly ascending: {:?}", keys);
    }
}

fn assert_leaf_chain_invariant(tree: &BPTree) {
    let forward = tree.leaf_walk_forward();
    let mut reverse = tree.leaf_walk_reverse();
    reverse.reverse();
    assert_eq!(forward, reverse, "forward and reversed-reverse leaf walks disagree");
    assert_eq!(forward, tree.inorder(), "leaf walk disagrees with inorder traversal");
}

proptest! {
    /// Inserting a set of keys then removing them in the same order always empties the tree.
    #[test]
    fn round_trip_insert_then_remove_same_order_empties_the_tree(
        m in 3usize..8,
        mut keys in prop::collection::hash_set(0u64..500, 0..40),
    ) {
        let mut tree = BPTree::new(m).unwrap();
        let ordered: Vec<u64> = keys.drain().collect();

        for &key in &ordered {
            tree.insert(key, mapping_for(key)).unwrap();
            assert_order_invariant(&tree);
            assert_leaf_chain_invariant(&tree);
        }

        for &key in &ordered {
            tree.delete(key).unwrap();
            assert_order_invariant(&tree);
            assert_leaf_chain_invariant(&tree);
        }

        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.inorder(), Vec::<u64>::new());
        prop_assert_eq!(tree.leaf_walk_forward(), Vec::<u64>::new());
    }

    /// After every insert, across randomized branching factors and key sets, the tree stays
    /// globally ordered and its leaf chain stays consistent in both directions.
    #[test]
    fn invariants_hold_after_every_insert(
        m in 3usize..8,
        keys in prop::collection::vec(0u64..500, 0..60),
    ) {
        let mut tree = BPTree::new(m).unwrap();
        let mut seen = std::collections::HashSet::new();

        for key in keys {
            let result = tree.insert(key, mapping_for(key));
            if seen.insert(key) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(persist_engine::bptree::BPTreeError::AlreadyExists { .. })));
            }
            assert_order_invariant(&tree);
            assert_leaf_chain_invariant(&tree);
        }

        let mut expected: Vec<u64> = seen.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(tree.inorder(), expected);
    }
}
