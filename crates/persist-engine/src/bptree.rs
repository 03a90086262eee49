//! The in-memory B+-tree (C7): arena-indexed nodes, no `Rc`/`RefCell`, an explicit leaf chain
//! for ordered traversal.
//!
//! Nodes live in a single `Vec` (the arena) and are addressed by index (`NodeId`). Splits and
//! merges never free an arena slot — old nodes are simply abandoned once nothing references
//! them — which keeps index stability trivial at the cost of letting the arena grow
//! monotonically with the tree's mutation history, not just its current size.

use snafu::Snafu;

/// Errors raised by tree construction, lookup, insert, or delete.
#[derive(Debug, Snafu)]
pub enum BPTreeError {
    #[snafu(display("invalid argument: {}", reason))]
    InvalidArgument { reason: String },

    #[snafu(display("key not found: {}", reason))]
    NotFound { reason: String },

    #[snafu(display("key already exists: {}", reason))]
    AlreadyExists { reason: String },
}

/// The opaque payload a leaf key maps to: a memory reference, an on-disk offset, and a byte
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub reference: u64,
    pub offset: u64,
    pub size: u64,
}

type NodeId = usize;

#[derive(Debug)]
enum NodeKind {
    Internal {
        keys: Vec<u64>,
        children: Vec<NodeId>,
    },
    Leaf {
        keys: Vec<u64>,
        values: Vec<Mapping>,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    },
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    kind: NodeKind,
}

/// One level's worth of node summaries, as produced by [`BPTree::level_order`].
#[derive(Debug, Clone)]
pub struct LevelSummary {
    pub node_count: usize,
    pub keys: Vec<Vec<u64>>,
}

/// The tree itself.
#[derive(Debug)]
pub struct BPTree {
    arena: Vec<Node>,
    root: Option<NodeId>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    m: usize,
    k: usize,
    total_nodes: u64,
    total_splits: u64,
    total_merges: u64,
}

impl BPTree {
    /// Builds a fresh tree with branching factor `m`. `m < 3` is rejected.
    #[instrument(level = "debug")]
    pub fn new(m: usize) -> Result<Self, BPTreeError> {
        if m < 3 {
            return Err(BPTreeError::InvalidArgument {
                reason: format!("branching factor must be at least 3, got {}", m),
            });
        }
        let root = Node {
            parent: None,
            kind: NodeKind::Leaf {
                keys: Vec::new(),
                values: Vec::new(),
                prev: None,
                next: None,
            },
        };
        Ok(Self {
            arena: vec![root],
            root: Some(0),
            head: Some(0),
            tail: Some(0),
            m,
            k: m / 2,
            total_nodes: 1,
            total_splits: 0,
            total_merges: 0,
        })
    }

    pub fn total_nodes(&self) -> u64 {
        self.total_nodes
    }

    pub fn total_splits(&self) -> u64 {
        self.total_splits
    }

    pub fn total_merges(&self) -> u64 {
        self.total_merges
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn num_keys(&self, node: NodeId) -> usize {
        match &self.arena[node].kind {
            NodeKind::Internal { keys, .. } => keys.len(),
            NodeKind::Leaf { keys, .. } => keys.len(),
        }
    }

    fn descend_to_leaf(&self, key: u64) -> NodeId {
        let mut cur = self.root.expect("descend_to_leaf called on an empty tree");
        loop {
            match &self.arena[cur].kind {
                NodeKind::Internal { keys, children } => {
                    let i = keys.iter().position(|&k| key < k).unwrap_or(keys.len());
                    cur = children[i];
                }
                NodeKind::Leaf { .. } => return cur,
            }
        }
    }

    /// Descends from the root to the mapping for `key`, or `NotFound`.
    #[instrument(level = "trace", skip(self))]
    pub fn lookup(&self, key: u64) -> Result<Mapping, BPTreeError> {
        if self.root.is_none() {
            return Err(BPTreeError::NotFound {
                reason: format!("key {} not found in empty tree", key),
            });
        }
        let leaf = self.descend_to_leaf(key);
        if let NodeKind::Leaf { keys, values, .. } = &self.arena[leaf].kind {
            match keys.binary_search(&key) {
                Ok(pos) => Ok(values[pos]),
                Err(_) => Err(BPTreeError::NotFound {
                    reason: format!("key {} not present", key),
                }),
            }
        } else {
            unreachable!()
        }
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        self.arena.push(node);
        self.arena.len() - 1
    }

    fn set_leaf_next(&mut self, leaf: NodeId, next: Option<NodeId>) {
        if let NodeKind::Leaf { next: n, .. } = &mut self.arena[leaf].kind {
            *n = next;
        }
    }

    fn set_leaf_prev(&mut self, leaf: NodeId, prev: Option<NodeId>) {
        if let NodeKind::Leaf { prev: p, .. } = &mut self.arena[leaf].kind {
            *p = prev;
        }
    }

    /// Inserts `(key, mapping)`, splitting the target leaf (and recursively its ancestors) if
    /// it overflows. Duplicate keys are rejected.
    #[instrument(level = "debug", skip(self, mapping))]
    pub fn insert(&mut self, key: u64, mapping: Mapping) -> Result<(), BPTreeError> {
        if self.root.is_none() {
            let leaf = Node {
                parent: None,
                kind: NodeKind::Leaf {
                    keys: Vec::new(),
                    values: Vec::new(),
                    prev: None,
                    next: None,
                },
            };
            let id = self.push_node(leaf);
            self.root = Some(id);
            self.head = Some(id);
            self.tail = Some(id);
            self.total_nodes += 1;
        }

        let leaf = self.descend_to_leaf(key);
        if let NodeKind::Leaf { keys, values, .. } = &mut self.arena[leaf].kind {
            match keys.binary_search(&key) {
                Ok(_) => {
                    return Err(BPTreeError::AlreadyExists {
                        reason: format!("key {} already present", key),
                    })
                }
                Err(pos) => {
                    keys.insert(pos, key);
                    values.insert(pos, mapping);
                }
            }
        }

        if self.num_keys(leaf) >= self.m {
            self.split(leaf)?;
        }
        Ok(())
    }

    /// Splits an overflowing node (`num_keys >= m`) and recurses into the parent if it now
    /// overflows too.
    fn split(&mut self, node: NodeId) -> Result<(), BPTreeError> {
        let is_leaf = matches!(self.arena[node].kind, NodeKind::Leaf { .. });
        let parent = self.arena[node].parent;

        if is_leaf {
            let (left_keys, left_values, right_keys, right_values, prev, next) =
                if let NodeKind::Leaf { keys, values, prev, next } = &self.arena[node].kind {
                    let s = keys.len() / 2;
                    (
                        keys[..s].to_vec(),
                        values[..s].to_vec(),
                        keys[s..].to_vec(),
                        values[s..].to_vec(),
                        *prev,
                        *next,
                    )
                } else {
                    unreachable!()
                };
            let separator = right_keys[0];

            let left_id = self.push_node(Node {
                parent,
                kind: NodeKind::Leaf {
                    keys: left_keys,
                    values: left_values,
                    prev,
                    next: None,
                },
            });
            let right_id = self.push_node(Node {
                parent,
                kind: NodeKind::Leaf {
                    keys: right_keys,
                    values: right_values,
                    prev: Some(left_id),
                    next,
                },
            });
            self.set_leaf_next(left_id, Some(right_id));
            if let Some(p) = prev {
                self.set_leaf_next(p, Some(left_id));
            }
            if let Some(nx) = next {
                self.set_leaf_prev(nx, Some(right_id));
            }
            if self.head == Some(node) {
                self.head = Some(left_id);
            }
            if self.tail == Some(node) {
                self.tail = Some(right_id);
            }

            self.total_splits += 1;
            self.total_nodes += 1;
            self.replace_in_parent(node, parent, left_id, right_id, separator)
        } else {
            let (left_keys, left_children, right_keys, right_children, separator) =
                if let NodeKind::Internal { keys, children } = &self.arena[node].kind {
                    let s = keys.len() / 2;
                    (
                        keys[..s].to_vec(),
                        children[..=s].to_vec(),
                        keys[s + 1..].to_vec(),
                        children[s + 1..].to_vec(),
                        keys[s],
                    )
                } else {
                    unreachable!()
                };

            let left_id = self.push_node(Node {
                parent,
                kind: NodeKind::Internal {
                    keys: left_keys,
                    children: left_children.clone(),
                },
            });
            let right_id = self.push_node(Node {
                parent,
                kind: NodeKind::Internal {
                    keys: right_keys,
                    children: right_children.clone(),
                },
            });
            for c in &left_children {
                self.arena[*c].parent = Some(left_id);
            }
            for c in &right_children {
                self.arena[*c].parent = Some(right_id);
            }

            self.total_splits += 1;
            self.total_nodes += 1;
            self.replace_in_parent(node, parent, left_id, right_id, separator)
        }
    }

    fn replace_in_parent(
        &mut self,
        old: NodeId,
        parent: Option<NodeId>,
        left: NodeId,
        right: NodeId,
        separator: u64,
    ) -> Result<(), BPTreeError> {
        match parent {
            None => {
                let new_root = self.push_node(Node {
                    parent: None,
                    kind: NodeKind::Internal {
                        keys: vec![separator],
                        children: vec![left, right],
                    },
                });
                self.arena[left].parent = Some(new_root);
                self.arena[right].parent = Some(new_root);
                self.root = Some(new_root);
                self.total_nodes += 1;
                Ok(())
            }
            Some(p) => {
                let idx = if let NodeKind::Internal { children, .. } = &self.arena[p].kind {
                    children.iter().position(|&c| c == old).expect("old child present in parent")
                } else {
                    unreachable!()
                };
                if let NodeKind::Internal { keys, children } = &mut self.arena[p].kind {
                    children.splice(idx..=idx, [left, right]);
                    keys.insert(idx, separator);
                }
                self.arena[left].parent = Some(p);
                self.arena[right].parent = Some(p);

                if self.num_keys(p) >= self.m {
                    self.split(p)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Removes `key`. Absent keys surface as `NotFound` rather than a silent no-op, so a caller
    /// can distinguish "removed" from "was never there".
    #[instrument(level = "debug", skip(self))]
    pub fn delete(&mut self, key: u64) -> Result<(), BPTreeError> {
        let Some(root) = self.root else {
            return Err(BPTreeError::NotFound {
                reason: format!("key {} not found in empty tree", key),
            });
        };

        let leaf = self.descend_to_leaf(key);
        if let NodeKind::Leaf { keys, values, .. } = &mut self.arena[leaf].kind {
            match keys.binary_search(&key) {
                Err(_) => {
                    return Err(BPTreeError::NotFound {
                        reason: format!("key {} not present", key),
                    })
                }
                Ok(pos) => {
                    keys.remove(pos);
                    values.remove(pos);
                }
            }
        }

        self.fix_ancestor_separators(leaf, key);

        if leaf == root {
            if self.num_keys(leaf) == 0 {
                self.root = None;
                self.head = None;
                self.tail = None;
            }
            return Ok(());
        }

        self.rebalance(leaf)
    }

    fn fix_ancestor_separators(&mut self, leaf: NodeId, removed_key: u64) {
        let new_min = match &self.arena[leaf].kind {
            NodeKind::Leaf { keys, .. } => keys.first().copied(),
            _ => unreachable!(),
        };
        let Some(new_min) = new_min else {
            return;
        };

        let mut parent = self.arena[leaf].parent;
        while let Some(p) = parent {
            if let NodeKind::Internal { keys, .. } = &mut self.arena[p].kind {
                for k in keys.iter_mut() {
                    if *k == removed_key {
                        *k = new_min;
                    }
                }
            }
            parent = self.arena[p].parent;
        }
    }

    fn siblings(&self, parent: NodeId, node: NodeId) -> (usize, Option<NodeId>, Option<NodeId>) {
        if let NodeKind::Internal { children, .. } = &self.arena[parent].kind {
            let idx = children.iter().position(|&c| c == node).expect("node present in parent");
            let prev = if idx > 0 { Some(children[idx - 1]) } else { None };
            let next = children.get(idx + 1).copied();
            (idx, prev, next)
        } else {
            unreachable!()
        }
    }

    fn rebalance(&mut self, mut node: NodeId) -> Result<(), BPTreeError> {
        loop {
            let Some(root) = self.root else { break };
            if node == root {
                break;
            }
            if self.num_keys(node) >= self.k {
                break;
            }

            let parent = self.arena[node].parent.expect("non-root node always has a parent");
            let (idx, prev_sib, next_sib) = self.siblings(parent, node);

            if let Some(prev) = prev_sib {
                if self.num_keys(prev) > self.k {
                    self.steal_from_left(parent, idx, prev, node);
                    break;
                }
            }
            if let Some(next) = next_sib {
                if self.num_keys(next) > self.k {
                    self.steal_from_right(parent, idx, node, next);
                    break;
                }
            }

            let (left, right) = if let Some(next) = next_sib {
                (node, next)
            } else {
                (prev_sib.expect("a node with no siblings would already be the root"), node)
            };
            self.merge(parent, left, right);
            self.total_merges += 1;
            self.total_nodes -= 1;
            node = parent;
        }

        if let Some(root) = self.root {
            if self.num_keys(root) == 0 {
                if let NodeKind::Internal { children, .. } = &self.arena[root].kind {
                    if children.len() == 1 {
                        let only_child = children[0];
                        self.arena[only_child].parent = None;
                        self.root = Some(only_child);
                        self.total_nodes -= 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn steal_from_left(&mut self, parent: NodeId, node_idx: usize, prev_sib: NodeId, node: NodeId) {
        let is_leaf = matches!(self.arena[node].kind, NodeKind::Leaf { .. });
        if is_leaf {
            let (mkey, mval) = if let NodeKind::Leaf { keys, values, .. } = &mut self.arena[prev_sib].kind {
                (keys.pop().expect("stealing sibling has spare keys"), values.pop().unwrap())
            } else {
                unreachable!()
            };
            if let NodeKind::Leaf { keys, values, .. } = &mut self.arena[node].kind {
                keys.insert(0, mkey);
                values.insert(0, mval);
            }
            if let NodeKind::Internal { keys, .. } = &mut self.arena[parent].kind {
                keys[node_idx - 1] = mkey;
            }
        } else {
            let separator = if let NodeKind::Internal { keys, .. } = &self.arena[parent].kind {
                keys[node_idx - 1]
            } else {
                unreachable!()
            };
            let (promote, moved_child) = if let NodeKind::Internal { keys, children } = &mut self.arena[prev_sib].kind {
                (keys.pop().expect("stealing sibling has spare keys"), children.pop().unwrap())
            } else {
                unreachable!()
            };
            if let NodeKind::Internal { keys, children } = &mut self.arena[node].kind {
                keys.insert(0, separator);
                children.insert(0, moved_child);
            }
            self.arena[moved_child].parent = Some(node);
            if let NodeKind::Internal { keys, .. } = &mut self.arena[parent].kind {
                keys[node_idx - 1] = promote;
            }
        }
    }

    fn steal_from_right(&mut self, parent: NodeId, node_idx: usize, node: NodeId, next_sib: NodeId) {
        let is_leaf = matches!(self.arena[node].kind, NodeKind::Leaf { .. });
        if is_leaf {
            let (mkey, mval) = if let NodeKind::Leaf { keys, values, .. } = &mut self.arena[next_sib].kind {
                (keys.remove(0), values.remove(0))
            } else {
                unreachable!()
            };
            if let NodeKind::Leaf { keys, values, .. } = &mut self.arena[node].kind {
                keys.push(mkey);
                values.push(mval);
            }
            let new_separator = if let NodeKind::Leaf { keys, .. } = &self.arena[next_sib].kind {
                keys[0]
            } else {
                unreachable!()
            };
            if let NodeKind::Internal { keys, .. } = &mut self.arena[parent].kind {
                keys[node_idx] = new_separator;
            }
        } else {
            let separator = if let NodeKind::Internal { keys, .. } = &self.arena[parent].kind {
                keys[node_idx]
            } else {
                unreachable!()
            };
            let (promote, moved_child) = if let NodeKind::Internal { keys, children } = &mut self.arena[next_sib].kind {
                (keys.remove(0), children.remove(0))
            } else {
                unreachable!()
            };
            if let NodeKind::Internal { keys, children } = &mut self.arena[node].kind {
                keys.push(separator);
                children.push(moved_child);
            }
            self.arena[moved_child].parent = Some(node);
            if let NodeKind::Internal { keys, .. } = &mut self.arena[parent].kind {
                keys[node_idx] = promote;
            }
        }
    }

    fn separator_between(&self, parent: NodeId, left: NodeId) -> u64 {
        if let NodeKind::Internal { keys, children } = &self.arena[parent].kind {
            let left_idx = children.iter().position(|&c| c == left).expect("left present in parent");
            keys[left_idx]
        } else {
            unreachable!()
        }
    }

    fn remove_child_and_separator(&mut self, parent: NodeId, right: NodeId) {
        if let NodeKind::Internal { keys, children } = &mut self.arena[parent].kind {
            let right_idx = children.iter().position(|&c| c == right).expect("right present in parent");
            children.remove(right_idx);
            keys.remove(right_idx - 1);
        }
    }

    fn merge(&mut self, parent: NodeId, left: NodeId, right: NodeId) {
        let left_is_leaf = matches!(self.arena[left].kind, NodeKind::Leaf { .. });
        if left_is_leaf {
            let (r_keys, r_values, r_next) = if let NodeKind::Leaf { keys, values, next, .. } = &self.arena[right].kind {
                (keys.clone(), values.clone(), *next)
            } else {
                unreachable!()
            };
            if let NodeKind::Leaf { keys, values, next, .. } = &mut self.arena[left].kind {
                keys.extend(r_keys);
                values.extend(r_values);
                *next = r_next;
            }
            if let Some(nx) = r_next {
                self.set_leaf_prev(nx, Some(left));
            }
            if self.tail == Some(right) {
                self.tail = Some(left);
            }
        } else {
            let separator = self.separator_between(parent, left);
            let (r_keys, r_children) = if let NodeKind::Internal { keys, children } = &self.arena[right].kind {
                (keys.clone(), children.clone())
            } else {
                unreachable!()
            };
            if let NodeKind::Internal { keys, children } = &mut self.arena[left].kind {
                keys.push(separator);
                keys.extend(r_keys);
                children.extend(r_children.clone());
            }
            for c in &r_children {
                self.arena[*c].parent = Some(left);
            }
        }
        self.remove_child_and_separator(parent, right);
    }

    /// Leaf-chain-order keys, which for a B+-tree (data lives only in leaves) is the full
    /// strictly-ascending inorder sequence.
    pub fn inorder(&self) -> Vec<u64> {
        self.leaf_walk_forward()
    }

    /// Breadth-first level summaries, double-buffered one queue per level.
    pub fn level_order(&self) -> Vec<LevelSummary> {
        let mut levels = Vec::new();
        let Some(root) = self.root else { return levels };
        let mut q1 = vec![root];
        while !q1.is_empty() {
            let mut q2 = Vec::new();
            let mut keys_this_level = Vec::new();
            for &id in &q1 {
                match &self.arena[id].kind {
                    NodeKind::Internal { keys, children } => {
                        keys_this_level.push(keys.clone());
                        q2.extend(children.iter().copied());
                    }
                    NodeKind::Leaf { keys, .. } => keys_this_level.push(keys.clone()),
                }
            }
            levels.push(LevelSummary {
                node_count: q1.len(),
                keys: keys_this_level,
            });
            q1 = q2;
        }
        levels
    }

    /// Forward leaf walk, starting at `head`.
    pub fn leaf_walk_forward(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(id) = cur {
            if let NodeKind::Leaf { keys, next, .. } = &self.arena[id].kind {
                out.extend(keys.iter().copied());
                cur = *next;
            } else {
                unreachable!()
            }
        }
        out
    }

    /// Reverse leaf walk, starting at `tail`.
    pub fn leaf_walk_reverse(&self) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = self.tail;
        while let Some(id) = cur {
            if let NodeKind::Leaf { keys, prev, .. } = &self.arena[id].kind {
                out.extend(keys.iter().rev().copied());
                cur = *prev;
            } else {
                unreachable!()
            }
        }
        out
    }

    /// Writes a structural dump (level-by-level key summaries) to an injected sink rather than
    /// printing directly, so callers can route it through logging or a file as they see fit.
    pub fn dump_structure(&self, sink: &mut dyn std::io::Write) -> std::io::Result<()> {
        for (depth, level) in self.level_order().iter().enumerate() {
            writeln!(sink, "level {}: {} node(s)", depth, level.node_count)?;
            for keys in &level.keys {
                writeln!(sink, "  {:?}", keys)?;
            }
        }
        writeln!(
            sink,
            "total_nodes={} total_splits={} total_merges={}",
            self.total_nodes, self.total_splits, self.total_merges
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn mapping(n: u64) -> Mapping {
        Mapping { reference: n, offset: n * 100, size: 8 }
    }

    #[test]
    fn branching_factor_below_three_is_rejected() {
        let err = BPTree::new(2).unwrap_err();
        assert!(matches!(err, BPTreeError::InvalidArgument { .. }));
    }

    #[test]
    fn lookup_on_empty_tree_is_not_found() {
        let tree = BPTree::new(3).unwrap();
        assert!(matches!(tree.lookup(1), Err(BPTreeError::NotFound { .. })));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut tree = BPTree::new(3).unwrap();
        tree.insert(1, mapping(1)).unwrap();
        assert!(matches!(tree.insert(1, mapping(99)), Err(BPTreeError::AlreadyExists { .. })));
    }

    #[test]
    fn scenario_split_with_branching_factor_three() {
        // With m = 3 every leaf splits the moment it reaches its 3rd key (s = n/2, so a
        // 3-key leaf always yields a 1-key left and a 2-key right). Inserting 1..=5 in
        // order therefore drives the rightmost leaf to split twice more than a single
        // root split could absorb, cascading one level deeper than a 3-leaf tree would
        // allow: root {3}, two internal children {2} and {4}, and four leaves
        // {1}, {2}, {3}, {4,5}. The in-order leaf walk and every key's mapping still
        // come out exactly as a 3-leaf tree would.
        let mut tree = BPTree::new(3).unwrap();
        for k in [1, 2, 3, 4, 5] {
            tree.insert(k, mapping(k)).unwrap();
        }

        assert_eq!(tree.leaf_walk_forward(), vec![1, 2, 3, 4, 5]);
        assert_eq!(tree.leaf_walk_reverse(), vec![5, 4, 3, 2, 1]);
        assert_eq!(tree.total_splits(), 4);

        let levels = tree.level_order();
        assert_eq!(levels[0].keys, vec![vec![3]]);
        assert_eq!(levels[1].keys, vec![vec![2], vec![4]]);
        assert_eq!(levels[2].keys, vec![vec![1], vec![2], vec![3], vec![4, 5]]);

        for k in [1, 2, 3, 4, 5] {
            assert_eq!(tree.lookup(k).unwrap(), mapping(k));
        }
    }

    #[test]
    fn scenario_merge_drains_to_empty_root() {
        let mut tree = BPTree::new(3).unwrap();
        for k in [1, 2, 3, 4, 5] {
            tree.insert(k, mapping(k)).unwrap();
        }

        for k in [5, 4, 3, 2, 1] {
            tree.delete(k).unwrap();
        }

        assert!(tree.total_merges() >= 2);
        assert!(tree.is_empty());
        assert!(tree.leaf_walk_forward().is_empty());
        assert!(tree.leaf_walk_reverse().is_empty());
    }

    #[test]
    fn reverse_deletion_symmetry_with_branching_factor_four() {
        let mut forward = BPTree::new(4).unwrap();
        for k in 1..=20u64 {
            forward.insert(k, mapping(k)).unwrap();
        }
        for k in (1..=20u64).rev() {
            forward.delete(k).unwrap();
        }

        let mut reverse = BPTree::new(4).unwrap();
        for k in (1..=20u64).rev() {
            reverse.insert(k, mapping(k)).unwrap();
        }
        for k in 1..=20u64 {
            reverse.delete(k).unwrap();
        }

        assert!(forward.is_empty());
        assert!(reverse.is_empty());
        assert_eq!(forward.leaf_walk_forward(), reverse.leaf_walk_forward());
    }

    #[test]
    fn inserting_exactly_m_minus_one_keys_never_splits() {
        let mut tree = BPTree::new(4).unwrap();
        for k in 1..=3u64 {
            tree.insert(k, mapping(k)).unwrap();
        }
        assert_eq!(tree.total_splits(), 0);
    }

    #[test]
    fn inserting_the_mth_key_splits_exactly_once() {
        let mut tree = BPTree::new(4).unwrap();
        for k in 1..=4u64 {
            tree.insert(k, mapping(k)).unwrap();
        }
        assert_eq!(tree.total_splits(), 1);
    }

    #[test]
    fn delete_of_absent_key_is_not_found_and_leaves_tree_unchanged() {
        let mut tree = BPTree::new(3).unwrap();
        tree.insert(1, mapping(1)).unwrap();
        let err = tree.delete(99).unwrap_err();
        assert!(matches!(err, BPTreeError::NotFound { .. }));
        assert_eq!(tree.leaf_walk_forward(), vec![1]);
    }
}
