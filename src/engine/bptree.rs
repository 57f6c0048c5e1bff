//! B+Tree backend.
//!
//! Order-bounded nodes stored in an arena (`Vec<Node>` addressed by
//! index); parents are never stored — the descent records a path
//! stack and rebalancing walks it back up. Leaves form a forward
//! chain for range scans.
//!
//! Structure rules, for order `m` (max keys per node):
//! - a node splits when it exceeds `m` keys; the leaf split copies
//!   the right half's first key up as separator, the internal split
//!   moves its middle key up;
//! - a non-root node underflowing below `m / 2` keys first borrows
//!   from an adjacent sibling, then merges with one, possibly
//!   cascading to the root;
//! - the root collapses into its only child when it runs out of
//!   separators, shrinking the height.

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, ErrorKind, Result};
use crate::metrics::EngineExtras;

use super::{EngineOp, StorageEngine};

/// Default maximum keys per node.
pub const DEFAULT_ORDER: usize = 32;

type NodeId = usize;

#[derive(Debug, Default)]
enum Node {
    Internal {
        /// Separator keys; `keys[i]` is the smallest key reachable
        /// through `children[i + 1]`.
        keys: Vec<Bytes>,
        children: Vec<NodeId>,
    },
    Leaf {
        keys: Vec<Bytes>,
        values: Vec<Bytes>,
        next: Option<NodeId>,
    },
    /// Arena slot on the free list.
    #[default]
    Free,
}

struct BPlusTree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    order: usize,
    len: usize,
    height: u64,
    splits: u64,
    merges: u64,
}

impl BPlusTree {
    fn new(order: usize) -> Self {
        let root = Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
            next: None,
        };
        Self {
            nodes: vec![root],
            free: Vec::new(),
            root: 0,
            order: order.max(3),
            len: 0,
            height: 1,
            splits: 0,
            merges: 0,
        }
    }

    fn min_keys(&self) -> usize {
        self.order / 2
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::Free;
        self.free.push(id);
    }

    /// Descends to the leaf covering `key`, recording
    /// `(internal_id, child_index)` for every step.
    fn find_leaf(&self, key: &[u8]) -> (NodeId, Vec<(NodeId, usize)>) {
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            match &self.nodes[current] {
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| k.as_ref() <= key);
                    path.push((current, idx));
                    current = children[idx];
                }
                Node::Leaf { .. } => return (current, path),
                Node::Free => unreachable!("descent reached a freed node"),
            }
        }
    }

    fn get(&self, key: &[u8]) -> Option<Bytes> {
        let (leaf, _) = self.find_leaf(key);
        match &self.nodes[leaf] {
            Node::Leaf { keys, values, .. } => keys
                .binary_search_by(|k| k.as_ref().cmp(key))
                .ok()
                .map(|at| values[at].clone()),
            _ => None,
        }
    }

    /// Inserts or replaces. Returns true when a new key was added.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> bool {
        let (leaf_id, path) = self.find_leaf(key);

        let Node::Leaf { keys, values, .. } = &mut self.nodes[leaf_id] else {
            unreachable!("find_leaf returned a non-leaf");
        };
        match keys.binary_search_by(|k| k.as_ref().cmp(key)) {
            Ok(at) => {
                values[at] = Bytes::copy_from_slice(value);
                return false;
            }
            Err(at) => {
                keys.insert(at, Bytes::copy_from_slice(key));
                values.insert(at, Bytes::copy_from_slice(value));
            }
        }
        self.len += 1;

        if self.node_len(leaf_id) > self.order {
            self.split(leaf_id, path);
        }
        true
    }

    fn node_len(&self, id: NodeId) -> usize {
        match &self.nodes[id] {
            Node::Internal { keys, .. } | Node::Leaf { keys, .. } => keys.len(),
            Node::Free => 0,
        }
    }

    /// Splits an overfull node and propagates separators up the path.
    fn split(&mut self, mut node_id: NodeId, mut path: Vec<(NodeId, usize)>) {
        loop {
            let (separator, right_id) = match std::mem::take(&mut self.nodes[node_id]) {
                Node::Leaf {
                    mut keys,
                    mut values,
                    next,
                } => {
                    let mid = keys.len() / 2;
                    let right_keys = keys.split_off(mid);
                    let right_values = values.split_off(mid);
                    let separator = right_keys[0].clone();
                    let right_id = self.allocate(Node::Leaf {
                        keys: right_keys,
                        values: right_values,
                        next,
                    });
                    self.nodes[node_id] = Node::Leaf {
                        keys,
                        values,
                        next: Some(right_id),
                    };
                    (separator, right_id)
                }
                Node::Internal {
                    mut keys,
                    mut children,
                } => {
                    let mid = keys.len() / 2;
                    let right_keys = keys.split_off(mid + 1);
                    let right_children = children.split_off(mid + 1);
                    let separator = keys.pop().unwrap_or_default();
                    let right_id = self.allocate(Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    });
                    self.nodes[node_id] = Node::Internal { keys, children };
                    (separator, right_id)
                }
                Node::Free => unreachable!("splitting a freed node"),
            };
            self.splits += 1;

            match path.pop() {
                Some((parent_id, child_idx)) => {
                    let Node::Internal { keys, children } = &mut self.nodes[parent_id] else {
                        unreachable!("path step through a non-internal node");
                    };
                    keys.insert(child_idx, separator);
                    children.insert(child_idx + 1, right_id);
                    if keys.len() > self.order {
                        node_id = parent_id;
                        continue;
                    }
                }
                None => {
                    // Root split: the tree grows one level.
                    let new_root = self.allocate(Node::Internal {
                        keys: vec![separator],
                        children: vec![node_id, right_id],
                    });
                    self.root = new_root;
                    self.height += 1;
                }
            }
            return;
        }
    }

    /// Removes a key. Returns false when absent.
    fn remove(&mut self, key: &[u8]) -> bool {
        let (leaf_id, path) = self.find_leaf(key);
        {
            let Node::Leaf { keys, values, .. } = &mut self.nodes[leaf_id] else {
                unreachable!("find_leaf returned a non-leaf");
            };
            match keys.binary_search_by(|k| k.as_ref().cmp(key)) {
                Ok(at) => {
                    keys.remove(at);
                    values.remove(at);
                }
                Err(_) => return false,
            }
        }
        self.len -= 1;
        self.rebalance(leaf_id, path);
        true
    }

    /// Restores minimum occupancy from `node_id` upward.
    fn rebalance(&mut self, mut node_id: NodeId, mut path: Vec<(NodeId, usize)>) {
        while node_id != self.root && self.node_len(node_id) < self.min_keys() {
            let Some((parent_id, child_idx)) = path.pop() else {
                break;
            };

            if child_idx > 0 && self.can_lend(parent_id, child_idx - 1) {
                self.borrow_from_left(parent_id, child_idx);
                return;
            }
            if self.sibling_exists(parent_id, child_idx + 1)
                && self.can_lend(parent_id, child_idx + 1)
            {
                self.borrow_from_right(parent_id, child_idx);
                return;
            }

            // No sibling can lend: merge (into the left sibling when
            // one exists, else absorb the right sibling).
            if child_idx > 0 {
                self.merge_children(parent_id, child_idx - 1);
            } else {
                self.merge_children(parent_id, child_idx);
            }
            node_id = parent_id;
        }

        // Root maintenance: an internal root without separators hands
        // the tree to its only child.
        if let Node::Internal { keys, children } = &self.nodes[self.root] {
            if keys.is_empty() {
                let only_child = children[0];
                let old_root = self.root;
                self.root = only_child;
                self.release(old_root);
                self.height -= 1;
            }
        }
    }

    fn sibling_exists(&self, parent_id: NodeId, child_idx: usize) -> bool {
        match &self.nodes[parent_id] {
            Node::Internal { children, .. } => child_idx < children.len(),
            _ => false,
        }
    }

    fn child_of(&self, parent_id: NodeId, child_idx: usize) -> NodeId {
        match &self.nodes[parent_id] {
            Node::Internal { children, .. } => children[child_idx],
            _ => unreachable!("child_of on a non-internal node"),
        }
    }

    fn can_lend(&self, parent_id: NodeId, child_idx: usize) -> bool {
        self.node_len(self.child_of(parent_id, child_idx)) > self.min_keys()
    }

    /// Moves one entry from the left sibling into `child_idx`.
    fn borrow_from_left(&mut self, parent_id: NodeId, child_idx: usize) {
        let left_id = self.child_of(parent_id, child_idx - 1);
        let node_id = self.child_of(parent_id, child_idx);

        match std::mem::take(&mut self.nodes[left_id]) {
            Node::Leaf {
                mut keys,
                mut values,
                next,
            } => {
                let (k, v) = match (keys.pop(), values.pop()) {
                    (Some(k), Some(v)) => (k, v),
                    _ => unreachable!("lending leaf was empty"),
                };
                self.nodes[left_id] = Node::Leaf { keys, values, next };

                let Node::Leaf { keys, values, .. } = &mut self.nodes[node_id] else {
                    unreachable!("leaf sibling mismatch");
                };
                keys.insert(0, k.clone());
                values.insert(0, v);
                self.set_separator(parent_id, child_idx - 1, k);
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let lent_key = keys.pop().unwrap_or_default();
                let lent_child = children.pop().unwrap_or_default();
                self.nodes[left_id] = Node::Internal { keys, children };

                let separator = self.take_separator(parent_id, child_idx - 1, lent_key);
                let Node::Internal { keys, children } = &mut self.nodes[node_id] else {
                    unreachable!("internal sibling mismatch");
                };
                keys.insert(0, separator);
                children.insert(0, lent_child);
            }
            Node::Free => unreachable!("borrowing from a freed node"),
        }
    }

    /// Moves one entry from the right sibling into `child_idx`.
    fn borrow_from_right(&mut self, parent_id: NodeId, child_idx: usize) {
        let right_id = self.child_of(parent_id, child_idx + 1);
        let node_id = self.child_of(parent_id, child_idx);

        match std::mem::take(&mut self.nodes[right_id]) {
            Node::Leaf {
                mut keys,
                mut values,
                next,
            } => {
                let k = keys.remove(0);
                let v = values.remove(0);
                let new_separator = keys[0].clone();
                self.nodes[right_id] = Node::Leaf { keys, values, next };

                let Node::Leaf { keys, values, .. } = &mut self.nodes[node_id] else {
                    unreachable!("leaf sibling mismatch");
                };
                keys.push(k);
                values.push(v);
                self.set_separator(parent_id, child_idx, new_separator);
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let lent_key = keys.remove(0);
                let lent_child = children.remove(0);
                self.nodes[right_id] = Node::Internal { keys, children };

                let separator = self.take_separator(parent_id, child_idx, lent_key);
                let Node::Internal { keys, children } = &mut self.nodes[node_id] else {
                    unreachable!("internal sibling mismatch");
                };
                keys.push(separator);
                children.push(lent_child);
            }
            Node::Free => unreachable!("borrowing from a freed node"),
        }
    }

    fn set_separator(&mut self, parent_id: NodeId, at: usize, key: Bytes) {
        let Node::Internal { keys, .. } = &mut self.nodes[parent_id] else {
            unreachable!("separator on a non-internal node");
        };
        keys[at] = key;
    }

    /// Swaps the separator at `at` for `replacement`, returning the
    /// old separator (the rotation primitive for internal borrows).
    fn take_separator(&mut self, parent_id: NodeId, at: usize, replacement: Bytes) -> Bytes {
        let Node::Internal { keys, .. } = &mut self.nodes[parent_id] else {
            unreachable!("separator on a non-internal node");
        };
        std::mem::replace(&mut keys[at], replacement)
    }

    /// Merges `children[left_idx + 1]` into `children[left_idx]`.
    fn merge_children(&mut self, parent_id: NodeId, left_idx: usize) {
        let left_id = self.child_of(parent_id, left_idx);
        let right_id = self.child_of(parent_id, left_idx + 1);

        // Detach the separator and the right child from the parent.
        let separator = {
            let Node::Internal { keys, children } = &mut self.nodes[parent_id] else {
                unreachable!("merging under a non-internal node");
            };
            children.remove(left_idx + 1);
            keys.remove(left_idx)
        };

        let right = std::mem::take(&mut self.nodes[right_id]);
        match (&mut self.nodes[left_id], right) {
            (
                Node::Leaf { keys, values, next },
                Node::Leaf {
                    keys: right_keys,
                    values: right_values,
                    next: right_next,
                },
            ) => {
                keys.extend(right_keys);
                values.extend(right_values);
                *next = right_next;
            }
            (
                Node::Internal { keys, children },
                Node::Internal {
                    keys: right_keys,
                    children: right_children,
                },
            ) => {
                keys.push(separator);
                keys.extend(right_keys);
                children.extend(right_children);
            }
            _ => unreachable!("sibling kind mismatch during merge"),
        }
        self.release(right_id);
        self.merges += 1;
    }

    /// Every pair, in key order, via the leaf chain.
    fn snapshot_all(&self) -> Vec<(Bytes, Bytes)> {
        let mut out = Vec::with_capacity(self.len);
        let mut current = self.root;
        loop {
            match &self.nodes[current] {
                Node::Internal { children, .. } => current = children[0],
                Node::Leaf { .. } => break,
                Node::Free => return out,
            }
        }
        loop {
            let Node::Leaf { keys, values, next } = &self.nodes[current] else {
                break;
            };
            out.extend(keys.iter().cloned().zip(values.iter().cloned()));
            match next {
                Some(id) => current = *id,
                None => break,
            }
        }
        out
    }

    /// Key-ordered scan of `[start, end)` through the leaf chain.
    fn range_scan(&self, start: &[u8], end: &[u8]) -> Vec<(Bytes, Bytes)> {
        let mut out = Vec::new();
        let (mut leaf_id, _) = self.find_leaf(start);
        loop {
            let Node::Leaf { keys, values, next } = &self.nodes[leaf_id] else {
                break;
            };
            for (k, v) in keys.iter().zip(values) {
                if k.as_ref() < start {
                    continue;
                }
                if k.as_ref() >= end {
                    return out;
                }
                out.push((k.clone(), v.clone()));
            }
            match next {
                Some(id) => leaf_id = *id,
                None => break,
            }
        }
        out
    }

    fn memory_usage(&self) -> usize {
        let mut total = self.nodes.capacity() * std::mem::size_of::<Node>();
        for node in &self.nodes {
            match node {
                Node::Leaf { keys, values, .. } => {
                    total += keys.iter().map(Bytes::len).sum::<usize>();
                    total += values.iter().map(Bytes::len).sum::<usize>();
                }
                Node::Internal { keys, .. } => {
                    total += keys.iter().map(Bytes::len).sum::<usize>();
                }
                Node::Free => {}
            }
        }
        total
    }

    /// Structural self-check used by tests: sorted nodes, a
    /// consistent leaf chain, and a length that matches the chain.
    #[cfg(test)]
    fn validate(&self) -> bool {
        // Leftmost leaf.
        let mut current = self.root;
        loop {
            match &self.nodes[current] {
                Node::Internal { children, .. } => current = children[0],
                Node::Leaf { .. } => break,
                Node::Free => return false,
            }
        }

        // Walk the chain: strictly ascending keys, len total.
        let mut counted = 0;
        let mut last: Option<Bytes> = None;
        loop {
            let Node::Leaf { keys, values, next } = &self.nodes[current] else {
                return false;
            };
            if keys.len() != values.len() {
                return false;
            }
            for key in keys {
                if last.as_ref().is_some_and(|l| l >= key) {
                    return false;
                }
                last = Some(key.clone());
                counted += 1;
            }
            match next {
                Some(id) => current = *id,
                None => break,
            }
        }
        counted == self.len
    }
}

// ------------------------------------------------------------------------------------------------
// Engine wrapper
// ------------------------------------------------------------------------------------------------

/// B+Tree engine with interior locking.
pub struct BPlusTreeEngine {
    inner: RwLock<BPlusTree>,
}

impl Default for BPlusTreeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BPlusTreeEngine {
    /// Creates an empty tree with [`DEFAULT_ORDER`].
    pub fn new() -> Self {
        Self::with_order(DEFAULT_ORDER)
    }

    /// Creates an empty tree with an explicit node order (min 3).
    pub fn with_order(order: usize) -> Self {
        Self {
            inner: RwLock::new(BPlusTree::new(order)),
        }
    }

    fn validate_args(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_param("key must not be empty"));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn structure_is_valid(&self) -> bool {
        self.inner.read().validate()
    }

    #[cfg(test)]
    pub(crate) fn height(&self) -> u64 {
        self.inner.read().height
    }
}

impl StorageEngine for BPlusTreeEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate_args(key)?;
        if value.is_empty() {
            return Err(Error::invalid_param("value must not be empty"));
        }
        self.inner.write().insert(key, value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Self::validate_args(key)?;
        Ok(self.inner.read().get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Self::validate_args(key)?;
        if self.inner.write().remove(key) {
            Ok(())
        } else {
            Err(Error::op(ErrorKind::NotFound, "key not found"))
        }
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Self::validate_args(key)?;
        let mut inner = self.inner.write();
        if inner.get(key).is_none() {
            return Err(Error::op(ErrorKind::NotFound, "key not found"));
        }
        inner.insert(key, value);
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.inner.read().len as u64)
    }

    fn memory_usage(&self) -> Result<u64> {
        Ok(self.inner.read().memory_usage() as u64)
    }

    fn supports(&self, op: EngineOp) -> bool {
        matches!(
            op,
            EngineOp::RangeScan | EngineOp::Snapshot | EngineOp::BatchSet | EngineOp::Iterate
        )
    }

    fn batch_set(&self, pairs: &[(&[u8], &[u8])]) -> Result<()> {
        for (key, value) in pairs {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        Ok(self.inner.read().range_scan(start, end))
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = (Bytes, Bytes)> + Send>> {
        Ok(Box::new(self.snapshot()?.into_iter()))
    }

    fn snapshot(&self) -> Result<Vec<(Bytes, Bytes)>> {
        Ok(self.inner.read().snapshot_all())
    }

    fn extras(&self) -> EngineExtras {
        let inner = self.inner.read();
        EngineExtras::BPlusTree {
            splits: inner.splits,
            merges: inner.merges,
            height: inner.height,
        }
    }
}
