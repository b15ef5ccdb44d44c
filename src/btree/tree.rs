use crate::common::{PageId, Result, StorageError, INTERNAL_CAPACITY, LEAF_CAPACITY, ROW_SIZE};
use crate::txn::Transaction;

use super::node::{InternalNode, LeafNode, Node, Tuple};

/// Abstraction over "something that can fetch/allocate/write pages",
/// so the tree can run either over a live `Transaction` or (in tests)
/// a bare in-memory page table. `Transaction` is the only production
/// implementor.
pub trait NodeProvider {
    fn read_node(&mut self, page_id: PageId) -> Result<Node>;
    fn write_node(&mut self, node: &Node) -> Result<()>;
    fn alloc_node(&mut self) -> Result<PageId>;
}

impl<'p> NodeProvider for Transaction<'p> {
    fn read_node(&mut self, page_id: PageId) -> Result<Node> {
        let buf = *self.read_page(page_id)?;
        Node::deserialize(page_id, &buf)
    }

    fn write_node(&mut self, node: &Node) -> Result<()> {
        let buf = node.serialize();
        let page = self.write_page(node.id())?;
        page.copy_from_slice(&buf);
        Ok(())
    }

    fn alloc_node(&mut self) -> Result<PageId> {
        let (page_id, _) = self.new_page()?;
        Ok(page_id)
    }
}

/// Clustered B+tree keyed by the row's leading `u32` key field. Holds
/// no state of its own beyond the root page id; every operation is
/// driven through a `NodeProvider` (a `Transaction` in production) so
/// that an aborted operation never touches committed pages.
pub struct BTree {
    root_page_id: PageId,
}

impl BTree {
    pub fn new(root_page_id: PageId) -> Self {
        Self { root_page_id }
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Descends to the leaf that would contain `key`, recording the
    /// path of internal nodes walked (for split/merge propagation).
    fn find_leaf_path<P: NodeProvider>(
        &self,
        provider: &mut P,
        key: u32,
    ) -> Result<(LeafNode, Vec<InternalNode>)> {
        let mut path = Vec::new();
        let mut current = self.root_page_id;
        loop {
            match provider.read_node(current)? {
                Node::Leaf(leaf) => return Ok((leaf, path)),
                Node::Internal(internal) => {
                    let idx = internal.child_index_for(key);
                    current = internal.children[idx];
                    path.push(internal);
                }
            }
        }
    }

    /// Point lookup: returns the row for `key`, if present.
    pub fn find<P: NodeProvider>(&self, provider: &mut P, key: u32) -> Result<Option<[u8; ROW_SIZE]>> {
        let (leaf, _) = self.find_leaf_path(provider, key)?;
        Ok(leaf
            .tuples
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.row))
    }

    /// Returns the leftmost leaf, for a full forward scan.
    pub fn first_leaf<P: NodeProvider>(&self, provider: &mut P) -> Result<LeafNode> {
        let mut current = self.root_page_id;
        loop {
            match provider.read_node(current)? {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(internal) => current = internal.children[0],
            }
        }
    }

    /// Returns the leaf that would contain `key`, for range scans that
    /// start at a given lower bound.
    pub fn leaf_for<P: NodeProvider>(&self, provider: &mut P, key: u32) -> Result<LeafNode> {
        let (leaf, _) = self.find_leaf_path(provider, key)?;
        Ok(leaf)
    }

    /// Inserts `row` keyed by `key`, splitting leaves/internal nodes
    /// and growing a new root as needed. Duplicate keys are permitted;
    /// a duplicate insert lands to the right of existing entries with
    /// the same key (matching the tie-break-right descent rule).
    pub fn insert<P: NodeProvider>(&mut self, provider: &mut P, key: u32, row: [u8; ROW_SIZE]) -> Result<()> {
        let (mut leaf, mut path) = self.find_leaf_path(provider, key)?;

        let insert_at = leaf.tuples.iter().position(|t| t.key > key).unwrap_or(leaf.tuples.len());
        leaf.tuples.insert(insert_at, Tuple::new(key, row));

        if leaf.tuples.len() <= LEAF_CAPACITY {
            provider.write_node(&Node::Leaf(leaf))?;
            return Ok(());
        }

        let (left, right, separator) = split_leaf(provider, leaf)?;
        provider.write_node(&Node::Leaf(left))?;
        provider.write_node(&Node::Leaf(right.clone()))?;
        self.propagate_split(provider, path.pop(), path, separator, right.id)
    }

    /// Splits a leaf that has overflowed, wiring the new right sibling
    /// into the doubly-linked leaf list in place of the old leaf.
    fn propagate_split<P: NodeProvider>(
        &mut self,
        provider: &mut P,
        mut parent: Option<InternalNode>,
        mut ancestors: Vec<InternalNode>,
        mut separator: u32,
        mut new_child: PageId,
    ) -> Result<()> {
        loop {
            let Some(mut node) = parent else {
                // Root split: allocate a fresh root pointing at the old
                // root and the newly split-off sibling.
                let old_root = self.root_page_id;
                let new_root_id = provider.alloc_node()?;
                let new_root = InternalNode::new(new_root_id, vec![separator], vec![old_root, new_child]);
                provider.write_node(&Node::Internal(new_root))?;
                self.root_page_id = new_root_id;
                return Ok(());
            };

            let idx = node.keys.iter().position(|&k| k > separator).unwrap_or(node.keys.len());
            node.keys.insert(idx, separator);
            node.children.insert(idx + 1, new_child);

            if node.keys.len() <= INTERNAL_CAPACITY {
                provider.write_node(&Node::Internal(node))?;
                return Ok(());
            }

            let (left, right, promoted) = split_internal(provider, node)?;
            provider.write_node(&Node::Internal(left))?;
            provider.write_node(&Node::Internal(right.clone()))?;
            separator = promoted;
            new_child = right.id;
            parent = ancestors.pop();
        }
    }

    /// Deletes `key`'s first matching row, rebalancing leaves and
    /// internal nodes on underflow. Returns `Ok(false)` if absent.
    pub fn delete<P: NodeProvider>(&mut self, provider: &mut P, key: u32) -> Result<bool> {
        let (mut leaf, mut path) = self.find_leaf_path(provider, key)?;
        let Some(pos) = leaf.tuples.iter().position(|t| t.key == key) else {
            return Ok(false);
        };
        leaf.tuples.remove(pos);

        let min_leaf_occupancy = LEAF_CAPACITY.div_ceil(2);
        if leaf.tuples.len() >= min_leaf_occupancy || path.is_empty() {
            // Root leaf is exempt from the minimum-occupancy rule.
            if pos == 0 {
                if let Some(&new_min) = leaf.tuples.first().map(|t| &t.key) {
                    fix_ancestor_separator(provider, &path, key, new_min)?;
                }
            }
            provider.write_node(&Node::Leaf(leaf))?;
            return Ok(true);
        }

        self.rebalance_leaf(provider, leaf, &mut path)?;
        Ok(true)
    }

    fn rebalance_leaf<P: NodeProvider>(
        &mut self,
        provider: &mut P,
        leaf: LeafNode,
        path: &mut Vec<InternalNode>,
    ) -> Result<()> {
        let mut parent = path
            .pop()
            .ok_or_else(|| StorageError::IndexCorrupted("non-root leaf has no parent".into()))?;
        let leaf_idx = parent
            .children
            .iter()
            .position(|&c| c == leaf.id)
            .ok_or_else(|| StorageError::IndexCorrupted(format!("leaf {} not listed in parent", leaf.id)))?;

        let min_leaf_occupancy = LEAF_CAPACITY.div_ceil(2);

        if leaf_idx > 0 {
            let left_id = parent.children[leaf_idx - 1];
            let mut left = expect_leaf(provider.read_node(left_id)?, left_id)?;
            if left.tuples.len() > min_leaf_occupancy {
                let borrowed = left.tuples.pop().unwrap();
                let new_separator = borrowed.key;
                let mut leaf = leaf;
                leaf.tuples.insert(0, borrowed);
                parent.keys[leaf_idx - 1] = new_separator;
                provider.write_node(&Node::Leaf(left))?;
                provider.write_node(&Node::Leaf(leaf))?;
                provider.write_node(&Node::Internal(parent))?;
                return Ok(());
            }
        }

        if leaf_idx + 1 < parent.children.len() {
            let right_id = parent.children[leaf_idx + 1];
            let mut right = expect_leaf(provider.read_node(right_id)?, right_id)?;
            if right.tuples.len() > min_leaf_occupancy {
                let borrowed = right.tuples.remove(0);
                let mut leaf = leaf;
                leaf.tuples.push(borrowed);
                parent.keys[leaf_idx] = right.tuples[0].key;
                provider.write_node(&Node::Leaf(leaf))?;
                provider.write_node(&Node::Leaf(right))?;
                provider.write_node(&Node::Internal(parent))?;
                return Ok(());
            }
        }

        // No sibling can spare a tuple: merge. Prefer merging into the
        // left sibling when one exists under the same parent, else
        // merge the right sibling into this leaf.
        if leaf_idx > 0 {
            let left_id = parent.children[leaf_idx - 1];
            let mut left = expect_leaf(provider.read_node(left_id)?, left_id)?;
            left.tuples.extend(leaf.tuples);
            left.next_leaf_id = leaf.next_leaf_id;
            if !leaf.next_leaf_id.is_none() {
                if let Node::Leaf(mut next) = provider.read_node(leaf.next_leaf_id)? {
                    next.prev_leaf_id = left.id;
                    provider.write_node(&Node::Leaf(next))?;
                }
            }
            provider.write_node(&Node::Leaf(left))?;
            parent.keys.remove(leaf_idx - 1);
            parent.children.remove(leaf_idx);
            self.rebalance_internal(provider, parent, path)
        } else {
            let right_id = parent.children[leaf_idx + 1];
            let right = expect_leaf(provider.read_node(right_id)?, right_id)?;
            let mut leaf = leaf;
            leaf.tuples.extend(right.tuples);
            leaf.next_leaf_id = right.next_leaf_id;
            if !right.next_leaf_id.is_none() {
                if let Node::Leaf(mut next) = provider.read_node(right.next_leaf_id)? {
                    next.prev_leaf_id = leaf.id;
                    provider.write_node(&Node::Leaf(next))?;
                }
            }
            provider.write_node(&Node::Leaf(leaf))?;
            parent.keys.remove(leaf_idx);
            parent.children.remove(leaf_idx + 1);
            self.rebalance_internal(provider, parent, path)
        }
    }

    fn rebalance_internal<P: NodeProvider>(
        &mut self,
        provider: &mut P,
        node: InternalNode,
        path: &mut Vec<InternalNode>,
    ) -> Result<()> {
        let min_internal_occupancy = (INTERNAL_CAPACITY + 1).div_ceil(2) - 1;

        if node.keys.len() >= min_internal_occupancy || path.is_empty() {
            if path.is_empty() && node.keys.is_empty() {
                // Root collapsed to a single child: the tree shrinks by
                // one level.
                self.root_page_id = node.children[0];
                return Ok(());
            }
            provider.write_node(&Node::Internal(node))?;
            return Ok(());
        }

        let mut parent = path
            .pop()
            .ok_or_else(|| StorageError::IndexCorrupted("non-root internal node has no parent".into()))?;
        let idx = parent
            .children
            .iter()
            .position(|&c| c == node.id)
            .ok_or_else(|| StorageError::IndexCorrupted(format!("node {} not listed in parent", node.id)))?;

        if idx > 0 {
            let left_id = parent.children[idx - 1];
            let mut left = expect_internal(provider.read_node(left_id)?, left_id)?;
            if left.keys.len() > min_internal_occupancy {
                let borrowed_child = left.children.pop().unwrap();
                let borrowed_key = left.keys.pop().unwrap();
                let mut node = node;
                node.children.insert(0, borrowed_child);
                node.keys.insert(0, parent.keys[idx - 1]);
                parent.keys[idx - 1] = borrowed_key;
                provider.write_node(&Node::Internal(left))?;
                provider.write_node(&Node::Internal(node))?;
                provider.write_node(&Node::Internal(parent))?;
                return Ok(());
            }
        }

        if idx + 1 < parent.children.len() {
            let right_id = parent.children[idx + 1];
            let mut right = expect_internal(provider.read_node(right_id)?, right_id)?;
            if right.keys.len() > min_internal_occupancy {
                let borrowed_child = right.children.remove(0);
                let borrowed_key = right.keys.remove(0);
                let mut node = node;
                node.children.push(borrowed_child);
                node.keys.push(parent.keys[idx]);
                parent.keys[idx] = borrowed_key;
                provider.write_node(&Node::Internal(node))?;
                provider.write_node(&Node::Internal(right))?;
                provider.write_node(&Node::Internal(parent))?;
                return Ok(());
            }
        }

        if idx > 0 {
            let left_id = parent.children[idx - 1];
            let mut left = expect_internal(provider.read_node(left_id)?, left_id)?;
            left.keys.push(parent.keys[idx - 1]);
            left.keys.extend(node.keys);
            left.children.extend(node.children);
            provider.write_node(&Node::Internal(left))?;
            parent.keys.remove(idx - 1);
            parent.children.remove(idx);
            self.rebalance_internal(provider, parent, path)
        } else {
            let right_id = parent.children[idx + 1];
            let right = expect_internal(provider.read_node(right_id)?, right_id)?;
            let mut node = node;
            node.keys.push(parent.keys[idx]);
            node.keys.extend(right.keys);
            node.children.extend(right.children);
            provider.write_node(&Node::Internal(node))?;
            parent.keys.remove(idx);
            parent.children.remove(idx + 1);
            self.rebalance_internal(provider, parent, path)
        }
    }
}

/// When the deleted tuple was a leaf's minimum, the leaf's old minimum
/// may also be the separator recorded one or more levels up (§3:
/// "key at position i equals the smallest key in the subtree under
/// childᵢ₊₁"). Walk `path` from the leaf's immediate parent upward;
/// the closest ancestor where this subtree wasn't reached via its
/// child 0 holds that separator — replace it with `new_min` and stop.
/// Ancestors reached via child 0 hold no separator for this subtree
/// and are skipped (the subtree was leftmost there too).
fn fix_ancestor_separator<P: NodeProvider>(
    provider: &mut P,
    path: &[InternalNode],
    old_min: u32,
    new_min: u32,
) -> Result<()> {
    if old_min == new_min {
        return Ok(());
    }
    for ancestor in path.iter().rev() {
        let idx = ancestor.child_index_for(old_min);
        if idx > 0 {
            let mut ancestor = ancestor.clone();
            ancestor.keys[idx - 1] = new_min;
            provider.write_node(&Node::Internal(ancestor))?;
            return Ok(());
        }
    }
    Ok(())
}

fn expect_leaf(node: Node, page_id: PageId) -> Result<LeafNode> {
    node.as_leaf()
        .cloned()
        .ok_or_else(|| StorageError::IndexCorrupted(format!("page {page_id} expected a leaf sibling")))
}

fn expect_internal(node: Node, page_id: PageId) -> Result<InternalNode> {
    node.as_internal()
        .cloned()
        .ok_or_else(|| StorageError::IndexCorrupted(format!("page {page_id} expected an internal sibling")))
}

/// Splits an overflowing leaf at its midpoint, allocates the new right
/// sibling's page id, and wires sibling pointers on both sides. The
/// caller is responsible for persisting both returned nodes.
fn split_leaf<P: NodeProvider>(provider: &mut P, mut leaf: LeafNode) -> Result<(LeafNode, LeafNode, u32)> {
    let mid = leaf.tuples.len() / 2;
    let right_tuples = leaf.tuples.split_off(mid);
    let separator = right_tuples[0].key;

    let right_id = provider.alloc_node()?;
    let mut right = LeafNode::new(right_id, right_tuples);
    right.prev_leaf_id = leaf.id;
    right.next_leaf_id = leaf.next_leaf_id;

    if !leaf.next_leaf_id.is_none() {
        if let Node::Leaf(mut old_next) = provider.read_node(leaf.next_leaf_id)? {
            old_next.prev_leaf_id = right_id;
            provider.write_node(&Node::Leaf(old_next))?;
        }
    }
    leaf.next_leaf_id = right_id;

    Ok((leaf, right, separator))
}

/// Splits an overflowing internal node, promoting (not duplicating)
/// its middle key into the parent.
fn split_internal<P: NodeProvider>(provider: &mut P, mut node: InternalNode) -> Result<(InternalNode, InternalNode, u32)> {
    let mid = node.keys.len() / 2;
    let promoted = node.keys[mid];

    let right_keys = node.keys.split_off(mid + 1);
    node.keys.pop(); // drop the promoted key, already captured above
    let right_children = node.children.split_off(mid + 1);

    let right_id = provider.alloc_node()?;
    let right = InternalNode::new(right_id, right_keys, right_children);

    Ok((node, right, promoted))
}
