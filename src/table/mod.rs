use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::btree::{BTree, LeafNode, Node, NodeProvider, Tuple};
use crate::buffer::BufferPool;
use crate::common::{
    PageId, Result, DEFAULT_INITIAL_FRAMES, DEFAULT_MAX_FRAMES, PAGE_TYPE_TABLE_HEADER, ROW_SIZE,
};
use crate::storage::Pager;
use crate::txn::Transaction;

mod filter;

pub use filter::{CompareOp, Filter, IndexCondition};

/// Column widths for the fixed row layout, present so a
/// filter-compiler collaborator has concrete names/widths to bind
/// against. Field encoding beyond these widths is out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    U32,
    FixedString(usize),
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub columns: Vec<(&'static str, ColumnKind)>,
}

impl TableSchema {
    fn fixed() -> Self {
        Self {
            columns: vec![
                ("id", ColumnKind::U32),
                ("username", ColumnKind::FixedString(32)),
                ("email", ColumnKind::FixedString(255)),
            ],
        }
    }
}

/// A single-table clustered store: pager + buffer pool + B+tree
/// indexed by the row's leading `id` field.
pub struct Table {
    pool: Arc<BufferPool>,
    root_page_id: Mutex<PageId>,
    schema: TableSchema,
}

impl Table {
    /// Opens (creating if absent) the backing file, reads the table
    /// header, and prepares the buffer pool over it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = Arc::new(Pager::open(path)?);
        let pool = Arc::new(BufferPool::new(
            DEFAULT_INITIAL_FRAMES,
            DEFAULT_MAX_FRAMES,
            pager,
        ));

        let root_page_id = {
            let mut txn = Transaction::new(&pool);
            let header = *txn.read_page(PageId::new(0))?;
            txn.rollback()?;
            let page_type = u16::from_le_bytes([header[0], header[1]]);
            if page_type != PAGE_TYPE_TABLE_HEADER {
                return Err(crate::common::StorageError::InvalidPageType {
                    page_id: PageId::new(0),
                    expected: PAGE_TYPE_TABLE_HEADER,
                    found: page_type,
                });
            }
            PageId::new(i32::from_le_bytes(header[2..6].try_into().unwrap()))
        };

        Ok(Self {
            pool,
            root_page_id: Mutex::new(root_page_id),
            schema: TableSchema::fixed(),
        })
    }

    /// Flushes every dirty frame still resident in the pool.
    pub fn close(self) -> Result<()> {
        self.pool.flush_all()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Inserts `row`, keyed by the leading 4 bytes interpreted as a
    /// little-endian `u32` id.
    pub fn insert_row(&self, row: [u8; ROW_SIZE]) -> Result<()> {
        let key = u32::from_le_bytes(row[0..4].try_into().unwrap());
        let mut root = self.root_page_id.lock();
        let mut txn = Transaction::new(&self.pool);
        let mut tree = BTree::new(*root);
        tree.insert(&mut txn, key, row)?;
        if tree.root_page_id() != *root {
            write_header_root(&mut txn, tree.root_page_id())?;
        }
        txn.commit()?;
        *root = tree.root_page_id();
        Ok(())
    }

    /// Deletes the row keyed by `key`. Returns whether a row was removed.
    pub fn delete_row(&self, key: u32) -> Result<bool> {
        let mut root = self.root_page_id.lock();
        let mut txn = Transaction::new(&self.pool);
        let mut tree = BTree::new(*root);
        let removed = tree.delete(&mut txn, key)?;
        if tree.root_page_id() != *root {
            write_header_root(&mut txn, tree.root_page_id())?;
        }
        txn.commit()?;
        *root = tree.root_page_id();
        Ok(removed)
    }

    /// Full forward scan from the leftmost leaf, yielding every row
    /// for which `filter` (if present) returns true.
    pub fn seq_scan(&self, filter: Option<&dyn Filter>) -> Result<Vec<[u8; ROW_SIZE]>> {
        let mut txn = Transaction::new(&self.pool);
        let tree = BTree::new(*self.root_page_id.lock());
        let mut out = Vec::new();

        let leaf = tree.first_leaf(&mut txn)?;
        let mut cursor = Cursor::new(&mut txn, leaf, 0);
        while let Some(tuple) = cursor.current() {
            if filter.map_or(true, |f| f.test(&tuple.row)) {
                out.push(tuple.row);
            }
            cursor.advance()?;
        }

        txn.commit()?;
        Ok(out)
    }

    /// Positions at the starting leaf/cell implied by `cond` and walks
    /// forward or backward (per `cond.operator`) until
    /// `cond.should_end` fires, applying `filter` on each candidate.
    pub fn index_scan(
        &self,
        cond: &IndexCondition,
        filter: Option<&dyn Filter>,
    ) -> Result<Vec<[u8; ROW_SIZE]>> {
        let mut txn = Transaction::new(&self.pool);
        let tree = BTree::new(*self.root_page_id.lock());
        let mut out = Vec::new();

        let Some((leaf, idx)) = find_leaf_by_condition(&tree, &mut txn, cond)? else {
            txn.commit()?;
            return Ok(out);
        };

        let backward = matches!(cond.operator, CompareOp::Less | CompareOp::LessThanOrEqual);
        let mut cursor = Cursor::new(&mut txn, leaf, idx);

        while let Some(tuple) = cursor.current() {
            if cond.should_end(tuple.key) {
                break;
            }
            if filter.map_or(true, |f| f.test(&tuple.row)) {
                out.push(tuple.row);
            }
            if backward {
                cursor.retreat()?;
            } else {
                cursor.advance()?;
            }
        }

        txn.commit()?;
        Ok(out)
    }
}

/// Position within a scan: the current leaf plus an index into its
/// tuples, per spec.md §4.7's `{ leaf, cellIndex, atEnd, transaction }`.
/// Shared by both `seq_scan` (always `advance`s) and `index_scan`
/// (`advance`s or `retreat`s depending on the comparison operator).
struct Cursor<'t, 'p> {
    transaction: &'t mut Transaction<'p>,
    leaf: LeafNode,
    cell_index: usize,
    at_end: bool,
}

impl<'t, 'p> Cursor<'t, 'p> {
    fn new(transaction: &'t mut Transaction<'p>, leaf: LeafNode, cell_index: usize) -> Self {
        let at_end = cell_index >= leaf.tuples.len();
        Self {
            transaction,
            leaf,
            cell_index,
            at_end,
        }
    }

    /// The tuple currently under the cursor, or `None` past either end.
    fn current(&self) -> Option<&Tuple> {
        if self.at_end {
            None
        } else {
            self.leaf.tuples.get(self.cell_index)
        }
    }

    /// Moves to the next cell, crossing into `next_leaf_id` once the
    /// current leaf is exhausted.
    fn advance(&mut self) -> Result<()> {
        self.cell_index += 1;
        if self.cell_index >= self.leaf.tuples.len() {
            if self.leaf.next_leaf_id.is_none() {
                self.at_end = true;
            } else {
                self.leaf = read_leaf(self.transaction, self.leaf.next_leaf_id)?;
                self.cell_index = 0;
                self.at_end = self.leaf.tuples.is_empty();
            }
        }
        Ok(())
    }

    /// Moves to the previous cell, crossing into `prev_leaf_id` once
    /// the current leaf's start is reached. Used for descending
    /// (`<`, `<=`) range scans.
    fn retreat(&mut self) -> Result<()> {
        if self.cell_index == 0 {
            if self.leaf.prev_leaf_id.is_none() {
                self.at_end = true;
            } else {
                self.leaf = read_leaf(self.transaction, self.leaf.prev_leaf_id)?;
                self.at_end = self.leaf.tuples.is_empty();
                self.cell_index = self.leaf.tuples.len().saturating_sub(1);
            }
        } else {
            self.cell_index -= 1;
        }
        Ok(())
    }
}

fn write_header_root(txn: &mut Transaction, new_root: PageId) -> Result<()> {
    let header = txn.write_page(PageId::new(0))?;
    header[2..6].copy_from_slice(&new_root.as_u32().to_le_bytes());
    Ok(())
}

fn read_leaf(txn: &mut Transaction, id: PageId) -> Result<LeafNode> {
    match txn.read_node(id)? {
        Node::Leaf(leaf) => Ok(leaf),
        Node::Internal(_) => unreachable!("leaf chain must only contain leaves"),
    }
}

/// Finds the `(leaf, cell index)` a range scan should start at, per
/// `cond.operator`'s direction. Returns `None` when no row satisfies
/// the starting condition (the scan yields nothing).
fn find_leaf_by_condition(
    tree: &BTree,
    txn: &mut Transaction,
    cond: &IndexCondition,
) -> Result<Option<(LeafNode, usize)>> {
    use CompareOp::*;

    match cond.operator {
        Equal | GreaterThanOrEqual | Greater => {
            let mut leaf = tree.leaf_for(txn, cond.target)?;
            loop {
                let idx = leaf.tuples.iter().position(|t| match cond.operator {
                    Equal => t.key == cond.target,
                    GreaterThanOrEqual => t.key >= cond.target,
                    Greater => t.key > cond.target,
                    _ => unreachable!(),
                });
                if let Some(idx) = idx {
                    return Ok(Some((leaf, idx)));
                }
                if leaf.next_leaf_id.is_none() {
                    return Ok(None);
                }
                leaf = read_leaf(txn, leaf.next_leaf_id)?;
            }
        }
        LessThanOrEqual | Less => {
            let mut leaf = tree.leaf_for(txn, cond.target)?;
            loop {
                let idx = leaf.tuples.iter().rposition(|t| match cond.operator {
                    LessThanOrEqual => t.key <= cond.target,
                    Less => t.key < cond.target,
                    _ => unreachable!(),
                });
                if let Some(idx) = idx {
                    return Ok(Some((leaf, idx)));
                }
                if leaf.prev_leaf_id.is_none() {
                    return Ok(None);
                }
                leaf = read_leaf(txn, leaf.prev_leaf_id)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn row_for(key: u32) -> [u8; ROW_SIZE] {
        let mut row = [0u8; ROW_SIZE];
        row[0..4].copy_from_slice(&key.to_le_bytes());
        row
    }

    fn key_of(row: &[u8; ROW_SIZE]) -> u32 {
        u32::from_le_bytes(row[0..4].try_into().unwrap())
    }

    #[test]
    fn insert_then_seq_scan_returns_rows_in_key_order() {
        let temp = NamedTempFile::new().unwrap();
        let table = Table::open(temp.path()).unwrap();
        for key in [5u32, 1, 9, 3] {
            table.insert_row(row_for(key)).unwrap();
        }

        let rows = table.seq_scan(None).unwrap();
        let keys: Vec<u32> = rows.iter().map(key_of).collect();
        assert_eq!(keys, vec![1, 3, 5, 9]);
        table.close().unwrap();
    }

    #[test]
    fn index_scan_greater_than_matches_spec_example() {
        let temp = NamedTempFile::new().unwrap();
        let table = Table::open(temp.path()).unwrap();
        for key in 1..=5u32 {
            table.insert_row(row_for(key)).unwrap();
        }

        let cond = IndexCondition::new("id", 3, CompareOp::Greater);
        let rows = table.index_scan(&cond, None).unwrap();
        let keys: Vec<u32> = rows.iter().map(key_of).collect();
        assert_eq!(keys, vec![4, 5]);

        let cond = IndexCondition::new("id", 3, CompareOp::Less);
        let rows = table.index_scan(&cond, None).unwrap();
        let keys: Vec<u32> = rows.iter().map(key_of).collect();
        assert_eq!(keys, vec![2, 1]);

        let cond = IndexCondition::new("id", 5, CompareOp::Greater);
        let rows = table.index_scan(&cond, None).unwrap();
        assert!(rows.is_empty());

        table.close().unwrap();
    }

    #[test]
    fn reopen_existing_file_preserves_rows() {
        let temp = NamedTempFile::new().unwrap();
        {
            let table = Table::open(temp.path()).unwrap();
            for key in 0..20u32 {
                table.insert_row(row_for(key)).unwrap();
            }
            table.close().unwrap();
        }

        let table = Table::open(temp.path()).unwrap();
        let rows = table.seq_scan(None).unwrap();
        assert_eq!(rows.len(), 20);
        table.close().unwrap();
    }

    #[test]
    fn seq_scan_applies_filter() {
        let temp = NamedTempFile::new().unwrap();
        let table = Table::open(temp.path()).unwrap();
        for key in 0..10u32 {
            table.insert_row(row_for(key)).unwrap();
        }

        let filter = filter::IdCompareFilter::new(5, CompareOp::GreaterThanOrEqual);
        let rows = table.seq_scan(Some(&filter)).unwrap();
        let keys: Vec<u32> = rows.iter().map(key_of).collect();
        assert_eq!(keys, vec![5, 6, 7, 8, 9]);

        table.close().unwrap();
    }
}
