//! Crio - the storage core of a minimal single-table SQL database.
//!
//! A page-oriented on-disk store organized as a clustered B+tree, a
//! fixed-capacity buffer pool with pinning and pluggable eviction, and
//! short-lived read/write transactions over per-page snapshots.
//!
//! # Architecture
//!
//! - **Storage layer** (`storage`): `Pager` performs fixed-4096-byte
//!   block I/O against a single backing file and owns the page id
//!   counter.
//! - **Buffer pool** (`buffer`): `BufferPool` caches frames in memory
//!   with pinning, a pluggable `Replacer` eviction policy
//!   (`LruReplacer` is the one provided), and dirty-page flush before
//!   eviction.
//! - **Transaction** (`txn`): `Transaction` layers per-page snapshots
//!   over the buffer pool so a transaction's own writes are visible to
//!   its own reads, and are only published (or discarded) on
//!   `commit`/`rollback`.
//! - **B+tree** (`btree`): `Node`/`BTree` implement the clustered index
//!   — point lookup, insert with leaf/internal split, delete with
//!   redistribution/merge, and the doubly-linked leaf chain that backs
//!   range scans.
//! - **Table façade** (`table`): `Table` ties the layers above into
//!   `open`/`close`/`insert_row`/`seq_scan`/`index_scan`, plus the
//!   `Filter`/`IndexCondition` contracts a query-compiler collaborator
//!   binds against.
//!
//! # Example
//!
//! ```rust,no_run
//! use crio::table::Table;
//! use crio::common::ROW_SIZE;
//!
//! let table = Table::open("test.db").unwrap();
//!
//! let mut row = [0u8; ROW_SIZE];
//! row[0..4].copy_from_slice(&1u32.to_le_bytes());
//! table.insert_row(row).unwrap();
//!
//! let rows = table.seq_scan(None).unwrap();
//! assert_eq!(rows.len(), 1);
//!
//! table.close().unwrap();
//! ```

pub mod btree;
pub mod buffer;
pub mod common;
pub mod storage;
pub mod table;
pub mod txn;

pub use common::{PageId, Result, StorageError};
pub use table::Table;
