//! multikey-container: a single-threaded registry that indexes nodes by
//! several declared keys, some unique and some shared, and evicts expired
//! nodes lazily when they are read. Also ships the fixed-bucket chained
//! hash table the registry's design grew out of.
//!
//! Internal Design:
//!
//! Summary
//! - Layers:
//!   - ChainedHashTable<K, V, S>: standalone map with a fixed number of
//!     buckets, each a chain scanned linearly, plus an insertion-order list
//!     threaded through the entries for enumeration.
//!   - ContainerNode: capability a stored value provides (declared lookup
//!     keys, expiry predicate, update/delete hooks, text dump).
//!   - Container<N, S>: owns nodes in a generational arena and keeps a
//!     forward index (key -> handle or group of handles) and a reverse index
//!     (handle -> registered keys) in step with primary storage.
//!
//! Constraints
//! - Single-threaded: no internal synchronization. Reads that may evict or
//!   run hooks take `&mut self`, so interleaving is ruled out statically.
//! - Nodes are identified by `Handle`, never by address or contents.
//! - Unique keys bind one node; shared keys bind a non-empty group that is
//!   created on first use and dropped when it empties.
//! - Expiry is checked only on reads that ask for it; there is no sweep.
//!
//! Failure model
//! - `add` and `update_keys` validate all keys first; a conflict leaves the
//!   container untouched, and a rejected node is handed back to the caller.
//! - `has`/`lookup` turn absence and expiry into negative results; `get`,
//!   `remove` and the table's `get`/`remove` report errors.
//! - `ContainerError::Consistency` marks a broken internal contract, never
//!   a transient condition.
//!
//! Observability
//! - Each container records `tracing` events under a span supplied at
//!   construction (or a `container` span named after its configuration).
//!   Nothing is global.
//!
//! ```
//! use multikey_container::{Container, ContainerNode, LookupKey, StorageMode};
//!
//! struct Flow {
//!     id: u32,
//!     peer: &'static str,
//! }
//!
//! impl ContainerNode for Flow {
//!     type Key = String;
//!     fn lookup_keys(&self) -> Vec<LookupKey<String>> {
//!         vec![
//!             LookupKey::Unique(format!("flow:{}", self.id)),
//!             LookupKey::Shared(format!("peer:{}", self.peer)),
//!         ]
//!     }
//! }
//!
//! let mut flows = Container::new(StorageMode::Ordered);
//! let a = flows.add(Flow { id: 1, peer: "10.0.0.1" }).unwrap();
//! flows.add(Flow { id: 2, peer: "10.0.0.1" }).unwrap();
//!
//! assert_eq!(flows.get("flow:1", false).unwrap().node(), Some(a));
//! assert_eq!(flows.resolve("peer:10.0.0.1").unwrap().to_vec().len(), 2);
//! assert!(flows.add(Flow { id: 1, peer: "10.0.0.2" }).is_err());
//! ```

pub mod container;
mod container_proptest;
mod error;
pub mod hash_table;
mod node;
mod storage;

// Public surface
pub use container::{Container, ContainerConfig, Group, Handle, Resolved};
pub use error::{AddError, ContainerError, TableError};
pub use hash_table::ChainedHashTable;
pub use node::{ContainerNode, LookupKey, NamedNode};
pub use storage::{HandleIter, StorageMode};
