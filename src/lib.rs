//! propstore: a Robin Hood hash table and a thread-safe registry of typed
//! property sets built on top of it.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a small open-addressing table with pluggable hashing and
//!   teardown, and a registry of named, typed values layered over it.
//! - Layers:
//!   - HashTable<K, V, H, D>: structural table. Robin Hood placement,
//!     early-exit lookups bounded by the longest probe seen, backward-shift
//!     deletion, doubling at ~85% load. Optional multimap ("stackable")
//!     mode keeps same-key values in insertion order.
//!   - SyncHashTable<K, V, H, D>: the same table behind a reader/writer
//!     lock; lookups share, mutations exclude.
//!   - Registry: id → property set. Each set is a `HashTable<String,
//!     Property>` behind its own reentrant lock.
//!
//! Constraints
//! - Hash, equality and teardown are capabilities (`KeyHasher`,
//!   `Destroy`) chosen per table; there are no untyped keys or values.
//! - Each slot caches the mixed hash of its key. Growth and deletion never
//!   call back into the hasher.
//! - Failed inserts hand the key and value back (`Rejected`); the table is
//!   left exactly as before the call.
//! - Slot arrays stay below 2 GiB; allocation failure is an error, not an
//!   abort.
//!
//! Locking
//! - Registry operations are two-phase: the registry mutex only guards the
//!   id → `Arc<set>` lookup, then the set's own lock guards its entries.
//!   A set destroyed mid-call stays alive through the retained `Arc`.
//! - Set locks are reentrant. A thread inside `with_locked`, an
//!   enumeration callback or a cleanup may call back into the same set.
//! - `copy_properties` locks source then destination; concurrent copies
//!   in opposite directions between the same two sets can deadlock.
//!
//! Ownership of property values
//! - Strings and pointers are shared (`Arc`), so a value read from a set
//!   stays valid after the property is replaced.
//! - A pointer stored with a cleanup runs that cleanup exactly once: on
//!   overwrite, clear, set destruction or registry shutdown. Setters that
//!   reject their input still release the value.
//!
//! Notes and non-goals
//! - Lookup misses are not errors. Getters return the caller's default and
//!   report why through `tracing`.
//! - No persistence; everything lives for the process at most.

pub mod error;
pub mod hash_table;
mod hash_table_proptest;
pub mod hooks;
mod init_state;
pub mod property;
mod registry;
pub mod sync_table;

// Public surface
pub use error::{PropertyError, Rejected, TableError};
pub use hash_table::{HashTable, TableOptions};
pub use hooks::{Destroy, DropEntry, IdHash, KeyHasher, PointerIdentity, StdHash, StringHash};
pub use init_state::InitState;
pub use property::{PointerData, PropertyType};
pub use registry::{PropertiesId, Registry};
pub use sync_table::SyncHashTable;
