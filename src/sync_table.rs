//! SyncHashTable: a `HashTable` behind a reader/writer lock.
//!
//! Lookups and iteration take the read lock, so they run alongside each
//! other; inserts, removals and `clear` take the write lock. Borrowed data
//! cannot escape a lock, so lookups either clone the value out (`find`) or
//! run a closure on it while the lock is held (`find_map`). For several
//! steps under one acquisition, use `read()` / `write()`.

use crate::error::{Rejected, TableError};
use crate::hash_table::{HashTable, TableOptions};
use crate::hooks::{Destroy, DropEntry, KeyHasher};
use core::borrow::Borrow;
use core::fmt;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct SyncHashTable<K, V, H, D = DropEntry>
where
    D: Destroy<K, V>,
{
    inner: RwLock<HashTable<K, V, H, D>>,
}

impl<K, V, H> SyncHashTable<K, V, H>
where
    H: KeyHasher,
    K: Borrow<H::Key>,
{
    pub fn new(options: TableOptions, hasher: H) -> Result<Self, TableError> {
        Ok(Self::from_table(HashTable::new(options, hasher)?))
    }
}

impl<K, V, H, D> SyncHashTable<K, V, H, D>
where
    H: KeyHasher,
    K: Borrow<H::Key>,
    D: Destroy<K, V>,
{
    pub fn with_destroy(options: TableOptions, hasher: H, destroy: D) -> Result<Self, TableError> {
        Ok(Self::from_table(HashTable::with_destroy(
            options, hasher, destroy,
        )?))
    }

    pub fn from_table(table: HashTable<K, V, H, D>) -> Self {
        Self {
            inner: RwLock::new(table),
        }
    }

    pub fn into_inner(self) -> HashTable<K, V, H, D> {
        self.inner.into_inner()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HashTable<K, V, H, D>> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HashTable<K, V, H, D>> {
        self.inner.write()
    }

    pub fn insert(&self, key: K, value: V) -> Result<(), Rejected<K, V>> {
        self.inner.write().insert(key, value)
    }

    pub fn try_insert(&self, key: K, value: V) -> Result<(), Rejected<K, V>> {
        self.inner.write().try_insert(key, value)
    }

    pub fn remove(&self, key: &H::Key) -> bool {
        self.inner.write().remove(key)
    }

    pub fn take(&self, key: &H::Key) -> Option<(K, V)> {
        self.inner.write().take(key)
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn find(&self, key: &H::Key) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().find(key).cloned()
    }

    pub fn find_map<R, F>(&self, key: &H::Key, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.inner.read().find(key).map(f)
    }

    pub fn contains_key(&self, key: &H::Key) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Visit entries under the read lock until `f` returns `false`.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.inner.read().for_each(f);
    }

    /// Visit the values stored under `key`, oldest first, until `f` returns
    /// `false`.
    pub fn for_each_key<F>(&self, key: &H::Key, mut f: F)
    where
        F: FnMut(&V) -> bool,
    {
        let table = self.inner.read();
        for v in table.iter_key(key) {
            if !f(v) {
                break;
            }
        }
    }
}

impl<K, V, H, D> fmt::Debug for SyncHashTable<K, V, H, D>
where
    D: Destroy<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_read() {
            Some(table) => f.debug_tuple("SyncHashTable").field(&*table).finish(),
            None => f.write_str("SyncHashTable(<locked>)"),
        }
    }
}
