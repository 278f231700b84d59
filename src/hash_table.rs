//! HashTable: Robin Hood open addressing with backward-shift deletion.
//!
//! Slots live in one power-of-two array. Each live slot records the mixed
//! hash of its key and its probe length (distance from the ideal bucket),
//! so lookups never re-hash stored keys and can stop as soon as they have
//! walked further than the resident they are looking at.

use crate::error::{Rejected, TableError};
use crate::hooks::{Destroy, DropEntry, KeyHasher};
use core::borrow::Borrow;
use core::fmt;
use core::mem;

/// Fibonacci multiplier applied to every caller-supplied hash.
pub const HASH_MULTIPLIER: u32 = 0x9E37_79B1;

/// Resize threshold as an 8-bit fixed-point fraction of capacity (~85%).
pub const MAX_LOAD_FACTOR: u64 = 217;

/// Bucket count used when no estimate is given.
pub const MIN_BUCKETS: usize = 4;

struct Item<K, V> {
    key: K,
    value: V,
    hash: u32,
    probe_len: u32,
}

type Slot<K, V> = Option<Item<K, V>>;

/// Largest bucket count for which the slot array stays under 2 GiB.
pub const fn max_buckets_for<K, V>() -> usize {
    let slot = mem::size_of::<Slot<K, V>>();
    let limit = 0x8000_0000usize / if slot == 0 { 1 } else { slot };
    1usize << (usize::BITS - 1 - limit.leading_zeros())
}

#[inline]
fn mix(raw: u32) -> u32 {
    raw.wrapping_mul(HASH_MULTIPLIER)
}

#[inline]
fn distance(hash: u32, idx: usize, mask: usize) -> u32 {
    (idx.wrapping_sub(hash as usize & mask) & mask) as u32
}

/// Construction parameters for `HashTable` and `SyncHashTable`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableOptions {
    buckets: usize,
    stackable: bool,
    max_buckets: Option<usize>,
    clamp: bool,
}

impl TableOptions {
    /// Start with exactly `buckets` slots; must be a power of two.
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets,
            stackable: false,
            max_buckets: None,
            clamp: false,
        }
    }

    /// Size for roughly `entries` entries, rounding up to a power of two
    /// and clamping to the largest table the entry type allows.
    pub fn with_estimate(entries: usize) -> Self {
        let buckets = if entries == 0 {
            MIN_BUCKETS
        } else {
            entries.checked_next_power_of_two().unwrap_or(usize::MAX)
        };
        Self {
            buckets,
            clamp: true,
            ..Self::new(buckets)
        }
    }

    /// Allow several values under one key.
    pub fn stackable(mut self, stackable: bool) -> Self {
        self.stackable = stackable;
        self
    }

    /// Never grow beyond `max` buckets; inserts that would need more fail.
    pub fn max_buckets(mut self, max: usize) -> Self {
        self.max_buckets = Some(max);
        self
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn is_stackable(&self) -> bool {
        self.stackable
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::with_estimate(0)
    }
}

pub struct HashTable<K, V, H, D = DropEntry>
where
    D: Destroy<K, V>,
{
    slots: Vec<Slot<K, V>>,
    mask: usize,
    len: usize,
    max_probe_len: u32,
    stackable: bool,
    ceiling: usize,
    hasher: H,
    destroy: D,
}

fn alloc_slots<K, V>(buckets: usize) -> Result<Vec<Slot<K, V>>, TableError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(buckets)
        .map_err(|_| TableError::AllocationFailed { requested: buckets })?;
    slots.resize_with(buckets, || None);
    Ok(slots)
}

/// Place `item` starting at its ideal bucket. Returns the longest probe
/// length written.
///
/// A fresh item only evicts residents that are strictly closer to home, so
/// it lands behind entries sharing its bucket. An evicted item also evicts
/// residents of the same bucket, which shifts the whole run by one and keeps
/// same-bucket entries in insertion order.
fn place<K, V>(slots: &mut [Slot<K, V>], mask: usize, mut item: Item<K, V>) -> u32 {
    let mut idx = item.hash as usize & mask;
    let mut carried = false;
    let mut longest = 0;
    item.probe_len = 0;

    loop {
        match slots[idx].as_mut() {
            None => {
                longest = longest.max(item.probe_len);
                slots[idx] = Some(item);
                return longest;
            }
            Some(resident) => {
                debug_assert_eq!(resident.probe_len, distance(resident.hash, idx, mask));
                let evict = if carried {
                    resident.probe_len <= item.probe_len
                } else {
                    resident.probe_len < item.probe_len
                };
                if evict {
                    longest = longest.max(item.probe_len);
                    mem::swap(resident, &mut item);
                    carried = true;
                }
            }
        }
        idx = (idx + 1) & mask;
        item.probe_len += 1;
    }
}

impl<K, V, H> HashTable<K, V, H>
where
    H: KeyHasher,
    K: Borrow<H::Key>,
{
    pub fn new(options: TableOptions, hasher: H) -> Result<Self, TableError> {
        Self::with_destroy(options, hasher, DropEntry)
    }
}

impl<K, V, H, D> HashTable<K, V, H, D>
where
    H: KeyHasher,
    K: Borrow<H::Key>,
    D: Destroy<K, V>,
{
    pub fn with_destroy(options: TableOptions, hasher: H, destroy: D) -> Result<Self, TableError> {
        let bound = max_buckets_for::<K, V>();
        let ceiling = options.max_buckets.map_or(bound, |m| m.min(bound));
        let mut buckets = options.buckets;
        if options.clamp {
            buckets = buckets.min(ceiling);
        }
        if buckets == 0 {
            return Err(TableError::ZeroBuckets);
        }
        if !buckets.is_power_of_two() {
            return Err(TableError::BucketsNotPowerOfTwo(buckets));
        }
        if buckets > ceiling {
            return Err(TableError::TooManyBuckets {
                requested: buckets,
                max: ceiling,
            });
        }

        Ok(Self {
            slots: alloc_slots(buckets)?,
            mask: buckets - 1,
            len: 0,
            max_probe_len: 0,
            stackable: options.stackable,
            ceiling,
            hasher,
            destroy,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_stackable(&self) -> bool {
        self.stackable
    }

    /// High-water mark of probe lengths since the last resize.
    pub fn max_probe_len(&self) -> u32 {
        self.max_probe_len
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    #[inline]
    fn hash_of(&self, key: &H::Key) -> u32 {
        mix(self.hasher.hash(key))
    }

    fn find_index(&self, key: &H::Key, hash: u32) -> Option<usize> {
        let mut idx = hash as usize & self.mask;
        let mut dist = 0u32;
        loop {
            let item = self.slots[idx].as_ref()?;
            if dist > item.probe_len || dist > self.max_probe_len {
                return None;
            }
            if item.hash == hash && self.hasher.equals(item.key.borrow(), key) {
                return Some(idx);
            }
            dist += 1;
            idx = (idx + 1) & self.mask;
        }
    }

    pub fn find(&self, key: &H::Key) -> Option<&V> {
        let idx = self.find_index(key, self.hash_of(key))?;
        self.slots[idx].as_ref().map(|item| &item.value)
    }

    pub fn find_mut(&mut self, key: &H::Key) -> Option<&mut V> {
        let idx = self.find_index(key, self.hash_of(key))?;
        self.slots[idx].as_mut().map(|item| &mut item.value)
    }

    pub fn get_key_value(&self, key: &H::Key) -> Option<(&K, &V)> {
        let idx = self.find_index(key, self.hash_of(key))?;
        self.slots[idx].as_ref().map(|item| (&item.key, &item.value))
    }

    pub fn contains_key(&self, key: &H::Key) -> bool {
        self.find_index(key, self.hash_of(key)).is_some()
    }

    /// Insert an entry. On a non-stackable table an existing entry with an
    /// equal key is destroyed first; on a stackable table the new value is
    /// queued behind the existing ones.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), Rejected<K, V>> {
        let hash = self.hash_of(key.borrow());
        if !self.stackable {
            if let Some(idx) = self.find_index(key.borrow(), hash) {
                self.delete_at(idx);
            }
        }
        self.push(key, value, hash)
    }

    /// Insert only if no entry with an equal key exists.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<(), Rejected<K, V>> {
        let hash = self.hash_of(key.borrow());
        if self.find_index(key.borrow(), hash).is_some() {
            return Err(Rejected::new(TableError::DuplicateKey, key, value));
        }
        self.push(key, value, hash)
    }

    fn push(&mut self, key: K, value: V, hash: u32) -> Result<(), Rejected<K, V>> {
        self.len += 1;
        if let Err(reason) = self.maybe_grow() {
            self.len -= 1;
            return Err(Rejected::new(reason, key, value));
        }
        let item = Item {
            key,
            value,
            hash,
            probe_len: 0,
        };
        let longest = place(&mut self.slots, self.mask, item);
        self.max_probe_len = self.max_probe_len.max(longest);
        Ok(())
    }

    fn maybe_grow(&mut self) -> Result<(), TableError> {
        let capacity = self.slots.len();
        let threshold = (MAX_LOAD_FACTOR * capacity as u64) >> 8;
        if self.len as u64 <= threshold {
            return Ok(());
        }
        match capacity.checked_mul(2) {
            Some(doubled) if doubled <= self.ceiling => self.resize(doubled),
            _ => Err(TableError::CapacityExhausted { capacity }),
        }
    }

    fn resize(&mut self, buckets: usize) -> Result<(), TableError> {
        let fresh = alloc_slots(buckets)?;
        let mut old = mem::replace(&mut self.slots, fresh);
        let old_mask = old.len() - 1;
        self.mask = buckets - 1;
        self.max_probe_len = 0;

        // Start at an empty slot so runs that wrap past the end of the old
        // array are reinserted in probe order.
        let start = old.iter().position(Option::is_none).unwrap_or(0);
        for i in 0..old.len() {
            if let Some(item) = old[(start + i) & old_mask].take() {
                let longest = place(&mut self.slots, self.mask, item);
                self.max_probe_len = self.max_probe_len.max(longest);
            }
        }
        tracing::debug!(from = old.len(), to = buckets, len = self.len, "hash table resized");
        Ok(())
    }

    /// Detach the slot at `idx` and shift the following displaced entries
    /// back by one.
    fn unlink(&mut self, idx: usize) -> Option<Item<K, V>> {
        let removed = self.slots[idx].take()?;
        debug_assert!(self.len > 0);
        self.len -= 1;

        let mut hole = idx;
        loop {
            let next = (hole + 1) & self.mask;
            let mut moved = match self.slots[next].take() {
                Some(item) if item.probe_len > 0 => item,
                other => {
                    self.slots[next] = other;
                    return Some(removed);
                }
            };
            moved.probe_len -= 1;
            self.slots[hole] = Some(moved);
            hole = next;
        }
    }

    fn delete_at(&mut self, idx: usize) {
        if let Some(item) = self.unlink(idx) {
            self.destroy.destroy(item.key, item.value);
        }
    }

    /// Remove the first (least recently inserted) entry matching `key`,
    /// running the destroy hook on it. On a stackable table, call again to
    /// remove the next one.
    pub fn remove(&mut self, key: &H::Key) -> bool {
        match self.find_index(key, self.hash_of(key)) {
            Some(idx) => {
                self.delete_at(idx);
                true
            }
            None => false,
        }
    }

    /// Like `remove`, but hand the entry back instead of destroying it.
    pub fn take(&mut self, key: &H::Key) -> Option<(K, V)> {
        let idx = self.find_index(key, self.hash_of(key))?;
        self.unlink(idx).map(|item| (item.key, item.value))
    }

    /// Destroy every entry and keep the current capacity.
    pub fn clear(&mut self) {
        for (key, value) in self.drain() {
            self.destroy.destroy(key, value);
        }
    }

    /// Detach every entry without running the destroy hook.
    pub fn drain(&mut self) -> std::vec::IntoIter<(K, V)> {
        let mut out = Vec::with_capacity(self.len);
        for slot in self.slots.iter_mut() {
            if let Some(item) = slot.take() {
                out.push((item.key, item.value));
            }
        }
        self.len = 0;
        self.max_probe_len = 0;
        out.into_iter()
    }

    /// Entries in slot order. No relation to insertion order across keys.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
            remaining: self.len,
        }
    }

    /// Values stored under `key`, oldest first.
    pub fn iter_key<'a>(&'a self, key: &'a H::Key) -> KeyIter<'a, K, V, H, D> {
        let hash = self.hash_of(key);
        KeyIter {
            table: self,
            key,
            hash,
            idx: hash as usize & self.mask,
            dist: 0,
            done: false,
        }
    }

    /// Visit entries until `f` returns `false`.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for (k, v) in self.iter() {
            if !f(k, v) {
                break;
            }
        }
    }

    /// Panics if any slot breaks the probe-length bookkeeping.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let mut live = 0;
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(item) = slot {
                live += 1;
                assert_eq!(
                    item.probe_len,
                    distance(item.hash, idx, self.mask),
                    "probe length out of sync at slot {idx}"
                );
                assert!(item.probe_len <= self.max_probe_len);
                if item.probe_len > 0 {
                    let prev = (idx + self.mask) & self.mask;
                    assert!(
                        self.slots[prev].is_some(),
                        "displaced entry at slot {idx} follows a hole"
                    );
                }
            }
        }
        assert_eq!(live, self.len);
        assert!(self.capacity().is_power_of_two());
        assert!(self.len as u64 <= (MAX_LOAD_FACTOR * self.capacity() as u64) >> 8);
    }
}

impl<K, V, H, D> Drop for HashTable<K, V, H, D>
where
    D: Destroy<K, V>,
{
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(item) = slot.take() {
                self.destroy.destroy(item.key, item.value);
            }
        }
    }
}

impl<K, V, H, D> fmt::Debug for HashTable<K, V, H, D>
where
    D: Destroy<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .field("max_probe_len", &self.max_probe_len)
            .field("stackable", &self.stackable)
            .finish_non_exhaustive()
    }
}

/// Iterator over live entries in slot order.
pub struct Iter<'a, K, V> {
    slots: core::slice::Iter<'a, Slot<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        for slot in self.slots.by_ref() {
            if let Some(item) = slot {
                self.remaining -= 1;
                return Some((&item.key, &item.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Iterator over the values stored under one key, in insertion order.
pub struct KeyIter<'a, K, V, H, D>
where
    H: KeyHasher,
    D: Destroy<K, V>,
{
    table: &'a HashTable<K, V, H, D>,
    key: &'a H::Key,
    hash: u32,
    idx: usize,
    dist: u32,
    done: bool,
}

impl<'a, K, V, H, D> Iterator for KeyIter<'a, K, V, H, D>
where
    H: KeyHasher,
    K: Borrow<H::Key>,
    D: Destroy<K, V>,
{
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        let table = self.table;
        while !self.done {
            let item = match table.slots[self.idx].as_ref() {
                Some(item) if self.dist <= item.probe_len && self.dist <= table.max_probe_len => {
                    item
                }
                _ => {
                    self.done = true;
                    break;
                }
            };
            self.idx = (self.idx + 1) & table.mask;
            self.dist += 1;
            if item.hash == self.hash && table.hasher.equals(item.key.borrow(), self.key) {
                return Some(&item.value);
            }
        }
        None
    }
}
