//! Hashing, equality and teardown capabilities plugged into `HashTable`.
//!
//! A hasher value carries whatever state its `hash`/`equals` need, so the
//! table never has to pass a separate userdata pointer around. Keys are
//! looked up through their borrowed form (`KeyHasher::Key`), which lets a
//! table of `String` keys be queried with `&str`.

use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use hashbrown::hash_map::DefaultHashBuilder;

/// Hash and equality over the borrowed form of a table's keys.
pub trait KeyHasher {
    type Key: ?Sized;

    fn hash(&self, key: &Self::Key) -> u32;

    fn equals(&self, a: &Self::Key, b: &Self::Key) -> bool;
}

/// Invoked with each entry the table discards: on overwrite, removal,
/// `clear`, and when the table itself is dropped.
pub trait Destroy<K, V> {
    fn destroy(&self, key: K, value: V);
}

/// Default teardown: the entry is simply dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropEntry;

impl<K, V> Destroy<K, V> for DropEntry {
    #[inline]
    fn destroy(&self, _key: K, _value: V) {}
}

impl<K, V, F> Destroy<K, V> for F
where
    F: Fn(K, V),
{
    #[inline]
    fn destroy(&self, key: K, value: V) {
        self(key, value)
    }
}

/// DJB-style string hash (`h * 33 ^ byte`).
#[derive(Clone, Copy, Debug, Default)]
pub struct StringHash;

impl KeyHasher for StringHash {
    type Key = str;

    fn hash(&self, key: &str) -> u32 {
        key.bytes()
            .fold(5381u32, |h, b| (h << 5).wrapping_add(h) ^ u32::from(b))
    }

    fn equals(&self, a: &str, b: &str) -> bool {
        if core::ptr::eq(a, b) {
            return true;
        }
        if a.as_bytes().first() != b.as_bytes().first() {
            return false;
        }
        a == b
    }
}

/// Small integer ids; the id is its own hash and the table's mixing step
/// spreads it.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdHash;

impl KeyHasher for IdHash {
    type Key = u32;

    #[inline]
    fn hash(&self, key: &u32) -> u32 {
        *key
    }

    #[inline]
    fn equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// Identity of the referenced object: two keys match only when they point
/// at the same address. Works with any key that borrows as `T`
/// (`&T`, `Box<T>`, `Arc<T>`).
pub struct PointerIdentity<T: ?Sized> {
    build: DefaultHashBuilder,
    _pd: PhantomData<fn(&T)>,
}

impl<T: ?Sized> PointerIdentity<T> {
    pub fn new() -> Self {
        Self {
            build: DefaultHashBuilder::default(),
            _pd: PhantomData,
        }
    }

    #[inline]
    fn addr(key: &T) -> usize {
        key as *const T as *const () as usize
    }
}

impl<T: ?Sized> Default for PointerIdentity<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for PointerIdentity<T> {
    fn clone(&self) -> Self {
        Self {
            build: self.build.clone(),
            _pd: PhantomData,
        }
    }
}

impl<T: ?Sized> core::fmt::Debug for PointerIdentity<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PointerIdentity")
    }
}

impl<T: ?Sized> KeyHasher for PointerIdentity<T> {
    type Key = T;

    fn hash(&self, key: &T) -> u32 {
        self.build.hash_one(Self::addr(key)) as u32
    }

    fn equals(&self, a: &T, b: &T) -> bool {
        Self::addr(a) == Self::addr(b)
    }
}

/// Adapter for any `Q: Hash + Eq` through a standard `BuildHasher`.
pub struct StdHash<Q: ?Sized, S = DefaultHashBuilder> {
    build: S,
    _pd: PhantomData<fn(&Q)>,
}

impl<Q: ?Sized, S: Default> StdHash<Q, S> {
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<Q: ?Sized, S> StdHash<Q, S> {
    pub fn with_hasher(build: S) -> Self {
        Self {
            build,
            _pd: PhantomData,
        }
    }
}

impl<Q: ?Sized, S: Default> Default for StdHash<Q, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: ?Sized, S: Clone> Clone for StdHash<Q, S> {
    fn clone(&self) -> Self {
        Self::with_hasher(self.build.clone())
    }
}

impl<Q: ?Sized, S> core::fmt::Debug for StdHash<Q, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("StdHash")
    }
}

impl<Q, S> KeyHasher for StdHash<Q, S>
where
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    type Key = Q;

    fn hash(&self, key: &Q) -> u32 {
        let h = self.build.hash_one(key);
        // Fold the high half in so 64-bit hashers keep their entropy.
        (h ^ (h >> 32)) as u32
    }

    fn equals(&self, a: &Q, b: &Q) -> bool {
        a == b
    }
}
