//! Error types for the table and registry layers.

use core::fmt;

/// Structural failures reported by `HashTable` construction and insertion.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("bucket count must be non-zero")]
    ZeroBuckets,
    #[error("bucket count {0} is not a power of two")]
    BucketsNotPowerOfTwo(usize),
    #[error("bucket count {requested} exceeds the maximum of {max}")]
    TooManyBuckets { requested: usize, max: usize },
    #[error("table is full at {capacity} buckets and cannot grow")]
    CapacityExhausted { capacity: usize },
    #[error("could not allocate {requested} buckets")]
    AllocationFailed { requested: usize },
    #[error("key already exists and replace is disabled")]
    DuplicateKey,
}

/// A rejected insert. The key and value are handed back so the caller keeps
/// ownership of whatever they hold.
pub struct Rejected<K, V> {
    pub reason: TableError,
    pub key: K,
    pub value: V,
}

impl<K, V> Rejected<K, V> {
    pub(crate) fn new(reason: TableError, key: K, value: V) -> Self {
        Self { reason, key, value }
    }

    /// Drop the returned entry and keep only the reason.
    pub fn into_reason(self) -> TableError {
        self.reason
    }
}

impl<K, V> fmt::Debug for Rejected<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<K, V> fmt::Display for Rejected<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reason, f)
    }
}

impl<K, V> std::error::Error for Rejected<K, V> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Failures reported by the property registry.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("invalid property set id {0}")]
    InvalidId(u32),
    #[error("property name must not be empty")]
    EmptyName,
    #[error("couldn't find property named {0}")]
    NotFound(String),
    #[error("property {name} isn't a {expected} value")]
    WrongType {
        name: String,
        expected: &'static str,
    },
    #[error("property registry is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("{failed} properties could not be copied")]
    CopyIncomplete { failed: usize },
}

pub type Result<T, E = PropertyError> = core::result::Result<T, E>;
