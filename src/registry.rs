//! Registry: numbered property sets with typed, lockable entries.
//!
//! Every per-set call is two-phase. The registry mutex is held only while
//! the set's `Arc` is fetched; the rest of the work runs under the set's own
//! reentrant lock on that retained `Arc`, so a set destroyed concurrently
//! stays valid until the call finishes. Values handed back to callers are
//! shared (`Arc`) and outlive the set if they need to.
//!
//! Getters never fail: a bad id, an empty name, a missing property or an
//! impossible coercion yields the caller's default, and the reason is
//! emitted as a `tracing` debug event.

use crate::error::{PropertyError, Result, TableError};
use crate::hash_table::{HashTable, TableOptions};
use crate::hooks::{Destroy, IdHash, StringHash};
use crate::init_state::InitState;
use crate::property::{PointerData, PointerValue, Property, PropertyType, PropertyValue};
use core::any::Any;
use core::cell::RefCell;
use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::{Arc, OnceLock};

/// Handle of a property set. Zero is never a valid id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PropertiesId(NonZeroU32);

impl PropertiesId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PropertiesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

type Entries = HashTable<String, Property, StringHash>;

const SET_BUCKETS: usize = 4;
const REGISTRY_BUCKETS: usize = 16;

#[derive(Debug)]
struct PropertySet {
    entries: ReentrantMutex<RefCell<Entries>>,
}

impl PropertySet {
    fn new() -> core::result::Result<Self, TableError> {
        let entries = HashTable::new(TableOptions::new(SET_BUCKETS), StringHash)?;
        Ok(Self {
            entries: ReentrantMutex::new(RefCell::new(entries)),
        })
    }

    /// Drop any entry named `name`, then store `property` if given. Released
    /// values are dropped after the table borrow ends, so cleanups may read
    /// the set again.
    fn replace(&self, name: &str, property: Option<Property>) -> Result<()> {
        let guard = self.entries.lock();
        let (previous, outcome) = {
            let mut entries = guard.borrow_mut();
            let previous = entries.take(name);
            let outcome = match property {
                Some(p) => entries.insert(name.to_owned(), p),
                None => Ok(()),
            };
            (previous, outcome)
        };
        drop(previous);
        outcome.map_err(|rejected| PropertyError::from(rejected.into_reason()))
    }

    /// Release every entry now rather than when the last `Arc` goes away.
    fn clear(&self) {
        let guard = self.entries.lock();
        let released: Vec<(String, Property)> = guard.borrow_mut().drain().collect();
        drop(released);
    }
}

/// Registry-side teardown for a set leaving the table.
#[derive(Clone, Copy, Debug, Default)]
struct DrainSet;

impl Destroy<u32, Arc<PropertySet>> for DrainSet {
    fn destroy(&self, id: u32, set: Arc<PropertySet>) {
        set.clear();
        tracing::debug!(id, "property set destroyed");
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    sets: Option<HashTable<u32, Arc<PropertySet>, IdHash, DrainSet>>,
    last_id: u32,
}

fn next_id(last_id: &mut u32) -> PropertiesId {
    *last_id = last_id.wrapping_add(1);
    if *last_id == 0 {
        *last_id = 1;
    }
    PropertiesId(NonZeroU32::new(*last_id).unwrap_or(NonZeroU32::MIN))
}

/// A registry of property sets. Independent registries do not share ids or
/// sets; `Registry::global()` is the process-wide instance.
#[derive(Debug, Default)]
pub struct Registry {
    init: InitState,
    state: Mutex<RegistryState>,
    global: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Idempotent. Also run implicitly by the first `create_properties`.
    pub fn init(&self) -> Result<()> {
        if !self.init.should_init() {
            return Ok(());
        }
        match HashTable::with_destroy(TableOptions::new(REGISTRY_BUCKETS), IdHash, DrainSet) {
            Ok(sets) => {
                self.state.lock().sets = Some(sets);
                self.init.set_initialized(true);
                tracing::debug!("property registry initialized");
                Ok(())
            }
            Err(err) => {
                self.init.set_initialized(false);
                Err(err.into())
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.init.is_ready()
    }

    /// Destroy the global set and every remaining set, firing their
    /// cleanups. The registry initializes again on next use; ids issued
    /// before shutdown are never reissued to new sets until the counter
    /// wraps.
    pub fn shutdown(&self) {
        if !self.init.should_quit() {
            return;
        }
        let (global, sets) = {
            let mut state = self.state.lock();
            let global = PropertiesId::new(self.global.swap(0, Ordering::AcqRel))
                .and_then(|id| state.sets.as_mut().and_then(|sets| sets.take(&id.get())));
            (global, state.sets.take())
        };
        // Cleanups run only after the state is back to uninitialized, so
        // they may call into the registry, which then initializes afresh.
        self.init.set_quit();
        if let Some((raw, set)) = global {
            DrainSet.destroy(raw, set);
        }
        drop(sets);
        tracing::debug!("property registry shut down");
    }

    pub fn create_properties(&self) -> Result<PropertiesId> {
        self.init()?;
        let mut set = Arc::new(PropertySet::new()?);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let sets = state.sets.as_mut().ok_or(PropertyError::NotInitialized)?;
        loop {
            let id = next_id(&mut state.last_id);
            // A wrapped counter can land on a live id; skip it.
            match sets.try_insert(id.get(), set) {
                Ok(()) => {
                    tracing::debug!(id = id.get(), "property set created");
                    return Ok(id);
                }
                Err(rejected) if rejected.reason == TableError::DuplicateKey => {
                    set = rejected.value;
                }
                Err(rejected) => return Err(rejected.into_reason().into()),
            }
        }
    }

    /// The process-wide set of this registry, created on first use. When
    /// several threads race here, one set wins and the others are destroyed.
    pub fn global_properties(&self) -> Result<PropertiesId> {
        if let Some(id) = PropertiesId::new(self.global.load(Ordering::Acquire)) {
            return Ok(id);
        }
        let id = self.create_properties()?;
        match self
            .global
            .compare_exchange(0, id.get(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(id),
            Err(winner) => {
                self.destroy_properties(id);
                PropertiesId::new(winner).ok_or(PropertyError::NotInitialized)
            }
        }
    }

    /// Unknown ids are ignored.
    pub fn destroy_properties(&self, id: PropertiesId) {
        let taken = {
            let mut state = self.state.lock();
            state.sets.as_mut().and_then(|sets| sets.take(&id.get()))
        };
        if let Some((raw, set)) = taken {
            let _ = self
                .global
                .compare_exchange(raw, 0, Ordering::AcqRel, Ordering::Acquire);
            DrainSet.destroy(raw, set);
        }
    }

    fn lookup(&self, id: PropertiesId) -> Result<Arc<PropertySet>> {
        let state = self.state.lock();
        state
            .sets
            .as_ref()
            .and_then(|sets| sets.find(&id.get()))
            .cloned()
            .ok_or(PropertyError::InvalidId(id.get()))
    }

    /// Run `f` while holding the set's lock. Other threads block on this set
    /// until `f` returns; the calling thread may keep using the set.
    pub fn with_locked<R, F>(&self, id: PropertiesId, f: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let set = self.lookup(id)?;
        let _guard = set.entries.lock();
        Ok(f())
    }

    // Setters. A value that cannot be stored is dropped before returning,
    // which runs its cleanup.

    fn set_property(&self, id: PropertiesId, name: &str, property: Option<Property>) -> Result<()> {
        if name.is_empty() {
            return Err(PropertyError::EmptyName);
        }
        let set = self.lookup(id)?;
        set.replace(name, property)
    }

    fn set_value(&self, id: PropertiesId, name: &str, value: PropertyValue) -> Result<()> {
        self.set_property(id, name, Some(Property::new(value)))
    }

    /// Store a shared pointer; `None` clears the property.
    pub fn set_pointer(&self, id: PropertiesId, name: &str, value: Option<PointerData>) -> Result<()> {
        match value {
            Some(data) => self.set_value(id, name, PropertyValue::Pointer(PointerValue::new(data))),
            None => self.clear_property(id, name),
        }
    }

    /// Store a pointer whose `cleanup` runs exactly once when the property
    /// is overwritten, cleared, or its set is destroyed.
    pub fn set_pointer_with_cleanup<F>(
        &self,
        id: PropertiesId,
        name: &str,
        value: PointerData,
        cleanup: F,
    ) -> Result<()>
    where
        F: FnOnce(PointerData) + Send + 'static,
    {
        let pointer = PointerValue::with_cleanup(value, cleanup);
        self.set_value(id, name, PropertyValue::Pointer(pointer))
    }

    /// Hand ownership of `value` to the set. Like any cleanup-bearing
    /// pointer it is never copied to another set.
    pub fn set_freeable<T>(&self, id: PropertiesId, name: &str, value: Box<T>) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        let data: PointerData = Arc::<T>::from(value);
        self.set_pointer_with_cleanup(id, name, data, drop)
    }

    /// `None` clears the property.
    pub fn set_string(&self, id: PropertiesId, name: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(s) => self.set_value(id, name, PropertyValue::String(Arc::from(s))),
            None => self.clear_property(id, name),
        }
    }

    pub fn set_number(&self, id: PropertiesId, name: &str, value: i64) -> Result<()> {
        self.set_value(id, name, PropertyValue::Number(value))
    }

    pub fn set_float(&self, id: PropertiesId, name: &str, value: f32) -> Result<()> {
        self.set_value(id, name, PropertyValue::Float(value))
    }

    pub fn set_boolean(&self, id: PropertiesId, name: &str, value: bool) -> Result<()> {
        self.set_value(id, name, PropertyValue::Boolean(value))
    }

    pub fn clear_property(&self, id: PropertiesId, name: &str) -> Result<()> {
        self.set_property(id, name, None)
    }

    // Getters.

    fn try_get<R, F>(&self, id: PropertiesId, name: &str, expected: PropertyType, read: F) -> Result<R>
    where
        F: FnOnce(&Property) -> Option<R>,
    {
        if name.is_empty() {
            return Err(PropertyError::EmptyName);
        }
        let set = self.lookup(id)?;
        let guard = set.entries.lock();
        let entries = guard.borrow();
        let property = entries
            .find(name)
            .ok_or_else(|| PropertyError::NotFound(name.to_owned()))?;
        read(property).ok_or_else(|| PropertyError::WrongType {
            name: name.to_owned(),
            expected: expected.name(),
        })
    }

    fn get_or<R, F>(&self, id: PropertiesId, name: &str, expected: PropertyType, default: R, read: F) -> R
    where
        F: FnOnce(&Property) -> Option<R>,
    {
        match self.try_get(id, name, expected, read) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(id = id.get(), name, %err, "property read fell back to default");
                default
            }
        }
    }

    pub fn get_pointer(&self, id: PropertiesId, name: &str, default: Option<PointerData>) -> Option<PointerData> {
        self.get_or(id, name, PropertyType::Pointer, default, |p| {
            p.as_pointer().map(|data| Some(Arc::clone(data)))
        })
    }

    /// Pointer property downcast to `T`; `None` if absent or of another type.
    pub fn get_pointer_as<T>(&self, id: PropertiesId, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_pointer(id, name, None)?.downcast::<T>().ok()
    }

    pub fn get_string(&self, id: PropertiesId, name: &str, default: &str) -> Arc<str> {
        match self.try_get(id, name, PropertyType::String, Property::to_str) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(id = id.get(), name, %err, "property read fell back to default");
                Arc::from(default)
            }
        }
    }

    pub fn get_number(&self, id: PropertiesId, name: &str, default: i64) -> i64 {
        self.get_or(id, name, PropertyType::Number, default, Property::to_number)
    }

    pub fn get_float(&self, id: PropertiesId, name: &str, default: f32) -> f32 {
        self.get_or(id, name, PropertyType::Float, default, Property::to_float)
    }

    pub fn get_boolean(&self, id: PropertiesId, name: &str, default: bool) -> bool {
        self.get_or(id, name, PropertyType::Boolean, default, |p| p.to_boolean(default))
    }

    pub fn property_type(&self, id: PropertiesId, name: &str) -> PropertyType {
        self.get_or(id, name, PropertyType::Invalid, PropertyType::Invalid, |p| {
            Some(p.property_type())
        })
    }

    pub fn has_property(&self, id: PropertiesId, name: &str) -> bool {
        self.property_type(id, name) != PropertyType::Invalid
    }

    /// Copy every entry of `src` into `dst`, replacing same-named entries.
    /// Pointers with a cleanup are skipped. Locks `src` then `dst`; callers
    /// must not run a concurrent copy in the opposite direction.
    pub fn copy_properties(&self, src: PropertiesId, dst: PropertiesId) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let src_set = self.lookup(src)?;
        let dst_set = self.lookup(dst)?;

        let src_guard = src_set.entries.lock();
        let _dst_guard = dst_set.entries.lock();
        let copies: Vec<(String, Property)> = {
            let entries = src_guard.borrow();
            entries
                .iter()
                .filter_map(|(name, property)| property.try_clone().map(|c| (name.clone(), c)))
                .collect()
        };

        let mut failed = 0;
        for (name, property) in copies {
            if let Err(err) = dst_set.replace(&name, Some(property)) {
                tracing::warn!(src = src.get(), dst = dst.get(), name, %err, "failed to copy property");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(PropertyError::CopyIncomplete { failed });
        }
        Ok(())
    }

    /// Call `f` once per property name while holding the set's lock. Names
    /// are collected up front, so `f` may read or write the same set; names
    /// it removes are still visited.
    pub fn enumerate_properties<F>(&self, id: PropertiesId, mut f: F) -> Result<()>
    where
        F: FnMut(PropertiesId, &str),
    {
        let set = self.lookup(id)?;
        let guard = set.entries.lock();
        let names: Vec<String> = guard.borrow().iter().map(|(name, _)| name.clone()).collect();
        for name in &names {
            f(id, name);
        }
        Ok(())
    }

    /// Log every property of the set at info level.
    pub fn dump_properties(&self, id: PropertiesId) -> Result<()> {
        let set = self.lookup(id)?;
        let guard = set.entries.lock();
        let entries = guard.borrow();
        tracing::info!(id = id.get(), count = entries.len(), "properties");
        for (name, property) in entries.iter() {
            tracing::info!(
                id = id.get(),
                kind = %property.property_type(),
                "{name}: {}",
                property.describe()
            );
        }
        Ok(())
    }

    #[cfg(test)]
    fn set_last_id(&self, last_id: u32) {
        self.state.lock().last_id = last_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(PointerData) + Send + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        (calls, move |_: PointerData| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn ids_are_sequential_and_skip_zero_on_wrap() {
        let reg = Registry::new();
        let a = reg.create_properties().unwrap();
        let b = reg.create_properties().unwrap();
        assert_eq!(b.get(), a.get() + 1);

        reg.set_last_id(u32::MAX - 1);
        assert_eq!(reg.create_properties().unwrap().get(), u32::MAX);
        // Ids 1 and 2 are live (a, b), so the wrapped counter moves past them.
        assert_eq!(reg.create_properties().unwrap().get(), 3);
        reg.set_number(a, "still", 1).unwrap();
        assert_eq!(reg.get_number(a, "still", 0), 1);
    }

    #[test]
    fn init_and_shutdown_are_idempotent() {
        let reg = Registry::new();
        assert!(!reg.is_initialized());
        reg.shutdown();
        reg.init().unwrap();
        reg.init().unwrap();
        assert!(reg.is_initialized());

        let id = reg.create_properties().unwrap();
        reg.shutdown();
        reg.shutdown();
        assert!(!reg.is_initialized());
        assert_eq!(reg.get_number(id, "x", 9), 9);

        // First use after shutdown brings the registry back with fresh ids.
        let next = reg.create_properties().unwrap();
        assert!(reg.is_initialized());
        assert_ne!(next, id);
    }

    /// Invariant: shutdown releases every set, including the global one, and
    /// runs each cleanup once.
    #[test]
    fn shutdown_fires_all_cleanups() {
        let reg = Registry::new();
        let global = reg.global_properties().unwrap();
        let local = reg.create_properties().unwrap();
        let (g_calls, g_cleanup) = counter();
        let (l_calls, l_cleanup) = counter();
        reg.set_pointer_with_cleanup(global, "g", Arc::new(1u8), g_cleanup).unwrap();
        reg.set_pointer_with_cleanup(local, "l", Arc::new(2u8), l_cleanup).unwrap();

        reg.shutdown();
        assert_eq!(g_calls.load(Ordering::SeqCst), 1);
        assert_eq!(l_calls.load(Ordering::SeqCst), 1);

        let fresh = reg.global_properties().unwrap();
        assert!(!reg.has_property(fresh, "g"));
    }

    /// Invariant: cleanups fired by shutdown may call back into the
    /// registry, a nested shutdown included, without blocking.
    #[test]
    fn shutdown_cleanups_can_reenter_the_registry() {
        let reg = Arc::new(Registry::new());
        let global = reg.global_properties().unwrap();
        let local = reg.create_properties().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        let (r, t) = (Arc::clone(&reg), tx.clone());
        reg.set_pointer_with_cleanup(global, "g", Arc::new(()), move |_| {
            let created = r.create_properties();
            let shared = r.global_properties();
            t.send((created.is_ok(), shared.is_ok())).unwrap();
        })
        .unwrap();
        let (r, t) = (Arc::clone(&reg), tx);
        reg.set_pointer_with_cleanup(local, "l", Arc::new(()), move |_| {
            r.shutdown();
            t.send((true, !r.is_initialized())).unwrap();
        })
        .unwrap();

        let worker = {
            let reg = Arc::clone(&reg);
            std::thread::spawn(move || reg.shutdown())
        };
        let timeout = std::time::Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout), Ok((true, true)));
        assert_eq!(rx.recv_timeout(timeout), Ok((true, true)));
        worker.join().unwrap();

        assert!(!reg.is_initialized());
        let next = reg.create_properties().unwrap();
        assert_ne!(next, global);
        assert_ne!(next, local);
    }

    /// Invariant: a setter given a bad id or name still releases the value.
    #[test]
    fn rejected_setters_release_the_value() {
        let reg = Registry::new();
        let id = reg.create_properties().unwrap();
        let (calls, cleanup) = counter();
        assert_eq!(
            reg.set_pointer_with_cleanup(id, "", Arc::new(0u8), cleanup),
            Err(PropertyError::EmptyName)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        reg.destroy_properties(id);
        let (calls, cleanup) = counter();
        assert_eq!(
            reg.set_pointer_with_cleanup(id, "p", Arc::new(0u8), cleanup),
            Err(PropertyError::InvalidId(id.get()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroying_unknown_ids_is_a_no_op() {
        let reg = Registry::new();
        reg.destroy_properties(PropertiesId::new(42).unwrap());
        let id = reg.create_properties().unwrap();
        reg.destroy_properties(id);
        reg.destroy_properties(id);
        assert_eq!(reg.property_type(id, "x"), PropertyType::Invalid);
        assert!(PropertiesId::new(0).is_none());
    }

    #[test]
    fn destroying_the_global_set_lets_it_be_recreated() {
        let reg = Registry::new();
        let first = reg.global_properties().unwrap();
        assert_eq!(reg.global_properties().unwrap(), first);
        reg.destroy_properties(first);
        let second = reg.global_properties().unwrap();
        assert_ne!(first, second);
        reg.set_boolean(second, "ok", true).unwrap();
        assert!(reg.get_boolean(second, "ok", false));
    }

    /// Invariant: a cleanup may read the set it is being removed from.
    #[test]
    fn cleanup_can_reenter_its_own_set() {
        let reg = Arc::new(Registry::new());
        let id = reg.create_properties().unwrap();
        reg.set_number(id, "n", 5).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let (r, s) = (Arc::clone(&reg), Arc::clone(&seen));
        reg.set_pointer_with_cleanup(id, "p", Arc::new(()), move |_| {
            s.store(r.get_number(id, "n", 0) as usize, Ordering::SeqCst);
        })
        .unwrap();
        reg.clear_property(id, "p").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn with_locked_allows_nested_calls() {
        let reg = Registry::new();
        let id = reg.create_properties().unwrap();
        let total = reg
            .with_locked(id, || {
                reg.set_number(id, "a", 1).unwrap();
                reg.set_number(id, "b", 2).unwrap();
                reg.get_number(id, "a", 0) + reg.get_number(id, "b", 0)
            })
            .unwrap();
        assert_eq!(total, 3);

        reg.destroy_properties(id);
        assert_eq!(
            reg.with_locked(id, || ()),
            Err(PropertyError::InvalidId(id.get()))
        );
    }

    #[test]
    fn getters_fall_back_to_defaults() {
        let reg = Registry::new();
        let id = reg.create_properties().unwrap();
        reg.set_pointer(id, "ptr", Some(Arc::new(7i32))).unwrap();
        assert_eq!(reg.get_number(id, "ptr", -1), -1);
        assert_eq!(&*reg.get_string(id, "ptr", "dflt"), "dflt");
        assert_eq!(reg.get_number(id, "missing", 11), 11);
        assert_eq!(reg.get_float(id, "", 1.5), 1.5);
        assert_eq!(reg.get_pointer_as::<i32>(id, "ptr").as_deref(), Some(&7));
        assert!(reg.get_pointer_as::<u64>(id, "ptr").is_none());
        assert!(reg.get_pointer(id, "missing", None).is_none());
    }

    #[test]
    fn none_values_clear() {
        let reg = Registry::new();
        let id = reg.create_properties().unwrap();
        reg.set_string(id, "s", Some("v")).unwrap();
        reg.set_pointer(id, "p", Some(Arc::new(1u8))).unwrap();
        reg.set_string(id, "s", None).unwrap();
        reg.set_pointer(id, "p", None).unwrap();
        assert!(!reg.has_property(id, "s"));
        assert!(!reg.has_property(id, "p"));
    }

    #[test]
    fn dump_reports_every_entry() {
        let reg = Registry::new();
        let id = reg.create_properties().unwrap();
        reg.set_string(id, "s", Some("text")).unwrap();
        reg.set_float(id, "f", 0.5).unwrap();
        reg.dump_properties(id).unwrap();
        reg.destroy_properties(id);
        assert_eq!(reg.dump_properties(id), Err(PropertyError::InvalidId(id.get())));
    }
}
