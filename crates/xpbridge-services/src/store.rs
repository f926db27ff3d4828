//! Dataref store — the index registry and the value cache behind one lock.
//!
//! The registry maps dataref names to the small integer indices used on the
//! wire. The cache holds the last value received per name. They are updated
//! together: a release must drop the cached value in the same critical
//! section that frees the index, and a value packet must resolve all of its
//! indices against one consistent registry snapshot.
//!
//! Reads take the shared side of the lock, writes the exclusive side. The
//! lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use xpbridge_core::wire::ValueRecord;

// ── Registry ──────────────────────────────────────────────────────────────────

/// Bidirectional name ↔ index mapping.
///
/// Indices come from a counter that only ever increases, so a released
/// index is never handed out again during the process lifetime.
#[derive(Debug, Default)]
pub struct DatarefRegistry {
    next_index: i32,
    by_index: HashMap<i32, String>,
    by_name: HashMap<String, i32>,
}

impl DatarefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or return its existing index.
    pub fn allocate(&mut self, name: &str) -> i32 {
        if let Some(&index) = self.by_name.get(name) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.by_index.insert(index, name.to_string());
        self.by_name.insert(name.to_string(), index);
        index
    }

    /// Remove the registration for `name`, returning the freed index.
    pub fn release(&mut self, name: &str) -> Option<i32> {
        let index = self.by_name.remove(name)?;
        self.by_index.remove(&index);
        Some(index)
    }

    pub fn resolve(&self, index: i32) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ── Value cache ───────────────────────────────────────────────────────────────

/// Last known value per dataref name.
#[derive(Debug, Default)]
pub struct ValueCache {
    values: HashMap<String, f32>,
}

impl ValueCache {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }

    pub fn insert(&mut self, name: &str, value: f32) {
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<f32> {
        self.values.remove(name)
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    registry: DatarefRegistry,
    values: ValueCache,
}

/// Registry and cache, internally synchronized. Share via `Arc`.
#[derive(Debug, Default)]
pub struct DatarefStore {
    inner: RwLock<Inner>,
}

impl DatarefStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `name`, or return its existing index.
    pub fn allocate(&self, name: &str) -> i32 {
        self.write().registry.allocate(name)
    }

    /// Remove the registration for `name` and drop its cached value.
    pub fn release(&self, name: &str) -> Option<i32> {
        let mut inner = self.write();
        let index = inner.registry.release(name)?;
        inner.values.remove(name);
        Some(index)
    }

    pub fn resolve(&self, index: i32) -> Option<String> {
        self.read().registry.resolve(index).map(str::to_string)
    }

    pub fn index_of(&self, name: &str) -> Option<i32> {
        self.read().registry.index_of(name)
    }

    /// Last value received for `name`. `None` covers both "not subscribed"
    /// and "subscribed but nothing received yet".
    pub fn get(&self, name: &str) -> Option<f32> {
        self.read().values.get(name)
    }

    /// Last value for `name`, or 0.0 if none.
    pub fn value_or_default(&self, name: &str) -> f32 {
        self.get(name).unwrap_or_default()
    }

    /// Names currently registered, in no particular order.
    pub fn subscribed(&self) -> Vec<String> {
        self.read().registry.names().map(str::to_string).collect()
    }

    pub fn subscribed_count(&self) -> usize {
        self.read().registry.len()
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.read().registry.is_empty()
    }

    /// Store every record whose index resolves to a registered name, under
    /// a single exclusive lock. Records with unknown indices are dropped.
    /// Returns how many records were stored.
    pub fn apply(&self, records: &[ValueRecord]) -> usize {
        let mut inner = self.write();
        let Inner { registry, values } = &mut *inner;

        let mut applied = 0;
        for record in records {
            if let Some(name) = registry.resolve(record.index.get()) {
                values.insert(name, record.value.get());
                applied += 1;
            }
        }
        applied
    }
}
