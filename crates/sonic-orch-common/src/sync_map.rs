//! Map wrapper that never creates entries implicitly.
//!
//! Lookups return `Option`, and refcount changes on a missing key are
//! errors instead of silently creating a zeroed entry.

use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Error type for SyncMap refcount operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Reference count underflow")]
    RefCountUnderflow,
}

/// Trait for values carrying a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count is already zero.
    fn decrement_ref(&mut self) -> Option<u32>;

    fn ref_count(&self) -> u32;
}

/// A map that never auto-vivifies entries.
///
/// ```
/// use sonic_orch_common::SyncMap;
///
/// let mut map: SyncMap<String, u64> = SyncMap::new();
/// assert!(map.get(&"20.0.0.2@mock_tunnel".to_string()).is_none());
/// assert!(map.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct SyncMap<K, V> {
    inner: HashMap<K, V>,
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the value for `key`. Never creates an entry.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Returns the value for `key` mutably. Never creates an entry.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
    V: HasRefCount,
{
    /// Increments the refcount of an existing entry.
    pub fn increment_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        self.inner
            .get_mut(key)
            .map(HasRefCount::increment_ref)
            .ok_or(SyncMapError::KeyNotFound)
    }

    /// Decrements the refcount of an existing entry, refusing to go below zero.
    pub fn decrement_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        match self.inner.get_mut(key) {
            Some(entry) => entry.decrement_ref().ok_or(SyncMapError::RefCountUnderflow),
            None => Err(SyncMapError::KeyNotFound),
        }
    }

    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.inner.get(key).map(HasRefCount::ref_count)
    }
}

impl<K, V> Default for SyncMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default)]
    struct Handle {
        refs: u32,
    }

    impl HasRefCount for Handle {
        fn increment_ref(&mut self) -> u32 {
            self.refs += 1;
            self.refs
        }

        fn decrement_ref(&mut self) -> Option<u32> {
            self.refs = self.refs.checked_sub(1)?;
            Some(self.refs)
        }

        fn ref_count(&self) -> u32 {
            self.refs
        }
    }

    #[test]
    fn test_lookups_never_create() {
        let mut map: SyncMap<String, Handle> = SyncMap::new();
        assert!(map.get(&"missing".to_string()).is_none());
        assert!(map.get_mut(&"missing".to_string()).is_none());
        assert_eq!(map.increment_ref(&"missing".to_string()), Err(SyncMapError::KeyNotFound));
        assert!(map.is_empty());
    }

    #[test]
    fn test_refcount_lifecycle() {
        let mut map: SyncMap<String, Handle> = SyncMap::new();
        let key = "20.0.0.2@mock_tunnel".to_string();
        map.insert(key.clone(), Handle::default());

        assert_eq!(map.increment_ref(&key), Ok(1));
        assert_eq!(map.increment_ref(&key), Ok(2));
        assert_eq!(map.ref_count(&key), Some(2));
        assert_eq!(map.decrement_ref(&key), Ok(1));
        assert_eq!(map.decrement_ref(&key), Ok(0));
        assert_eq!(map.decrement_ref(&key), Err(SyncMapError::RefCountUnderflow));

        assert!(map.remove(&key).is_some());
        assert_eq!(map.ref_count(&key), None);
    }
}
