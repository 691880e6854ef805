//! Generic key/value persistence used by journal backends and repositories.
//!
//! Keys come in two shapes: a flat byte string, or a composite "clustering
//! key" made of ordered parts. A composite key is assembled through
//! [`PartialKey`] and only becomes a usable [`Key`] once every part is
//! bound, so point reads and writes can never receive a half-built key.
//! Partial keys remain useful as prefixes for [`Store::scan`].

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::StoreError;

/// A complete storage key.
///
/// Equality and ordering are byte-wise over the parts, so composite keys
/// sharing a prefix sort next to each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Flat(Vec<u8>),
    Composite(Vec<Vec<u8>>),
}

impl Key {
    pub fn flat(bytes: impl Into<Vec<u8>>) -> Key {
        Key::Flat(bytes.into())
    }

    /// Start a composite key with `arity` parts.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventfold_journal::Key;
    ///
    /// let partial = Key::composite(2).bind("instance");
    /// assert!(!partial.is_complete());
    ///
    /// let key = partial.bind("g1").complete().unwrap();
    /// assert_eq!(key.parts().len(), 2);
    /// ```
    pub fn composite(arity: usize) -> PartialKey {
        PartialKey {
            arity,
            parts: Vec::with_capacity(arity),
        }
    }

    /// The key's parts; a flat key has exactly one.
    pub fn parts(&self) -> &[Vec<u8>] {
        match self {
            Key::Flat(bytes) => std::slice::from_ref(bytes),
            Key::Composite(parts) => parts,
        }
    }
}

/// A composite key under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialKey {
    arity: usize,
    parts: Vec<Vec<u8>>,
}

impl PartialKey {
    /// Bind the next part of the key.
    pub fn bind(mut self, part: impl AsRef<[u8]>) -> Self {
        self.parts.push(part.as_ref().to_vec());
        self
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_complete(&self) -> bool {
        self.parts.len() == self.arity
    }

    /// Turn the partial key into a usable [`Key`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IncompleteKey`] unless exactly `arity` parts
    /// have been bound.
    pub fn complete(self) -> Result<Key, StoreError> {
        if !self.is_complete() {
            return Err(StoreError::IncompleteKey {
                bound: self.parts.len(),
                arity: self.arity,
            });
        }
        Ok(Key::Composite(self.parts))
    }

    /// Whether `key` is a composite key of the same arity that starts with
    /// every part bound so far.
    pub fn matches(&self, key: &Key) -> bool {
        match key {
            Key::Composite(parts) => {
                parts.len() == self.arity && parts.starts_with(&self.parts)
            }
            Key::Flat(_) => false,
        }
    }
}

/// Minimal key/value persistence contract.
///
/// Implementations must make each `put` atomic: a concurrent `get` sees
/// either the previous value or the new one, never a mix.
pub trait Store: Send + Sync {
    /// Set the key's value, replacing any previous value.
    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError>;

    /// Read the key's value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if nothing is stored under `key`.
    fn get(&self, key: &Key) -> Result<Vec<u8>, StoreError>;

    /// Remove the key's value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if nothing is stored under `key`.
    fn delete(&self, key: &Key) -> Result<(), StoreError>;

    /// All entries whose key [`matches`](PartialKey::matches) `prefix`, in
    /// key order.
    fn scan(&self, prefix: &PartialKey) -> Result<Vec<(Key, Vec<u8>)>, StoreError>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn get(&self, key: &Key) -> Result<Vec<u8>, StoreError> {
        (**self).get(key)
    }

    fn delete(&self, key: &Key) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn scan(&self, prefix: &PartialKey) -> Result<Vec<(Key, Vec<u8>)>, StoreError> {
        (**self).scan(prefix)
    }
}

/// An in-memory [`Store`] backed by an ordered map.
///
/// Readers share a read lock and never block each other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pairs: RwLock<BTreeMap<Key, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn put(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        pairs.insert(key.clone(), value);
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Vec<u8>, StoreError> {
        let pairs = self.pairs.read().unwrap_or_else(PoisonError::into_inner);
        pairs.get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn delete(&self, key: &Key) -> Result<(), StoreError> {
        let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        pairs.remove(key).map(|_| ()).ok_or(StoreError::NotFound)
    }

    fn scan(&self, prefix: &PartialKey) -> Result<Vec<(Key, Vec<u8>)>, StoreError> {
        let pairs = self.pairs.read().unwrap_or_else(PoisonError::into_inner);
        // Composite keys sharing the bound parts sort together, starting at
        // the bare prefix.
        Ok(pairs
            .range(Key::Composite(prefix.parts.clone())..)
            .take_while(|(key, _)| key.parts().starts_with(&prefix.parts))
            .filter(|(key, _)| prefix.matches(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(parts: &[&str]) -> Key {
        parts
            .iter()
            .fold(Key::composite(parts.len()), |k, p| k.bind(p))
            .complete()
            .expect("all parts bound")
    }

    #[test]
    fn incomplete_key_cannot_be_completed() {
        let err = Key::composite(2).bind("a").complete().unwrap_err();
        assert_eq!(err, StoreError::IncompleteKey { bound: 1, arity: 2 });

        let err = Key::composite(1).bind("a").bind("b").complete().unwrap_err();
        assert_eq!(err, StoreError::IncompleteKey { bound: 2, arity: 1 });
    }

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::new();
        let k = Key::flat("alpha");

        assert_eq!(store.get(&k), Err(StoreError::NotFound));
        store.put(&k, b"1".to_vec()).expect("put");
        assert_eq!(store.get(&k).expect("get"), b"1");

        store.put(&k, b"2".to_vec()).expect("overwrite");
        assert_eq!(store.get(&k).expect("get"), b"2");

        store.delete(&k).expect("delete");
        assert_eq!(store.get(&k), Err(StoreError::NotFound));
        assert_eq!(store.delete(&k), Err(StoreError::NotFound));
    }

    #[test]
    fn flat_and_composite_keys_do_not_collide() {
        let store = MemoryStore::new();
        store.put(&Key::flat("a"), b"flat".to_vec()).expect("put");
        store.put(&key(&["a"]), b"composite".to_vec()).expect("put");

        assert_eq!(store.get(&Key::flat("a")).expect("get"), b"flat");
        assert_eq!(store.get(&key(&["a"])).expect("get"), b"composite");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn scan_matches_prefix_and_arity_in_order() {
        let store = MemoryStore::new();
        store.put(&key(&["t", "b"]), b"2".to_vec()).expect("put");
        store.put(&key(&["t", "a"]), b"1".to_vec()).expect("put");
        store.put(&key(&["u", "a"]), b"x".to_vec()).expect("put");
        store.put(&key(&["t"]), b"short".to_vec()).expect("put");
        store.put(&Key::flat("t"), b"flat".to_vec()).expect("put");

        let found = store.scan(&Key::composite(2).bind("t")).expect("scan");
        let values: Vec<&[u8]> = found.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![b"1".as_slice(), b"2".as_slice()]);
    }

    #[test]
    fn scan_stops_at_the_end_of_the_prefix() {
        let store = MemoryStore::new();
        store.put(&key(&["s", "z"]), b"before".to_vec()).expect("put");
        store.put(&key(&["t", "a"]), b"1".to_vec()).expect("put");
        store.put(&key(&["t", "a", "x"]), b"deeper".to_vec()).expect("put");
        store.put(&key(&["t", "b"]), b"2".to_vec()).expect("put");
        store.put(&key(&["ta", "a"]), b"sibling".to_vec()).expect("put");
        store.put(&key(&["t\0", "a"]), b"sibling".to_vec()).expect("put");

        let found = store.scan(&Key::composite(2).bind("t")).expect("scan");
        let values: Vec<&[u8]> = found.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![b"1".as_slice(), b"2".as_slice()]);

        let all = store.scan(&Key::composite(2)).expect("scan");
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn arc_store_delegates() {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<MemoryStore> = Arc::clone(&store);
        shared.put(&Key::flat("k"), b"v".to_vec()).expect("put");
        assert_eq!(store.get(&Key::flat("k")).expect("get"), b"v");
    }
}
