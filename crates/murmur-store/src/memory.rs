//! In-memory key-value store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Result, Store, StoreError};

/// A thread-safe in-memory store.
///
/// The default backend for the DHT and the broadcast dedup set. Contents
/// are lost when the process exits; use [`crate::SledStore`] where the
/// peer table must survive restarts.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn len(&self) -> Result<usize> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_key() {
        let store = MemStore::new();
        assert_eq!(store.get(b"absent").unwrap(), None);
    }

    #[test]
    fn test_insert_and_get() {
        let store = MemStore::new();
        store.insert(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_insert_overwrites() {
        let store = MemStore::new();
        store.insert(b"k", b"v1").unwrap();
        store.insert(b"k", b"v2").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let store = MemStore::new();
        store.insert(b"k", b"v").unwrap();
        store.remove(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        // Removing again is a no-op.
        store.remove(b"k").unwrap();
    }

    #[test]
    fn test_entries_snapshot() {
        let store = MemStore::new();
        store.insert(b"a", b"1").unwrap();
        store.insert(b"b", b"2").unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&(b"a".to_vec(), b"1".to_vec())));
        assert!(entries.contains(&(b"b".to_vec(), b"2".to_vec())));
    }

    #[test]
    fn test_contains() {
        let store = MemStore::new();
        assert!(!store.contains(b"k").unwrap());
        store.insert(b"k", b"v").unwrap();
        assert!(store.contains(b"k").unwrap());
    }
}
