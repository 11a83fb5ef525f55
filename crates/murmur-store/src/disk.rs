//! Persistent key-value store backed by sled.

use std::path::Path;

use crate::{Result, Store, StoreError};

/// A sled-backed store.
///
/// Used as the DHT backend when the peer table should survive restarts:
/// bootstrap addresses seeded at first start are re-read from disk on the
/// next one. One database file can hold several stores under distinct
/// tree names (e.g. the peer table and the broadcast dedup set).
pub struct SledStore {
    // Held so the pagecache outlives every tree handle.
    _db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    /// Open (or create) a database at `path` and use the tree `name`.
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Database(format!("failed to open database: {}", e)))?;
        let tree = db
            .open_tree(name)
            .map_err(|e| StoreError::Database(format!("failed to open tree {}: {}", name, e)))?;
        Ok(Self { _db: db, tree })
    }

    /// Open a temporary database, removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Database(format!("failed to open database: {}", e)))?;
        let tree = db
            .open_tree("temp")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self { _db: db, tree })
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish_non_exhaustive()
    }
}

impl Store for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (k, v) = entry?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}
