//! Persisted experiment results keyed by `ExperimentKey`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::key::ExperimentKey;
use crate::error::Result;
use crate::io::{load_bincode, save_bincode};

/// A key → value map backed by a bincode file.
///
/// On disk the map is a list of `(key, value)` entries in insertion order.
#[derive(Debug)]
pub struct ResultStore<V> {
    path: PathBuf,
    overwrite: bool,
    entries: Vec<(ExperimentKey, V)>,
    index: HashMap<ExperimentKey, usize>,
}

impl<V: Serialize + DeserializeOwned> ResultStore<V> {
    /// Load the map at `path`, or start empty when it does not exist or
    /// `overwrite` is set.
    pub fn load(path: impl Into<PathBuf>, overwrite: bool) -> Result<Self> {
        let path = path.into();
        let entries: Vec<(ExperimentKey, V)> = if !overwrite && path.exists() {
            load_bincode(&path)?
        } else {
            Vec::new()
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), overwrite, "result store opened");

        let mut store = Self {
            path,
            overwrite,
            entries: Vec::with_capacity(entries.len()),
            index: HashMap::new(),
        };
        for (key, value) in entries {
            store.insert(key, value);
        }
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        save_bincode(&self.path, &self.entries)
    }

    /// Insert or replace the value for `key`.
    pub fn insert(&mut self, key: ExperimentKey, value: V) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &ExperimentKey) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }
}

impl<V> ResultStore<V> {
    pub fn contains(&self, key: &ExperimentKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExperimentKey, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indices.bin");

        let mut store: ResultStore<Vec<usize>> = ResultStore::load(&path, false).unwrap();
        assert!(store.is_empty());
        store.insert(ExperimentKey::new(0.0, 0.05, 10), vec![0, 3]);
        store.insert(ExperimentKey::new(0.5, 0.05, 10), vec![]);
        store.save().unwrap();

        let loaded: ResultStore<Vec<usize>> = ResultStore::load(&path, false).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(&ExperimentKey::new(0.0, 0.05, 10)), Some(&vec![0, 3]));
        assert!(loaded.contains(&ExperimentKey::new(0.5, 0.05, 10)));
    }

    #[test]
    fn test_overwrite_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confusion.bin");
        let mut store: ResultStore<u32> = ResultStore::load(&path, false).unwrap();
        store.insert(ExperimentKey::new(0.0, 0.1, 5), 7);
        store.save().unwrap();

        let fresh: ResultStore<u32> = ResultStore::load(&path, true).unwrap();
        assert!(fresh.is_empty());
        assert!(fresh.overwrite());
    }

    #[test]
    fn test_insert_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: ResultStore<u32> = ResultStore::load(dir.path().join("x.bin"), false).unwrap();
        let key = ExperimentKey::new(0.0, 0.1, 5);
        store.insert(key, 1);
        store.insert(key, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key), Some(&2));
    }
}
