use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::info;

use crate::serial::{self, DeserializeError, SerializeError};
use crate::StoredRule;

/// Errors raised by a [`RuleStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error("stored rule set at {} is unreadable: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: DeserializeError,
    },
}

/// Holds the current rule set.
///
/// `save` replaces the whole set; it is not additive. `get` hands out an
/// immutable snapshot that later saves never mutate.
pub trait RuleStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`StoreError`] when the set cannot be persisted. The previous
    /// set stays current in that case.
    fn save(&self, rules: Vec<StoredRule>) -> Result<(), StoreError>;

    fn get(&self) -> Arc<Vec<StoredRule>>;
}

/// In-memory store with copy-on-write snapshots.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    current: ArcSwap<Vec<StoredRule>>,
}

impl MemoryRuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleStore for MemoryRuleStore {
    fn save(&self, rules: Vec<StoredRule>) -> Result<(), StoreError> {
        self.current.store(Arc::new(rules));
        Ok(())
    }

    fn get(&self) -> Arc<Vec<StoredRule>> {
        self.current.load_full()
    }
}

/// File-backed store. The set is written to a temporary sibling and renamed
/// into place, so readers of the file never see a partial write.
#[derive(Debug)]
pub struct FileRuleStore {
    path: PathBuf,
    current: ArcSwap<Vec<StoredRule>>,
    write_lock: Mutex<()>,
}

impl FileRuleStore {
    /// Open a store at `path`, loading the rule set already stored there.
    /// A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read and
    /// [`StoreError::Corrupt`] if its contents fail to decode.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let rules = match fs::read(&path) {
            Ok(bytes) => serial::decode_rule_set(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        info!(path = %path.display(), rules = rules.len(), "opened rule store");
        Ok(Self {
            path,
            current: ArcSwap::from_pointee(rules),
            write_lock: Mutex::new(()),
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_atomically(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let temp = self.temp_path();
        let io = |source| StoreError::Io {
            path: temp.clone(),
            source,
        };
        let mut file = fs::File::create(&temp).map_err(io)?;
        file.write_all(bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        drop(file);
        fs::rename(&temp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl RuleStore for FileRuleStore {
    fn save(&self, rules: Vec<StoredRule>) -> Result<(), StoreError> {
        let bytes = serial::encode_rule_set(&rules)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_atomically(&bytes)?;
        self.current.store(Arc::new(rules));
        Ok(())
    }

    fn get(&self) -> Arc<Vec<StoredRule>> {
        self.current.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> StoredRule {
        StoredRule {
            name: name.into(),
            source: "true".into(),
            artifact: vec![0xAB],
        }
    }

    #[test]
    fn memory_store_starts_empty() {
        assert!(MemoryRuleStore::new().get().is_empty());
    }

    #[test]
    fn save_replaces_whole_set() {
        let store = MemoryRuleStore::new();
        store.save(vec![rule("a"), rule("b")]).unwrap();
        store.save(vec![rule("c")]).unwrap();
        let names: Vec<_> = store.get().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn snapshot_survives_later_save() {
        let store = MemoryRuleStore::new();
        store.save(vec![rule("a")]).unwrap();
        let snapshot = store.get();
        store.save(vec![rule("b"), rule("c")]).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "a");
        assert_eq!(store.get().len(), 2);
    }

    #[test]
    fn file_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.bin");
        {
            let store = FileRuleStore::open(&path).unwrap();
            assert!(store.get().is_empty());
            store.save(vec![rule("a"), rule("b")]).unwrap();
        }
        let reopened = FileRuleStore::open(&path).unwrap();
        assert_eq!(*reopened.get(), vec![rule("a"), rule("b")]);
        assert!(!dir.path().join("rules.bin.tmp").exists());
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.bin");
        fs::write(&path, b"not a rule set").unwrap();
        assert!(matches!(
            FileRuleStore::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn failed_write_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("rules.bin");
        let store = FileRuleStore::open(&path).unwrap();
        assert!(matches!(
            store.save(vec![rule("a")]),
            Err(StoreError::Io { .. })
        ));
        assert!(store.get().is_empty());
    }
}
