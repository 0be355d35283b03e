//! Persisted client preferences.
//!
//! A tiny string-to-string store standing in for client-side persistent
//! storage. The scope controller is its only writer; everything else reads it
//! through [`read_persisted_scope`] and must treat the value as eventually
//! consistent with the controller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::mutex_lock;
use crate::domain::types::Scope;

/// Key holding the last confirmed scope (`personal` or `family`).
pub const VIEW_MODE_KEY: &str = "fire_view_mode";
/// Key recording that the one-time family default has been applied.
pub const VIEW_MODE_ONBOARDED_KEY: &str = "fire_view_mode_onboarded";

const SOURCE: &str = "infra::preferences";

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("failed to write preferences to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode preferences: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Synchronous key/value persistence.
///
/// Reads never fail: missing or unreadable state reads as absent.
pub trait PreferenceStore: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

/// Read the persisted scope directly, bypassing the scope controller.
///
/// Unknown values read as absent.
pub fn read_persisted_scope(store: &dyn PreferenceStore) -> Option<Scope> {
    let raw = store.read(VIEW_MODE_KEY)?;
    match raw.parse() {
        Ok(scope) => Some(scope),
        Err(err) => {
            warn!(value = %raw, error = %err, "Ignoring unrecognised persisted scope");
            None
        }
    }
}

/// Preferences kept as one JSON object in a file.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Preferences unreadable; treating as empty"
                );
                return BTreeMap::new();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(
                path = %self.path.display(),
                error = %err,
                "Preferences corrupt; treating as empty"
            );
            BTreeMap::new()
        })
    }

    fn write_error(&self, source: std::io::Error) -> PreferenceError {
        PreferenceError::Write {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn read(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let _guard = mutex_lock(&self.write_lock, SOURCE, "write");
        let mut values = self.load();
        values.insert(key.to_string(), value.to_string());
        let encoded = serde_json::to_vec_pretty(&values)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| self.write_error(err))?;
        }
        std::fs::write(&self.path, encoded).map_err(|err| self.write_error(err))?;
        debug!(path = %self.path.display(), key, "Preference persisted");
        Ok(())
    }
}

/// In-process preferences for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        mutex_lock(&self.values, SOURCE, "with_value").insert(key.to_string(), value.to_string());
        self
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn read(&self, key: &str) -> Option<String> {
        mutex_lock(&self.values, SOURCE, "read").get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        mutex_lock(&self.values, SOURCE, "write").insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilePreferenceStore::new(dir.path().join("absent.json"));
        assert_eq!(store.read(VIEW_MODE_KEY), None);
    }

    #[test]
    fn write_creates_parent_dirs_and_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("prefs.json");
        let store = FilePreferenceStore::new(&path);

        store.write(VIEW_MODE_KEY, "family").expect("write");
        store.write(VIEW_MODE_ONBOARDED_KEY, "true").expect("write");

        let reopened = FilePreferenceStore::new(&path);
        assert_eq!(read_persisted_scope(&reopened), Some(Scope::Family));
        assert_eq!(reopened.read(VIEW_MODE_ONBOARDED_KEY).as_deref(), Some("true"));
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_replaced_on_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, b"not json").expect("seed");
        let store = FilePreferenceStore::new(&path);

        assert_eq!(store.read(VIEW_MODE_KEY), None);
        store.write(VIEW_MODE_KEY, "personal").expect("write");
        assert_eq!(read_persisted_scope(&store), Some(Scope::Personal));
    }

    #[test]
    fn unknown_scope_value_is_ignored() {
        let store = MemoryPreferenceStore::new().with_value(VIEW_MODE_KEY, "household");
        assert_eq!(read_persisted_scope(&store), None);
    }
}
