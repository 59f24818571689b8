//! Persisted consent preferences.
//!
//! A preference is a tri-state flag: absent (ask the user), `true`
//! (share without asking) or `false` (deny without asking).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PreferenceError;

/// Key/value store for boolean preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<bool>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn set(&self, key: &str, value: bool) -> Result<(), PreferenceError>;

    fn remove(&self, key: &str) -> Result<(), PreferenceError>;
}

// ─── In-memory ──────────────────────────────────────────────────────

/// Process-local store. Forgets everything on exit.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, bool>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(self, key: impl Into<String>, value: bool) -> Self {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
        self
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<bool> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn set(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// ─── JSON file ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    values: BTreeMap<String, bool>,
}

/// Store backed by a small JSON document on disk.
///
/// The whole file is rewritten on every change (write to a sibling temp
/// file, then rename).
#[derive(Debug)]
pub struct JsonPreferenceStore {
    path: PathBuf,
    file: Mutex<PreferenceFile>,
}

impl JsonPreferenceStore {
    /// Open `path`, treating a missing file as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferenceError> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => PreferenceFile::default(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PreferenceFile::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = file.values.len(), "preference store opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, bool>)) -> Result<(), PreferenceError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = file.clone();
        apply(&mut next.values);
        next.updated_at = Some(Utc::now());
        self.write(&next)?;
        // Memory only follows a successful write.
        *file = next;
        Ok(())
    }

    fn write(&self, file: &PreferenceFile) -> Result<(), PreferenceError> {
        let text = serde_json::to_string_pretty(file)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let written = fs::write(&tmp, text).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self, key: &str) -> Option<bool> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values
            .get(key)
            .copied()
    }

    fn set(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.update(|values| {
            values.insert(key.to_owned(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── memory ──────────────────────────────────────────────────────

    #[test]
    fn memory_store_is_tri_state() {
        let store = MemoryPreferenceStore::new();
        assert!(!store.has("k"));
        assert_eq!(store.get("k"), None);

        store.set("k", false).expect("set");
        assert!(store.has("k"));
        assert_eq!(store.get("k"), Some(false));

        store.remove("k").expect("remove");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn memory_store_seeded_value() {
        let store = MemoryPreferenceStore::new().with_value("geolocation.maps.allowed", true);
        assert_eq!(store.get("geolocation.maps.allowed"), Some(true));
    }

    // ── json ────────────────────────────────────────────────────────

    #[test]
    fn json_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonPreferenceStore::open(dir.path().join("prefs.json")).expect("open");
        assert!(!store.has("anything"));
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/prefs.json");

        let store = JsonPreferenceStore::open(&path).expect("open");
        store.set("geolocation.maps.allowed", true).expect("set");
        store.set("geolocation.other.allowed", false).expect("set");
        drop(store);

        let reopened = JsonPreferenceStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("geolocation.maps.allowed"), Some(true));
        assert_eq!(reopened.get("geolocation.other.allowed"), Some(false));

        reopened.remove("geolocation.maps.allowed").expect("remove");
        let again = JsonPreferenceStore::open(&path).expect("reopen");
        assert_eq!(again.get("geolocation.maps.allowed"), None);
        assert_eq!(again.get("geolocation.other.allowed"), Some(false));
    }

    #[test]
    fn json_store_failed_write_keeps_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parent = dir.path().join("blocker");
        let path = parent.join("prefs.json");
        let store = JsonPreferenceStore::open(&path).expect("open");
        store.set("kept", true).expect("set");

        // Replace the parent directory with a plain file so every write fails.
        fs::remove_dir_all(&parent).expect("remove dir");
        fs::write(&parent, "").expect("block");

        assert!(store.set("k", true).is_err());
        assert_eq!(store.get("k"), None);
        assert!(store.remove("kept").is_err());
        assert_eq!(store.get("kept"), Some(true));
    }

    #[test]
    fn json_store_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        // A non-empty directory at the target path makes the rename fail.
        fs::create_dir_all(path.join("occupied")).expect("dir");
        let store = JsonPreferenceStore {
            path: path.clone(),
            file: Mutex::new(PreferenceFile::default()),
        };

        assert!(store.set("k", false).is_err());
        assert_eq!(store.get("k"), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn json_store_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, "{not json").expect("write");
        let err = JsonPreferenceStore::open(&path).expect_err("garbage");
        assert!(matches!(err, PreferenceError::Json(_)));
    }

    #[test]
    fn json_store_empty_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        fs::write(&path, "").expect("write");
        let store = JsonPreferenceStore::open(&path).expect("open");
        assert!(!store.has("k"));
    }
}
