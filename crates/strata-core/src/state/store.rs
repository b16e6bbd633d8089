//! Resource state persistence in the state directory
//!
//! The whole record set is loaded eagerly and kept in memory. Every mutating
//! batch ends with [`StateStore::flush`], which replaces the file atomically so
//! a crash mid-write never exposes a half-written state.

use std::path::{Path, PathBuf};

use crate::error::StateError;
use crate::fs::write_atomic;
use crate::state::types::{ResourceRecord, STATE_VERSION, StateFile};
use crate::types::ResourceId;

/// File name of the state file inside the state directory.
pub const STATE_FILENAME: &str = "resources.json";

/// Durable mapping from resource id to [`ResourceRecord`].
///
/// Stored as JSON:
/// - Unix: `$XDG_STATE_HOME/strata/resources.json` (fallback: `~/.local/state/strata/`)
/// - Windows: `%LOCALAPPDATA%\strata\resources.json`
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: StateFile,
    dirty: bool,
}

impl StateStore {
    /// Get default state directory
    pub fn default_state_dir() -> anyhow::Result<PathBuf> {
        let base = if cfg!(unix) {
            dirs::state_dir()
                .or_else(dirs::data_local_dir)
                .ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?
        } else {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Cannot determine local app data directory"))?
        };
        Ok(base.join("strata"))
    }

    /// Open the state store inside `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Result<Self, StateError> {
        Self::open(state_dir.join(STATE_FILENAME))
    }

    /// Load the state file at `path`.
    ///
    /// A missing or empty file means nothing is installed. A file that cannot
    /// be parsed is an error: starting from an empty state would re-install
    /// everything on top of what the runtime already has.
    pub fn open(path: PathBuf) -> Result<Self, StateError> {
        let state = load_state(&path)?;
        tracing::debug!(
            path = %path.display(),
            resources = state.resources.len(),
            "loaded resource state"
        );
        Ok(Self {
            path,
            state,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.state.resources.contains_key(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.state.resources.get(id)
    }

    pub fn put(&mut self, id: ResourceId, mut record: ResourceRecord) {
        record.id = id.clone();
        record.updated_at = chrono::Utc::now();
        self.state.resources.insert(id, record);
        self.dirty = true;
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceRecord> {
        let removed = self.state.resources.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Ids of all known resources, sorted.
    pub fn ids(&self) -> Vec<ResourceId> {
        self.state.resources.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.state.resources.values()
    }

    pub fn len(&self) -> usize {
        self.state.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.resources.is_empty()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.state.settings.get(key).map(|v| v.as_str())
    }

    pub fn set_setting(&mut self, key: &str, value: &str) {
        if self.setting(key) != Some(value) {
            self.state
                .settings
                .insert(key.to_string(), value.to_string());
            self.dirty = true;
        }
    }

    /// True if there are mutations not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist all records (tmp + rename).
    pub fn flush(&mut self) -> Result<(), StateError> {
        self.state.generated_at = chrono::Utc::now();
        // Serialize first so a serialization failure never touches the file
        let bytes = serde_json::to_vec_pretty(&self.state).map_err(StateError::Serialize)?;
        write_atomic(&self.path, &bytes).map_err(|source| StateError::Write {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), "flushed resource state");
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<StateFile, StateError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StateFile::new()),
        Err(source) => {
            return Err(StateError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(StateFile::new());
    }

    let state: StateFile = serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    if state.version != STATE_VERSION {
        return Err(StateError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: state.version,
        });
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, digest: &str) -> ResourceRecord {
        let mut record = ResourceRecord::new(ResourceId::new(id));
        record.digest = Some(digest.to_string());
        record.installed = true;
        record.processor = Some("artifact".to_string());
        record
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let store = StateStore::in_dir(tmp.path()).expect("open should succeed");
        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_open_empty_file_is_empty() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        std::fs::write(tmp.path().join(STATE_FILENAME), "  \n").expect("write should succeed");
        let store = StateStore::in_dir(tmp.path()).expect("open should succeed");
        assert!(store.is_empty());
    }

    #[test]
    fn test_flush_and_reopen_persist_data() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let id = ResourceId::new("/apps/install/a.jar");

        let mut store = StateStore::in_dir(tmp.path()).expect("open should succeed");
        store.put(id.clone(), record("/apps/install/a.jar", "abc"));
        store.set_setting("folder_pattern", ".*/install$");
        assert!(store.is_dirty());
        store.flush().expect("flush should succeed");
        assert!(!store.is_dirty());

        let reopened = StateStore::in_dir(tmp.path()).expect("reopen should succeed");
        let loaded = reopened.get(&id).expect("record should exist");
        assert_eq!(loaded.digest.as_deref(), Some("abc"));
        assert_eq!(loaded.processor.as_deref(), Some("artifact"));
        assert_eq!(reopened.setting("folder_pattern"), Some(".*/install$"));
    }

    #[test]
    fn test_put_forces_key_into_record() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let mut store = StateStore::in_dir(tmp.path()).expect("open should succeed");
        let id = ResourceId::new("/apps/install/b.jar");
        store.put(id.clone(), record("/somewhere/else", "d"));
        assert_eq!(store.get(&id).map(|r| r.id.clone()), Some(id));
    }

    #[test]
    fn test_remove_missing_is_not_dirty() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let mut store = StateStore::in_dir(tmp.path()).expect("open should succeed");
        assert!(store.remove(&ResourceId::new("/none")).is_none());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        std::fs::write(tmp.path().join(STATE_FILENAME), "{ not json").expect("write should succeed");
        let err = StateStore::in_dir(tmp.path()).expect_err("corrupt state must not load");
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        std::fs::write(
            tmp.path().join(STATE_FILENAME),
            r#"{"version": 9, "generated_at": "2024-01-01T00:00:00Z"}"#,
        )
        .expect("write should succeed");
        let err = StateStore::in_dir(tmp.path()).expect_err("version 9 must not load");
        assert!(matches!(err, StateError::UnsupportedVersion { version: 9, .. }));
    }

    #[test]
    fn test_flush_is_crash_safe() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let mut store = StateStore::in_dir(tmp.path()).expect("open should succeed");
        store.put(
            ResourceId::new("/apps/install/a.jar"),
            record("/apps/install/a.jar", "1"),
        );
        store.flush().expect("flush should succeed");

        // A stale temp file from an interrupted flush does not affect loading
        std::fs::write(tmp.path().join(".resources.json.999.tmp"), "{ partial")
            .expect("write should succeed");

        let reopened = StateStore::in_dir(tmp.path()).expect("reopen should succeed");
        assert_eq!(reopened.len(), 1);
    }
}
