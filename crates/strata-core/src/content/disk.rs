//! Content store backed by a directory tree.
//!
//! Folders map to directories and file nodes to regular files. Node kinds and
//! properties live in a hidden `.strata-node.json` inside each directory, which
//! also carries the properties of the directory's file children. Entries whose
//! name starts with `.` are never listed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::content::staging::{StagedOp, Staging};
use crate::content::undo::UndoLog;
use crate::content::{ChildEntry, ContentStore, Node, NodeKind, validate_path};
use crate::error::StoreError;
use crate::fs::{remove_path_if_exists, write_atomic};
use crate::types::{base_name, join_path, normalize_path, parent_path};

/// Per-directory metadata file.
pub const META_FILENAME: &str = ".strata-node.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirMeta {
    #[serde(default)]
    kind: NodeKind,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, serde_json::Value>,

    /// Properties of file children, keyed by file name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    files: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl DirMeta {
    fn is_plain(&self) -> bool {
        self.kind == NodeKind::Folder && self.properties.is_empty() && self.files.is_empty()
    }
}

/// Content store rooted at a directory on disk.
///
/// Change markers are modification times in nanoseconds since the epoch.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    staging: Mutex<Staging>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: Mutex::new(Staging::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of a content path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    fn staging(&self) -> std::sync::MutexGuard<'_, Staging> {
        self.staging
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(path: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_string(),
            source,
        }
    }

    fn read_meta(&self, dir_path: &str) -> Result<DirMeta, StoreError> {
        let meta_path = self.host_path(dir_path).join(META_FILENAME);
        let bytes = match std::fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(DirMeta::default()),
            Err(source) => return Err(Self::io_error(dir_path, source)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Metadata {
            path: dir_path.to_string(),
            source,
        })
    }

    fn write_meta(&self, dir_path: &str, meta: &DirMeta) -> Result<(), StoreError> {
        let meta_path = self.host_path(dir_path).join(META_FILENAME);
        if meta.is_plain() {
            remove_path_if_exists(&meta_path).map_err(|source| Self::io_error(dir_path, source))?;
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(meta).map_err(|source| StoreError::Metadata {
            path: dir_path.to_string(),
            source,
        })?;
        write_atomic(&meta_path, &bytes).map_err(|source| Self::io_error(dir_path, source))
    }

    /// Committed node at `path`.
    fn load(&self, path: &str) -> Result<Option<Node>, StoreError> {
        let host = self.host_path(path);
        let metadata = match std::fs::metadata(&host) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Self::io_error(path, source)),
        };

        if metadata.is_dir() {
            let meta = self.read_meta(path)?;
            return Ok(Some(Node {
                kind: meta.kind,
                properties: meta.properties,
                data: None,
            }));
        }

        let data = std::fs::read(&host).map_err(|source| Self::io_error(path, source))?;
        let properties = match parent_path(path) {
            Some(parent) => self
                .read_meta(parent)?
                .files
                .remove(base_name(path))
                .unwrap_or_default(),
            None => BTreeMap::new(),
        };
        Ok(Some(Node {
            kind: NodeKind::File,
            properties,
            data: Some(data),
        }))
    }

    fn entry_marker(&self, path: &str, host: &Path) -> Result<u64, StoreError> {
        let metadata = std::fs::metadata(host).map_err(|source| Self::io_error(path, source))?;
        let mut marker = modified_nanos(&metadata);
        if metadata.is_dir()
            && let Ok(meta) = std::fs::metadata(host.join(META_FILENAME))
        {
            marker = marker.max(modified_nanos(&meta));
        }
        Ok(marker)
    }

    /// Back up what `op` touches, then apply it.
    fn apply(&self, undo: &mut UndoLog, op: StagedOp) -> Result<(), StoreError> {
        let path = match &op {
            StagedOp::Put { path, .. } | StagedOp::Remove { path } => path.clone(),
        };
        for touched in self.touched_by(&op) {
            undo.save(touched).map_err(|source| Self::io_error(&path, source))?;
        }
        match op {
            StagedOp::Put { path, node } => self.apply_put(&path, node),
            StagedOp::Remove { path } => self.apply_remove(&path),
        }
    }

    /// Host paths an operation may create, overwrite or delete.
    fn touched_by(&self, op: &StagedOp) -> Vec<PathBuf> {
        let (path, put_kind) = match op {
            StagedOp::Put { path, node } => (path.as_str(), Some(node.kind)),
            StagedOp::Remove { path } => (path.as_str(), None),
        };
        let host = self.host_path(path);
        let mut touched = Vec::new();

        if put_kind.is_some() {
            // Highest directory create_dir_all would add
            let created = host
                .ancestors()
                .take_while(|dir| *dir != self.root.as_path() && !dir.exists())
                .last();
            touched.extend(created.map(Path::to_path_buf));
        }
        match put_kind {
            Some(NodeKind::Folder | NodeKind::Structured) if host.is_dir() => {
                touched.push(host.join(META_FILENAME));
            }
            _ => touched.push(host),
        }
        if let Some(parent) = parent_path(path) {
            touched.push(self.host_path(parent).join(META_FILENAME));
        }
        touched
    }

    fn apply_put(&self, path: &str, node: Node) -> Result<(), StoreError> {
        let host = self.host_path(path);
        let io = |source| Self::io_error(path, source);
        let current = std::fs::symlink_metadata(&host).ok();

        match node.kind {
            NodeKind::Folder | NodeKind::Structured => {
                if current.as_ref().is_some_and(|m| !m.is_dir()) {
                    std::fs::remove_file(&host).map_err(io)?;
                    self.forget_file_properties(path)?;
                }
                std::fs::create_dir_all(&host).map_err(io)?;
                let mut meta = self.read_meta(path)?;
                meta.kind = node.kind;
                meta.properties = node.properties;
                self.write_meta(path, &meta)
            }
            NodeKind::File => {
                if current.as_ref().is_some_and(|m| m.is_dir()) {
                    std::fs::remove_dir_all(&host).map_err(io)?;
                }
                write_atomic(&host, node.data.as_deref().unwrap_or_default()).map_err(io)?;
                let Some(parent) = parent_path(path) else {
                    return Ok(());
                };
                let mut meta = self.read_meta(parent)?;
                let name = base_name(path).to_string();
                if node.properties.is_empty() {
                    meta.files.remove(&name);
                } else {
                    meta.files.insert(name, node.properties);
                }
                self.write_meta(parent, &meta)
            }
        }
    }

    fn apply_remove(&self, path: &str) -> Result<(), StoreError> {
        let host = self.host_path(path);
        remove_path_if_exists(&host).map_err(|source| Self::io_error(path, source))?;
        self.forget_file_properties(path)
    }

    fn forget_file_properties(&self, path: &str) -> Result<(), StoreError> {
        let Some(parent) = parent_path(path) else {
            return Ok(());
        };
        if !self.host_path(parent).is_dir() {
            return Ok(());
        }
        let mut meta = self.read_meta(parent)?;
        if meta.files.remove(base_name(path)).is_some() {
            self.write_meta(parent, &meta)?;
        }
        Ok(())
    }
}

fn modified_nanos(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

impl ContentStore for FsStore {
    fn list(&self, location: &str) -> Result<Vec<ChildEntry>, StoreError> {
        let location = normalize_path(location);
        let host = self.host_path(&location);
        let entries = match std::fs::read_dir(&host) {
            Ok(entries) => entries,
            Err(err)
                if err.kind() == std::io::ErrorKind::NotFound
                    || err.kind() == std::io::ErrorKind::NotADirectory =>
            {
                return Ok(Vec::new());
            }
            Err(source) => return Err(Self::io_error(&location, source)),
        };

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Self::io_error(&location, source))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = join_path(&location, &name);
            let file_type = entry
                .file_type()
                .map_err(|source| Self::io_error(&path, source))?;
            let kind = if file_type.is_dir() {
                self.read_meta(&path)?.kind
            } else {
                NodeKind::File
            };
            let marker = self.entry_marker(&path, &entry.path())?;
            children.push(ChildEntry {
                name,
                path,
                kind,
                marker,
            });
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    fn change_marker(&self, location: &str) -> Result<Option<u64>, StoreError> {
        let location = normalize_path(location);
        let host = self.host_path(&location);
        if !host.is_dir() {
            return Ok(None);
        }
        let own = self.entry_marker(&location, &host)?;
        let marker = self
            .list(&location)?
            .iter()
            .map(|child| child.marker)
            .fold(own, u64::max);
        Ok(Some(marker))
    }

    fn node(&self, path: &str) -> Result<Option<Node>, StoreError> {
        let path = normalize_path(path);
        let mut failure = None;
        let node = self.staging().resolve(&path, |p| match self.load(p) {
            Ok(node) => node,
            Err(err) => {
                failure = Some(err);
                None
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(node),
        }
    }

    fn put(&self, path: &str, node: Node) -> Result<(), StoreError> {
        validate_path(path)?;
        let path = normalize_path(path);
        if path == "/" {
            return Err(StoreError::Constraint {
                path,
                message: "the root node cannot be replaced".to_string(),
            });
        }
        self.staging().push(StagedOp::Put { path, node });
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        validate_path(path)?;
        let path = normalize_path(path);
        if path == "/" {
            return Err(StoreError::Constraint {
                path,
                message: "the root node cannot be removed".to_string(),
            });
        }
        self.staging().push(StagedOp::Remove { path });
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let ops = self.staging().take();
        if ops.is_empty() {
            return Ok(());
        }
        let total = ops.len();
        let mut undo = UndoLog::new(&self.root);
        for (applied, op) in ops.into_iter().enumerate() {
            if let Err(err) = self.apply(&mut undo, op) {
                tracing::warn!(
                    root = %self.root.display(),
                    applied,
                    dropped = total - applied,
                    error = %err,
                    "commit failed, restoring previous content"
                );
                if let Err(restore) = undo.restore() {
                    tracing::error!(
                        root = %self.root.display(),
                        error = %restore,
                        "content root may hold a partial commit"
                    );
                }
                return Err(err);
            }
        }
        undo.discard();
        Ok(())
    }

    fn rollback(&self) {
        self.staging().clear();
    }

    fn has_pending_changes(&self) -> bool {
        !self.staging().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsStore) {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let store = FsStore::new(tmp.path());
        (tmp, store)
    }

    #[test]
    fn test_file_roundtrip_with_properties() {
        let (tmp, store) = store();
        store
            .put(
                "/apps/install/logo.png",
                Node::file(b"png".to_vec()).with_property("mime", "image/png"),
            )
            .expect("put should succeed");
        store.commit().expect("commit should succeed");

        assert!(tmp.path().join("apps/install/logo.png").is_file());
        let node = store
            .node("/apps/install/logo.png")
            .expect("node should succeed")
            .expect("node should exist");
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.data.as_deref(), Some(b"png".as_slice()));
        assert_eq!(node.property("mime"), Some(&serde_json::json!("image/png")));
    }

    #[test]
    fn test_structured_node_is_a_directory_with_metadata() {
        let (tmp, store) = store();
        let mut props = BTreeMap::new();
        props.insert("title".to_string(), serde_json::json!("Foo"));
        store
            .put("/content/foo", Node::structured(props))
            .expect("put should succeed");
        store.commit().expect("commit should succeed");

        assert!(tmp.path().join("content/foo").join(META_FILENAME).is_file());
        let listed = store.list("/content").expect("list should succeed");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, NodeKind::Structured);
    }

    #[test]
    fn test_hidden_entries_are_not_listed() {
        let (tmp, store) = store();
        std::fs::create_dir_all(tmp.path().join("apps/install")).expect("mkdir should succeed");
        std::fs::write(tmp.path().join("apps/install/.swp"), "x").expect("write should succeed");
        std::fs::write(tmp.path().join("apps/install/a.jar"), "x").expect("write should succeed");

        let names: Vec<String> = store
            .list("/apps/install")
            .expect("list should succeed")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["a.jar".to_string()]);
    }

    #[test]
    fn test_rollback_leaves_disk_untouched() {
        let (tmp, store) = store();
        store.put("/x/y", Node::folder()).expect("put should succeed");
        assert!(store.exists("/x/y").expect("exists should succeed"));
        store.rollback();
        assert!(!tmp.path().join("x").exists());
        assert!(!store.exists("/x/y").expect("exists should succeed"));
    }

    #[test]
    fn test_remove_drops_file_properties() {
        let (_tmp, store) = store();
        store
            .put("/a/b.txt", Node::file(Vec::new()).with_property("k", "v"))
            .expect("put should succeed");
        store.commit().expect("commit should succeed");
        store.remove("/a/b.txt").expect("remove should succeed");
        store.commit().expect("commit should succeed");

        store.put("/a/b.txt", Node::file(Vec::new())).expect("put should succeed");
        store.commit().expect("commit should succeed");
        let node = store
            .node("/a/b.txt")
            .expect("node should succeed")
            .expect("node should exist");
        assert!(node.properties.is_empty());
    }

    #[test]
    fn test_missing_location_has_no_marker() {
        let (_tmp, store) = store();
        assert_eq!(store.change_marker("/nope").expect("marker should succeed"), None);
        assert!(store.list("/nope").expect("list should succeed").is_empty());
    }
}
