//! Hierarchical content store abstraction.
//!
//! The controller only needs a narrow view of the store: list the children of a
//! location, read a node, and stage writes that become visible to other readers
//! on `commit`. Two implementations are provided:
//! - [`MemoryStore`]: in-process tree, used by tests and embedding callers
//! - [`FsStore`]: a directory tree on disk, used by the CLI

pub mod disk;
pub mod memory;
mod staging;
mod undo;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::fs::digest_node;
use crate::types::Payload;

pub use disk::FsStore;
pub use memory::MemoryStore;

/// Kind of a content node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Plain container
    #[default]
    Folder,
    /// Node carrying binary data
    File,
    /// Node created from a descriptor (properties, no data)
    Structured,
}

/// A node: kind, properties and optional data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,

    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl Node {
    pub fn folder() -> Self {
        Self {
            kind: NodeKind::Folder,
            properties: BTreeMap::new(),
            data: None,
        }
    }

    pub fn file(data: Vec<u8>) -> Self {
        Self {
            kind: NodeKind::File,
            properties: BTreeMap::new(),
            data: Some(data),
        }
    }

    pub fn structured(properties: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            kind: NodeKind::Structured,
            properties,
            data: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// Digest over properties and data.
    pub fn digest(&self) -> String {
        digest_node(&self.properties, self.data.as_deref())
    }
}

/// One child in a location listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    /// Opaque value that changes whenever the child changes.
    pub marker: u64,
}

/// Narrow interface to the hierarchical content store.
///
/// Reads through [`ContentStore::node`] see staged changes; listings and change
/// markers reflect committed state only. Writes are staged until
/// [`ContentStore::commit`]; [`ContentStore::rollback`] discards them.
pub trait ContentStore: std::fmt::Debug + Send + Sync {
    /// Direct children of `location`, sorted by name. Empty if it doesn't exist.
    fn list(&self, location: &str) -> Result<Vec<ChildEntry>, StoreError>;

    /// Aggregate change marker of `location` and its direct children.
    fn change_marker(&self, location: &str) -> Result<Option<u64>, StoreError>;

    /// Node at `path`, staged changes included.
    fn node(&self, path: &str) -> Result<Option<Node>, StoreError>;

    fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.node(path)?.is_some())
    }

    /// Data of the node at `path` with its digest.
    fn read(&self, path: &str) -> Result<Option<Payload>, StoreError> {
        Ok(self
            .node(path)?
            .and_then(|node| node.data)
            .map(Payload::new))
    }

    /// Stage a node at `path`, creating missing ancestors as folders.
    fn put(&self, path: &str, node: Node) -> Result<(), StoreError>;

    /// Stage removal of the subtree at `path`.
    fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Apply all staged changes as one save.
    fn commit(&self) -> Result<(), StoreError>;

    /// Discard all staged changes.
    fn rollback(&self);

    fn has_pending_changes(&self) -> bool;
}

/// Reject paths that would escape the store.
pub(crate) fn validate_path(path: &str) -> Result<(), StoreError> {
    if !path.starts_with('/') {
        return Err(StoreError::Constraint {
            path: path.to_string(),
            message: "content paths must be absolute".to_string(),
        });
    }
    if path.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(StoreError::Constraint {
            path: path.to_string(),
            message: "relative segments are not allowed".to_string(),
        });
    }
    Ok(())
}
