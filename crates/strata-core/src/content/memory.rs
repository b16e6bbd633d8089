//! In-process content store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::content::staging::{StagedOp, Staging};
use crate::content::{ChildEntry, ContentStore, Node, validate_path};
use crate::error::StoreError;
use crate::types::{base_name, is_same_or_descendant, normalize_path, parent_path};

#[derive(Debug, Clone)]
struct StoredNode {
    node: Node,
    /// Revision of the last write to this node
    rev: u64,
    /// Revision of the last child added or removed
    child_rev: u64,
}

#[derive(Debug)]
struct Inner {
    nodes: BTreeMap<String, StoredNode>,
    staging: Staging,
    revision: u64,
    unavailable: Option<String>,
}

impl Inner {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match &self.unavailable {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn touch_parent(&mut self, path: &str, rev: u64) {
        if let Some(parent) = parent_path(path)
            && let Some(stored) = self.nodes.get_mut(parent)
        {
            stored.child_rev = rev;
        }
    }

    fn apply_put(&mut self, path: &str, node: Node) {
        let rev = self.next_revision();
        let mut missing = Vec::new();
        let mut current = parent_path(path);
        while let Some(ancestor) = current {
            if self.nodes.contains_key(ancestor) {
                break;
            }
            missing.push(ancestor.to_string());
            current = parent_path(ancestor);
        }
        for ancestor in missing.into_iter().rev() {
            self.touch_parent(&ancestor, rev);
            self.nodes.insert(
                ancestor,
                StoredNode {
                    node: Node::folder(),
                    rev,
                    child_rev: rev,
                },
            );
        }

        match self.nodes.get_mut(path) {
            Some(stored) => {
                stored.node = node;
                stored.rev = rev;
            }
            None => {
                self.touch_parent(path, rev);
                self.nodes.insert(
                    path.to_string(),
                    StoredNode {
                        node,
                        rev,
                        child_rev: rev,
                    },
                );
            }
        }
    }

    fn apply_remove(&mut self, path: &str) {
        let doomed: Vec<String> = self
            .nodes
            .range(path.to_string()..)
            .take_while(|(key, _)| key.starts_with(path))
            .filter(|(key, _)| is_same_or_descendant(key, path))
            .map(|(key, _)| key.clone())
            .collect();
        if doomed.is_empty() {
            return;
        }
        for key in doomed {
            self.nodes.remove(&key);
        }
        let rev = self.next_revision();
        self.touch_parent(path, rev);
    }

    fn children(&self, location: &str) -> impl Iterator<Item = (&String, &StoredNode)> {
        self.nodes
            .iter()
            .filter(move |(key, _)| key.as_str() != "/" && parent_path(key) == Some(location))
    }
}

/// Content store kept entirely in memory.
///
/// Every committed write bumps a global revision; the revision of a node is
/// its change marker, so markers only ever grow.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            StoredNode {
                node: Node::folder(),
                rev: 0,
                child_rev: 0,
            },
        );
        Self {
            inner: Mutex::new(Inner {
                nodes,
                staging: Staging::default(),
                revision: 0,
                unavailable: None,
            }),
        }
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until cleared.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_string);
    }

    /// Stage and commit a single node. Convenience for callers seeding content.
    pub fn insert(&self, path: &str, node: Node) -> Result<(), StoreError> {
        self.put(path, node)?;
        self.commit()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Each applied op leaves a valid map, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for MemoryStore {
    fn list(&self, location: &str) -> Result<Vec<ChildEntry>, StoreError> {
        let inner = self.lock();
        inner.check_available()?;
        let location = normalize_path(location);
        // BTreeMap iteration is already sorted by full path, hence by name
        Ok(inner
            .children(&location)
            .map(|(path, stored)| ChildEntry {
                name: base_name(path).to_string(),
                path: path.clone(),
                kind: stored.node.kind,
                marker: stored.rev,
            })
            .collect())
    }

    fn change_marker(&self, location: &str) -> Result<Option<u64>, StoreError> {
        let inner = self.lock();
        inner.check_available()?;
        let location = normalize_path(location);
        let Some(stored) = inner.nodes.get(&location) else {
            return Ok(None);
        };
        let marker = inner
            .children(&location)
            .map(|(_, child)| child.rev)
            .fold(stored.rev.max(stored.child_rev), u64::max);
        Ok(Some(marker))
    }

    fn node(&self, path: &str) -> Result<Option<Node>, StoreError> {
        let inner = self.lock();
        inner.check_available()?;
        let path = normalize_path(path);
        Ok(inner
            .staging
            .resolve(&path, |p| inner.nodes.get(p).map(|s| s.node.clone())))
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
        let mut inner = self.lock();
        inner.check_available()?;
        inner.staging.push(StagedOp::Put { path, node });
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
        let mut inner = self.lock();
        inner.check_available()?;
        inner.staging.push(StagedOp::Remove { path });
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_available()?;
        for op in inner.staging.take() {
            match op {
                StagedOp::Put { path, node } => inner.apply_put(&path, node),
                StagedOp::Remove { path } => inner.apply_remove(&path),
            }
        }
        Ok(())
    }

    fn rollback(&self) {
        self.lock().staging.clear();
    }

    fn has_pending_changes(&self) -> bool {
        !self.lock().staging.is_empty()
    }
}
