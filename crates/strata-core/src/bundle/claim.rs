//! Per-bundle load records stored as content nodes.
//!
//! Each bundle has a node below [`CLAIM_ROOT`] recording whether its content
//! was loaded and which paths to remove on unload. The same node carries a
//! lock so that only one instance loads a bundle at a time; a lock older than
//! the claim timeout is treated as abandoned.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::content::{ContentStore, Node};
use crate::error::StoreError;
use crate::types::join_path;

/// Location of the claim nodes.
pub const CLAIM_ROOT: &str = "/var/strata/bundles";

const CONTENT_LOADED: &str = "content_loaded";
const CONTENT_LOADED_AT: &str = "content_loaded_at";
const LOCKED_BY: &str = "locked_by";
const LOCKED_AT: &str = "locked_at";
const UNINSTALL_PATHS: &str = "uninstall_paths";

/// What the claim node says about a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleClaim {
    pub content_loaded: bool,
    pub uninstall_paths: Vec<String>,
}

impl BundleClaim {
    fn from_node(node: &Node) -> Self {
        let uninstall_paths = node
            .property(UNINSTALL_PATHS)
            .and_then(|v| v.as_array())
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            content_loaded: node
                .property(CONTENT_LOADED)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            uninstall_paths,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClaimStore {
    store: Arc<dyn ContentStore>,
    owner: String,
    timeout: chrono::Duration,
}

impl ClaimStore {
    /// Claims owned by a fresh random identity.
    pub fn new(store: Arc<dyn ContentStore>, timeout: chrono::Duration) -> Self {
        Self::with_owner(store, uuid::Uuid::new_v4().to_string(), timeout)
    }

    pub fn with_owner(
        store: Arc<dyn ContentStore>,
        owner: impl Into<String>,
        timeout: chrono::Duration,
    ) -> Self {
        Self {
            store,
            owner: owner.into(),
            timeout,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Content path of the claim node for `bundle`.
    pub fn claim_path(bundle: &str) -> String {
        join_path(CLAIM_ROOT, &urlencoding::encode(bundle))
    }

    /// Current record, without locking.
    pub fn claim(&self, bundle: &str) -> Result<Option<BundleClaim>, StoreError> {
        Ok(self
            .store
            .node(&Self::claim_path(bundle))?
            .map(|node| BundleClaim::from_node(&node)))
    }

    /// Lock the claim for this instance.
    ///
    /// Returns `None` while another instance holds an unexpired lock.
    pub fn acquire(&self, bundle: &str) -> Result<Option<BundleClaim>, StoreError> {
        let path = Self::claim_path(bundle);
        let existing = self.store.node(&path)?;

        if let Some(node) = &existing
            && let Some(holder) = node.property(LOCKED_BY).and_then(|v| v.as_str())
            && holder != self.owner
        {
            if !self.lock_expired(node) {
                tracing::debug!(bundle = %bundle, holder = %holder, "bundle claimed elsewhere");
                return Ok(None);
            }
            tracing::warn!(bundle = %bundle, holder = %holder, "taking over expired bundle claim");
        }

        let mut node = existing.unwrap_or_else(|| Node::structured(BTreeMap::new()));
        node.properties
            .insert(LOCKED_BY.to_string(), self.owner.clone().into());
        node.properties
            .insert(LOCKED_AT.to_string(), Utc::now().to_rfc3339().into());
        let claim = BundleClaim::from_node(&node);
        self.store.put(&path, node)?;
        self.store.commit()?;
        Ok(Some(claim))
    }

    /// Drop the lock. With `loaded`, also record the load and the paths to
    /// remove on unload.
    pub fn release(&self, bundle: &str, loaded: Option<&[String]>) -> Result<(), StoreError> {
        self.update(bundle, |props| {
            if let Some(paths) = loaded {
                props.insert(CONTENT_LOADED.to_string(), true.into());
                props.insert(CONTENT_LOADED_AT.to_string(), Utc::now().to_rfc3339().into());
                props.insert(
                    UNINSTALL_PATHS.to_string(),
                    serde_json::Value::from(paths.to_vec()),
                );
            }
        })
    }

    /// Record that the content is gone and drop the lock.
    pub fn content_uninstalled(&self, bundle: &str) -> Result<(), StoreError> {
        self.update(bundle, |props| {
            props.insert(CONTENT_LOADED.to_string(), false.into());
            props.remove(CONTENT_LOADED_AT);
            props.remove(UNINSTALL_PATHS);
        })
    }

    fn update(
        &self,
        bundle: &str,
        apply: impl FnOnce(&mut BTreeMap<String, serde_json::Value>),
    ) -> Result<(), StoreError> {
        let path = Self::claim_path(bundle);
        let mut node = self
            .store
            .node(&path)?
            .unwrap_or_else(|| Node::structured(BTreeMap::new()));
        node.properties.remove(LOCKED_BY);
        node.properties.remove(LOCKED_AT);
        apply(&mut node.properties);
        self.store.put(&path, node)?;
        self.store.commit()
    }

    fn lock_expired(&self, node: &Node) -> bool {
        let Some(locked_at) = node
            .property(LOCKED_AT)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            return true;
        };
        Utc::now().signed_duration_since(locked_at.with_timezone(&Utc)) > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryStore;

    fn claims(store: &Arc<MemoryStore>, owner: &str, timeout: chrono::Duration) -> ClaimStore {
        ClaimStore::with_owner(store.clone(), owner, timeout)
    }

    #[test]
    fn test_acquire_excludes_other_owner() {
        let store = Arc::new(MemoryStore::new());
        let a = claims(&store, "a", chrono::Duration::minutes(10));
        let b = claims(&store, "b", chrono::Duration::minutes(10));

        assert!(a.acquire("foo").expect("acquire should succeed").is_some());
        assert!(b.acquire("foo").expect("acquire should succeed").is_none());
        // Re-entrant for the holder
        assert!(a.acquire("foo").expect("acquire should succeed").is_some());

        a.release("foo", None).expect("release should succeed");
        assert!(b.acquire("foo").expect("acquire should succeed").is_some());
    }

    #[test]
    fn test_expired_lock_is_taken_over() {
        let store = Arc::new(MemoryStore::new());
        let a = claims(&store, "a", chrono::Duration::minutes(10));
        let b = claims(&store, "b", chrono::Duration::seconds(-1));

        a.acquire("foo").expect("acquire should succeed");
        assert!(b.acquire("foo").expect("acquire should succeed").is_some());
    }

    #[test]
    fn test_release_records_loaded_paths() {
        let store = Arc::new(MemoryStore::new());
        let a = claims(&store, "a", chrono::Duration::minutes(10));

        a.acquire("foo").expect("acquire should succeed");
        a.release("foo", Some(&["/content/foo".to_string()]))
            .expect("release should succeed");

        let claim = a.claim("foo").expect("read should succeed").expect("claim exists");
        assert!(claim.content_loaded);
        assert_eq!(claim.uninstall_paths, vec!["/content/foo"]);

        a.content_uninstalled("foo").expect("update should succeed");
        let claim = a.claim("foo").expect("read should succeed").expect("claim exists");
        assert_eq!(claim, BundleClaim::default());
    }
}
