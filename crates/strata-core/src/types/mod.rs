//! Shared core types used across the store, task and watch layers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fs::digest_bytes;

/// Path-like identifier of an installable resource in the content store.
///
/// Stable across restarts and used as the key of the state store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (`bar.jar` for `/apps/foo/install/bar.jar`).
    pub fn name(&self) -> &str {
        base_name(&self.0)
    }

    /// Lowercased extension of the last path segment, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Name without its extension.
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    pub fn parent(&self) -> Option<&str> {
        parent_path(&self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Content handed to processors together with its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: Vec<u8>,
    pub digest: String,
}

impl Payload {
    /// Build a payload, computing the digest from the bytes.
    pub fn new(data: Vec<u8>) -> Self {
        let digest = digest_bytes(&data);
        Self { data, digest }
    }

    /// Build a payload with a digest computed elsewhere.
    pub fn with_digest(data: Vec<u8>, digest: impl Into<String>) -> Self {
        Self {
            data,
            digest: digest.into(),
        }
    }
}

/// Join a content path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if parent.is_empty() || parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Parent of a content path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(pos) => Some(&trimmed[..pos]),
        None => None,
    }
}

/// Last segment of a content path.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Normalize to an absolute path without a trailing slash.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// True if `path` equals `ancestor` or lies below it.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return true;
    }
    let ancestor = ancestor.trim_end_matches('/');
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_parts() {
        let id = ResourceId::new("/apps/foo/install/bar.JAR");
        assert_eq!(id.name(), "bar.JAR");
        assert_eq!(id.extension().as_deref(), Some("jar"));
        assert_eq!(id.stem(), "bar");
        assert_eq!(id.parent(), Some("/apps/foo/install"));
    }

    #[test]
    fn test_hidden_file_has_no_extension() {
        let id = ResourceId::new("/apps/install/.hidden");
        assert_eq!(id.extension(), None);
        assert_eq!(id.stem(), ".hidden");
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join_path("/", "apps"), "/apps");
        assert_eq!(join_path("/apps/", "x"), "/apps/x");
        assert_eq!(parent_path("/apps"), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(base_name("/a/b/"), "b");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("content//install/"), "/content/install");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_descendant_matches_whole_segments() {
        assert!(is_same_or_descendant("/apps/x", "/apps"));
        assert!(is_same_or_descendant("/apps", "/apps/"));
        assert!(!is_same_or_descendant("/appsx/y", "/apps"));
        assert!(is_same_or_descendant("/anything", "/"));
    }

    #[test]
    fn test_payload_digest_is_stable() {
        let a = Payload::new(b"content".to_vec());
        let b = Payload::new(b"content".to_vec());
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, Payload::new(b"other".to_vec()).digest);
    }
}
