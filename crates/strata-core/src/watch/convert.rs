//! Conversion of content nodes into installable payloads.

use crate::content::{ChildEntry, ContentStore, NodeKind};
use crate::error::StoreError;
use crate::types::Payload;

/// Turns a watched child into a payload, if it knows how.
pub trait NodeConverter: std::fmt::Debug + Send + Sync {
    /// `Ok(None)` means "not mine"; the next converter is tried.
    fn convert(
        &self,
        store: &dyn ContentStore,
        child: &ChildEntry,
    ) -> Result<Option<Payload>, StoreError>;
}

/// File nodes become their raw bytes.
#[derive(Debug, Default)]
pub struct FileNodeConverter;

impl NodeConverter for FileNodeConverter {
    fn convert(
        &self,
        store: &dyn ContentStore,
        child: &ChildEntry,
    ) -> Result<Option<Payload>, StoreError> {
        if child.kind != NodeKind::File {
            return Ok(None);
        }
        store.read(&child.path)
    }
}

/// Property-only nodes become the canonical JSON of their properties.
#[derive(Debug, Default)]
pub struct PropertyNodeConverter;

impl NodeConverter for PropertyNodeConverter {
    fn convert(
        &self,
        store: &dyn ContentStore,
        child: &ChildEntry,
    ) -> Result<Option<Payload>, StoreError> {
        if child.kind != NodeKind::Structured {
            return Ok(None);
        }
        let Some(node) = store.node(&child.path)? else {
            return Ok(None);
        };
        // BTreeMap keys serialize sorted, so equal properties give equal bytes
        let data = serde_json::to_vec(&node.properties).map_err(|source| StoreError::Metadata {
            path: child.path.clone(),
            source,
        })?;
        Ok(Some(Payload::new(data)))
    }
}

/// The converters used by the observer, in order.
pub fn default_converters() -> Vec<Box<dyn NodeConverter>> {
    vec![Box::new(FileNodeConverter), Box::new(PropertyNodeConverter)]
}

/// First payload produced by `converters`.
pub fn convert_child(
    converters: &[Box<dyn NodeConverter>],
    store: &dyn ContentStore,
    child: &ChildEntry,
) -> Result<Option<Payload>, StoreError> {
    for converter in converters {
        if let Some(payload) = converter.convert(store, child)? {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}
