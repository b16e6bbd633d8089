//! Copies bundle content into the content store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::bundle::Bundle;
use crate::bundle::claim::{BundleClaim, ClaimStore};
use crate::bundle::entry::PathEntry;
use crate::bundle::reader::{ContentReader, DescriptorNode, ReaderRegistry};
use crate::content::{ContentStore, Node};
use crate::error::{LoaderError, StoreError};
use crate::types::{base_name, is_same_or_descendant, join_path, normalize_path};

/// Result of registering a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum RegisterOutcome {
    /// Content was written; `created` holds the top-level paths to remove on unload
    Loaded { created: Vec<String> },
    AlreadyLoaded,
    NoContent,
    /// Loading failed or the bundle is claimed elsewhere; retried later
    Delayed { reason: String },
    /// An update failed; updates are not retried
    Failed { reason: String },
}

/// Result of unregistering a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum UnregisterOutcome {
    Unloaded { removed: Vec<String> },
    NotLoaded,
    /// The bundle was waiting for a retry and is forgotten
    DroppedDelayed,
}

/// Loads and unloads bundle content, retrying failed loads when another
/// bundle loads successfully.
///
/// Loads and unloads run one at a time: each stages its writes in the shared
/// store and commits them as one batch.
#[derive(Debug)]
pub struct ContentLoader {
    store: Arc<dyn ContentStore>,
    readers: ReaderRegistry,
    claims: ClaimStore,
    delayed: Mutex<Vec<Arc<dyn Bundle>>>,
    /// Held for a whole register, unregister or retry; taken before `delayed`
    serial: Mutex<()>,
}

impl ContentLoader {
    pub fn new(store: Arc<dyn ContentStore>, claims: ClaimStore) -> Self {
        Self {
            store,
            readers: ReaderRegistry::with_default_readers(),
            claims,
            delayed: Mutex::new(Vec::new()),
            serial: Mutex::new(()),
        }
    }

    pub fn with_readers(mut self, readers: ReaderRegistry) -> Self {
        self.readers = readers;
        self
    }

    pub fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    /// Names of the bundles waiting for a retry, in arrival order.
    pub fn delayed_bundles(&self) -> Vec<String> {
        self.lock_delayed()
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Load the content of `bundle`.
    ///
    /// An update first unloads the previous content. A failed first load puts
    /// the bundle in the delayed set; every successful load retries the set
    /// until a pass makes no progress.
    pub fn register_bundle(&self, bundle: Arc<dyn Bundle>, is_update: bool) -> RegisterOutcome {
        let _serial = self.serialize();
        if is_update && let Err(err) = self.unregister_serialized(bundle.as_ref()) {
            tracing::warn!(bundle = %bundle.name(), error = %err, "failed to unload previous content");
        }

        match self.try_register(bundle.as_ref(), is_update) {
            Ok(outcome) => {
                let retried = self.retry_serialized();
                if retried > 0 {
                    tracing::info!(bundle = %bundle.name(), retried, "delayed bundles loaded");
                }
                outcome
            }
            Err(err) if is_update => {
                tracing::error!(bundle = %bundle.name(), error = %err, "bundle content update failed");
                RegisterOutcome::Failed {
                    reason: err.to_string(),
                }
            }
            Err(err) => {
                tracing::warn!(bundle = %bundle.name(), error = %err, "bundle content delayed");
                let mut delayed = self.lock_delayed();
                delayed.retain(|b| b.name() != bundle.name());
                delayed.push(bundle);
                RegisterOutcome::Delayed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Remove the content recorded for `bundle`, or forget it if it was delayed.
    pub fn unregister_bundle(&self, bundle: &dyn Bundle) -> Result<UnregisterOutcome, LoaderError> {
        let _serial = self.serialize();
        self.unregister_serialized(bundle)
    }

    /// Retry delayed bundles until a pass loads nothing. Returns how many loaded.
    pub fn retry_delayed(&self) -> usize {
        let _serial = self.serialize();
        self.retry_serialized()
    }

    fn unregister_serialized(&self, bundle: &dyn Bundle) -> Result<UnregisterOutcome, LoaderError> {
        {
            let mut delayed = self.lock_delayed();
            if let Some(pos) = delayed.iter().position(|b| b.name() == bundle.name()) {
                delayed.remove(pos);
                return Ok(UnregisterOutcome::DroppedDelayed);
            }
        }

        let name = bundle.name();
        let Some(claim) = self.claims.acquire(name)? else {
            return Err(LoaderError::Claimed {
                bundle: name.to_string(),
            });
        };
        if !claim.content_loaded {
            self.claims.release(name, None)?;
            return Ok(UnregisterOutcome::NotLoaded);
        }

        match self.uninstall_content(&claim.uninstall_paths) {
            Ok(removed) => {
                self.claims.content_uninstalled(name)?;
                tracing::info!(bundle = %name, removed = removed.len(), "bundle content unloaded");
                Ok(UnregisterOutcome::Unloaded { removed })
            }
            Err(err) => {
                if let Err(release_err) = self.claims.release(name, None) {
                    tracing::warn!(bundle = %name, error = %release_err, "failed to release bundle claim");
                }
                Err(err)
            }
        }
    }

    fn retry_serialized(&self) -> usize {
        let mut delayed = self.lock_delayed();
        let mut loaded = 0;
        while !delayed.is_empty() {
            let before = delayed.len();
            let mut remaining = Vec::with_capacity(before);
            for bundle in delayed.drain(..) {
                match self.try_register(bundle.as_ref(), false) {
                    Ok(outcome) => {
                        tracing::info!(bundle = %bundle.name(), ?outcome, "retried bundle content");
                        loaded += 1;
                    }
                    Err(err) => {
                        tracing::debug!(bundle = %bundle.name(), error = %err, "bundle still delayed");
                        remaining.push(bundle);
                    }
                }
            }
            *delayed = remaining;
            if delayed.len() == before {
                break;
            }
        }
        loaded
    }

    fn try_register(&self, bundle: &dyn Bundle, is_update: bool) -> Result<RegisterOutcome, LoaderError> {
        let name = bundle.name();
        if bundle.content_paths().is_empty() {
            tracing::debug!(bundle = %name, "bundle has no content");
            return Ok(RegisterOutcome::NoContent);
        }

        let Some(claim) = self.claims.acquire(name)? else {
            return Err(LoaderError::Claimed {
                bundle: name.to_string(),
            });
        };

        let result = self.load_claimed(bundle, &claim, is_update);
        let loaded = match &result {
            Ok(RegisterOutcome::Loaded { created }) => Some(created.as_slice()),
            _ => None,
        };
        let released = self.claims.release(name, loaded);
        let outcome = result?;
        released?;
        Ok(outcome)
    }

    fn load_claimed(
        &self,
        bundle: &dyn Bundle,
        claim: &BundleClaim,
        is_update: bool,
    ) -> Result<RegisterOutcome, LoaderError> {
        if claim.content_loaded && !is_update {
            tracing::info!(bundle = %bundle.name(), "bundle content already loaded");
            return Ok(RegisterOutcome::AlreadyLoaded);
        }
        let created = self.install_content(bundle, claim.content_loaded)?;
        tracing::info!(bundle = %bundle.name(), created = created.len(), "bundle content loaded");
        Ok(RegisterOutcome::Loaded { created })
    }

    /// Write every content root and save once; nothing is kept on failure.
    fn install_content(
        &self,
        bundle: &dyn Bundle,
        already_loaded: bool,
    ) -> Result<Vec<String>, LoaderError> {
        let mut created = Vec::new();
        let written = self
            .install_entries(bundle, already_loaded, &mut created)
            .and_then(|()| self.store.commit().map_err(LoaderError::from));
        if let Err(err) = written {
            self.store.rollback();
            return Err(err);
        }
        Ok(top_level_paths(created))
    }

    fn install_entries(
        &self,
        bundle: &dyn Bundle,
        already_loaded: bool,
        created: &mut Vec<String>,
    ) -> Result<(), LoaderError> {
        for entry in bundle.content_paths() {
            // Content kept from a previous load is only replaced when asked to
            if already_loaded && !entry.overwrite {
                continue;
            }
            let target = self.ensure_target(&entry.target)?;
            self.install_from_path(bundle, entry.bundle_path(), entry, &target, created)?;
        }
        Ok(())
    }

    fn ensure_target(&self, target: &str) -> Result<String, LoaderError> {
        let target = normalize_path(target);
        if target != "/" && !self.store.exists(&target)? {
            self.store.put(&target, Node::folder())?;
        }
        Ok(target)
    }

    fn install_from_path(
        &self,
        bundle: &dyn Bundle,
        path: &str,
        entry: &PathEntry,
        parent: &str,
        created: &mut Vec<String>,
    ) -> Result<(), LoaderError> {
        let Some(entries) = bundle
            .entry_paths(path)
            .map_err(|source| entry_error(bundle, path, source))?
        else {
            tracing::warn!(bundle = %bundle.name(), path = %path, "content path not found in bundle");
            return Ok(());
        };

        // Descriptor entry -> node it produced (None if it was malformed)
        let mut processed: HashMap<String, Option<String>> = HashMap::new();

        for entry_path in &entries {
            if let Some(dir) = entry_path.strip_suffix('/') {
                let name = decode_name(base_name(dir));
                let mut node_path = None;
                if let Some((descriptor, reader)) = self.sibling_descriptor(bundle, dir) {
                    node_path = match processed.get(&descriptor) {
                        Some(done) => done.clone(),
                        None => {
                            let made = self.create_node(
                                bundle, parent, &name, &descriptor, reader, entry, created,
                            )?;
                            processed.insert(descriptor, made.clone());
                            made
                        }
                    };
                }
                let node_path = match node_path {
                    Some(path) => path,
                    None => self.create_folder(parent, &name, entry, created)?,
                };
                self.install_from_path(bundle, entry_path, entry, &node_path, created)?;
                continue;
            }

            if processed.contains_key(entry_path) {
                continue;
            }

            let name = decode_name(base_name(entry_path));
            let node_path = match self.readers.for_name(&name) {
                Some(reader) => {
                    let stem = &name[..name.len() - reader.extension().len()];
                    let made =
                        self.create_node(bundle, parent, stem, entry_path, reader, entry, created)?;
                    processed.insert(entry_path.clone(), made.clone());
                    made
                }
                None => self.create_file(bundle, parent, &name, entry_path, entry, created)?,
            };

            if let Some(node_path) = node_path
                && let Some((descriptor, reader)) = self.sibling_descriptor(bundle, entry_path)
                && !processed.contains_key(&descriptor)
            {
                self.merge_descriptor(bundle, &node_path, &descriptor, reader)?;
                processed.insert(descriptor, Some(node_path));
            }
        }
        Ok(())
    }

    /// `<base><ext>` for the first reader whose descriptor exists in the bundle.
    fn sibling_descriptor(&self, bundle: &dyn Bundle, base: &str) -> Option<(String, &dyn ContentReader)> {
        self.readers.readers().find_map(|reader| {
            let candidate = format!("{}{}", base, reader.extension());
            bundle.has_entry(&candidate).then_some((candidate, reader))
        })
    }

    fn read_descriptor(
        &self,
        bundle: &dyn Bundle,
        descriptor: &str,
        reader: &dyn ContentReader,
    ) -> Result<Option<DescriptorNode>, LoaderError> {
        let Some(data) = bundle
            .entry(descriptor)
            .map_err(|source| entry_error(bundle, descriptor, source))?
        else {
            return Ok(None);
        };
        match reader.parse(&data) {
            Ok(node) => Ok(Some(node)),
            Err(message) => {
                tracing::warn!(
                    bundle = %bundle.name(),
                    entry = %descriptor,
                    error = %message,
                    "skipping malformed descriptor"
                );
                Ok(None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_node(
        &self,
        bundle: &dyn Bundle,
        parent: &str,
        name: &str,
        descriptor: &str,
        reader: &dyn ContentReader,
        entry: &PathEntry,
        created: &mut Vec<String>,
    ) -> Result<Option<String>, LoaderError> {
        let Some(parsed) = self.read_descriptor(bundle, descriptor, reader)? else {
            return Ok(None);
        };
        let path = join_path(parent, name);
        if self.store.exists(&path)? {
            if !entry.overwrite {
                tracing::debug!(path = %path, "keeping existing node");
                return Ok(Some(path));
            }
            self.store.remove(&path)?;
        }
        self.put_descriptor(&path, parsed)?;
        if entry.uninstall() {
            created.push(path.clone());
        }
        Ok(Some(path))
    }

    fn put_descriptor(&self, path: &str, descriptor: DescriptorNode) -> Result<(), LoaderError> {
        self.store.put(path, Node::structured(descriptor.properties))?;
        for (name, child) in descriptor.children {
            self.put_descriptor(&join_path(path, &name), child)?;
        }
        Ok(())
    }

    /// Add the properties of a sibling descriptor to an existing node.
    ///
    /// Applies whatever the overwrite flag says.
    fn merge_descriptor(
        &self,
        bundle: &dyn Bundle,
        node_path: &str,
        descriptor: &str,
        reader: &dyn ContentReader,
    ) -> Result<(), LoaderError> {
        let Some(parsed) = self.read_descriptor(bundle, descriptor, reader)? else {
            return Ok(());
        };
        let Some(mut node) = self.store.node(node_path)? else {
            return Ok(());
        };
        node.properties.extend(parsed.properties);
        self.store.put(node_path, node)?;
        for (name, child) in parsed.children {
            self.put_descriptor(&join_path(node_path, &name), child)?;
        }
        Ok(())
    }

    fn create_folder(
        &self,
        parent: &str,
        name: &str,
        entry: &PathEntry,
        created: &mut Vec<String>,
    ) -> Result<String, LoaderError> {
        let path = join_path(parent, name);
        if self.store.exists(&path)? {
            if !entry.overwrite {
                return Ok(path);
            }
            self.store.remove(&path)?;
        }
        self.store.put(&path, Node::folder())?;
        if entry.uninstall() {
            created.push(path.clone());
        }
        Ok(path)
    }

    fn create_file(
        &self,
        bundle: &dyn Bundle,
        parent: &str,
        name: &str,
        entry_path: &str,
        entry: &PathEntry,
        created: &mut Vec<String>,
    ) -> Result<Option<String>, LoaderError> {
        let path = join_path(parent, name);
        if self.store.exists(&path)? && !entry.overwrite {
            tracing::debug!(path = %path, "keeping existing file");
            return Ok(Some(path));
        }
        let Some(data) = bundle
            .entry(entry_path)
            .map_err(|source| entry_error(bundle, entry_path, source))?
        else {
            return Ok(None);
        };
        self.store.put(&path, Node::file(data))?;
        if entry.uninstall() {
            created.push(path.clone());
        }
        Ok(Some(path))
    }

    fn uninstall_content(&self, paths: &[String]) -> Result<Vec<String>, LoaderError> {
        let mut removed = Vec::new();
        let result = paths
            .iter()
            .try_for_each(|path| -> Result<(), StoreError> {
                if self.store.exists(path)? {
                    self.store.remove(path)?;
                    removed.push(path.clone());
                }
                Ok(())
            })
            .and_then(|()| {
                if removed.is_empty() {
                    Ok(())
                } else {
                    self.store.commit()
                }
            });
        if let Err(err) = result {
            self.store.rollback();
            return Err(err.into());
        }
        Ok(removed)
    }

    fn serialize(&self) -> std::sync::MutexGuard<'_, ()> {
        self.serial.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_delayed(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Bundle>>> {
        self.delayed.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Sorted paths with descendants of other entries dropped.
fn top_level_paths(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths.dedup();
    let mut kept: Vec<String> = Vec::with_capacity(paths.len());
    for path in paths {
        if kept.iter().any(|top| is_same_or_descendant(&path, top)) {
            continue;
        }
        kept.push(path);
    }
    kept
}

/// Entry names may be percent-encoded (`a%3Ab` for `a:b`).
fn decode_name(name: &str) -> String {
    match urlencoding::decode(name) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => name.to_string(),
    }
}

fn entry_error(bundle: &dyn Bundle, entry: &str, source: std::io::Error) -> LoaderError {
    LoaderError::Entry {
        bundle: bundle.name().to_string(),
        entry: entry.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_paths_drop_descendants() {
        let paths = vec![
            "/content/b/x".to_string(),
            "/content/a".to_string(),
            "/content/a/child".to_string(),
            "/content/ab".to_string(),
            "/content/a-x".to_string(),
            "/content/b".to_string(),
        ];
        assert_eq!(
            top_level_paths(paths),
            vec!["/content/a", "/content/a-x", "/content/ab", "/content/b"]
        );
    }

    #[test]
    fn test_decode_name() {
        assert_eq!(decode_name("a%3Ab"), "a:b");
        assert_eq!(decode_name("plain.txt"), "plain.txt");
    }
}
