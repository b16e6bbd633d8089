//! One watched location in the content store.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::content::{ContentStore, NodeKind};
use crate::controller::Controller;
use crate::error::StoreError;
use crate::types::{Payload, ResourceId};
use crate::watch::convert::{NodeConverter, convert_child};
use crate::watch::filter::FileFilter;

/// Events produced by one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub installs: Vec<ResourceId>,
    pub uninstalls: Vec<ResourceId>,
    /// The location no longer exists
    pub gone: bool,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.installs.is_empty() && self.uninstalls.is_empty()
    }
}

/// A location whose direct children are installable resources.
///
/// Each scan lists the children, compares their change markers to the
/// previous snapshot and schedules installs for new or changed children and
/// uninstalls for vanished ones. The snapshot is only replaced once the whole
/// listing was read, so a failed scan is simply repeated.
#[derive(Debug, Clone)]
pub struct WatchedFolder {
    path: String,
    snapshot: BTreeMap<String, u64>,
    last_marker: Option<u64>,
}

impl WatchedFolder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            snapshot: BTreeMap::new(),
            last_marker: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resources seen in the last successful scan.
    pub fn known_resources(&self) -> Vec<ResourceId> {
        self.snapshot
            .keys()
            .map(|name| ResourceId::new(crate::types::join_path(&self.path, name)))
            .collect()
    }

    /// Scan unless the location's change marker is unchanged since the last scan.
    pub fn scan_if_needed(
        &mut self,
        store: &dyn ContentStore,
        filter: &FileFilter,
        converters: &[Box<dyn NodeConverter>],
        controller: &Controller,
    ) -> Result<ScanResult, StoreError> {
        let marker = store.change_marker(&self.path)?;
        match marker {
            None => Ok(self.vanished(controller)),
            Some(marker) if Some(marker) == self.last_marker => Ok(ScanResult::default()),
            Some(marker) => {
                let result = self.scan(store, filter, converters, controller)?;
                self.last_marker = Some(marker);
                Ok(result)
            }
        }
    }

    /// Diff the current children against the snapshot and schedule tasks.
    pub fn scan(
        &mut self,
        store: &dyn ContentStore,
        filter: &FileFilter,
        converters: &[Box<dyn NodeConverter>],
        controller: &Controller,
    ) -> Result<ScanResult, StoreError> {
        let mut current = BTreeMap::new();
        let mut installs: Vec<(ResourceId, Payload)> = Vec::new();

        for child in store.list(&self.path)? {
            if child.kind == NodeKind::Folder || !filter.accept(&child.name) {
                continue;
            }
            let unchanged = self.snapshot.get(&child.name) == Some(&child.marker);
            current.insert(child.name.clone(), child.marker);
            if unchanged {
                continue;
            }
            match convert_child(converters, store, &child)? {
                Some(payload) => installs.push((ResourceId::new(child.path.clone()), payload)),
                None => tracing::debug!(path = %child.path, "no converter for node, ignoring"),
            }
        }

        let uninstalls: Vec<ResourceId> = self
            .snapshot
            .keys()
            .filter(|name| !current.contains_key(*name))
            .map(|name| ResourceId::new(crate::types::join_path(&self.path, name)))
            .collect();

        self.snapshot = current;

        let result = ScanResult {
            installs: installs.iter().map(|(id, _)| id.clone()).collect(),
            uninstalls: uninstalls.clone(),
            gone: false,
        };
        for (id, payload) in installs {
            controller.schedule_install(id, payload);
        }
        for id in uninstalls {
            controller.schedule_uninstall(id);
        }
        if !result.is_empty() {
            tracing::debug!(
                folder = %self.path,
                installs = result.installs.len(),
                uninstalls = result.uninstalls.len(),
                "scanned folder"
            );
        }
        Ok(result)
    }

    /// The location disappeared: everything it held goes away.
    fn vanished(&mut self, controller: &Controller) -> ScanResult {
        let uninstalls = self.known_resources();
        for id in &uninstalls {
            controller.schedule_uninstall(id.clone());
        }
        self.snapshot.clear();
        self.last_marker = None;
        tracing::info!(folder = %self.path, resources = uninstalls.len(), "watched folder removed");
        ScanResult {
            installs: Vec::new(),
            uninstalls,
            gone: true,
        }
    }
}
