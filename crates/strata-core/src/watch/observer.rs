//! The watch loop: discovers install folders and feeds the controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::content::{ContentStore, NodeKind};
use crate::controller::{Controller, CycleReport};
use crate::error::{ControllerError, StoreError};
use crate::watch::convert::{NodeConverter, default_converters};
use crate::watch::filter::{FileFilter, FolderFilter};
use crate::watch::folder::WatchedFolder;

/// State-file setting holding the folder pattern of the previous run.
pub const FOLDER_PATTERN_SETTING: &str = "folder_pattern";

/// Watches install folders below a set of roots.
#[derive(Debug)]
pub struct RepositoryObserver {
    store: Arc<dyn ContentStore>,
    controller: Arc<Controller>,
    roots: Vec<String>,
    folder_filter: FolderFilter,
    file_filter: FileFilter,
    converters: Vec<Box<dyn NodeConverter>>,
    folders: BTreeMap<String, WatchedFolder>,
}

impl RepositoryObserver {
    pub fn new(
        store: Arc<dyn ContentStore>,
        controller: Arc<Controller>,
        roots: Vec<String>,
        folder_filter: FolderFilter,
        file_filter: FileFilter,
    ) -> Self {
        Self {
            store,
            controller,
            roots,
            folder_filter,
            file_filter,
            converters: default_converters(),
            folders: BTreeMap::new(),
        }
    }

    /// Replace the node converters.
    pub fn with_converters(mut self, converters: Vec<Box<dyn NodeConverter>>) -> Self {
        self.converters = converters;
        self
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Paths of the folders currently watched, sorted.
    pub fn watched_folders(&self) -> Vec<String> {
        self.folders.keys().cloned().collect()
    }

    /// Reconcile recorded state with the store before the first cycle.
    ///
    /// If the folder pattern changed since the last run, resources whose folder
    /// is no longer accepted are uninstalled. Resources whose node vanished
    /// while nothing was watching are uninstalled too.
    pub fn startup(&mut self) -> Result<CycleReport, ControllerError> {
        self.handle_pattern_change()?;
        self.check_deletions()?;
        let report = self.controller.execute_scheduled_operations()?;
        if report.changed() > 0 {
            tracing::info!(changed = report.changed(), "startup reconciliation done");
        }
        Ok(report)
    }

    fn handle_pattern_change(&self) -> Result<(), ControllerError> {
        let pattern = self.folder_filter.pattern().to_string();
        let (previous, installed) = self.controller.with_context(|ctx| {
            (
                ctx.state.setting(FOLDER_PATTERN_SETTING).map(str::to_string),
                ctx.state.ids(),
            )
        });

        if let Some(previous) = previous.as_deref()
            && previous != pattern
        {
            tracing::info!(previous = %previous, current = %pattern, "folder pattern changed");
            for id in installed {
                let accepted = id.parent().is_some_and(|p| self.folder_filter.accept(p));
                if !accepted {
                    tracing::info!(id = %id, "folder no longer matches, uninstalling");
                    self.controller.schedule_uninstall(id);
                }
            }
        }

        self.controller.with_context(|ctx| -> Result<(), ControllerError> {
            ctx.state.set_setting(FOLDER_PATTERN_SETTING, &pattern);
            if ctx.state.is_dirty() {
                ctx.state.flush()?;
            }
            Ok(())
        })
    }

    /// Schedule uninstalls for recorded resources whose node is gone.
    pub fn check_deletions(&self) -> Result<usize, StoreError> {
        let mut scheduled = 0;
        for id in self.controller.installed_ids() {
            if !self.store.exists(id.as_str())? {
                tracing::info!(id = %id, "resource deleted while not watching");
                self.controller.schedule_uninstall(id);
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Walk the roots and start watching newly found folders.
    pub fn find_watched_folders(&mut self) -> Result<usize, StoreError> {
        let mut found = Vec::new();
        for root in &self.roots {
            if self.folder_filter.accept(root) {
                found.push(root.clone());
            }
            self.collect_folders(root, &mut found)?;
        }

        let mut added = 0;
        for path in found {
            if !self.folders.contains_key(&path) {
                tracing::info!(folder = %path, "watching folder");
                self.folders.insert(path.clone(), WatchedFolder::new(path));
                added += 1;
            }
        }
        Ok(added)
    }

    fn collect_folders(&self, location: &str, found: &mut Vec<String>) -> Result<(), StoreError> {
        for child in self.store.list(location)? {
            if child.kind != NodeKind::Folder {
                continue;
            }
            if self.folder_filter.accept(&child.path) {
                found.push(child.path.clone());
            }
            self.collect_folders(&child.path, found)?;
        }
        Ok(())
    }

    /// One pass: discover folders, scan each, execute the queue.
    pub fn run_one_cycle(&mut self) -> Result<CycleReport, ControllerError> {
        self.find_watched_folders()?;

        let mut gone = Vec::new();
        for folder in self.folders.values_mut() {
            let result = folder.scan_if_needed(
                self.store.as_ref(),
                &self.file_filter,
                &self.converters,
                &self.controller,
            )?;
            if result.gone {
                gone.push(folder.path().to_string());
            }
        }
        for path in gone {
            self.folders.remove(&path);
        }

        self.controller.execute_scheduled_operations()
    }

    /// Run `startup` and then cycles every `interval` on a background thread.
    pub fn spawn(mut self, interval: Duration) -> std::io::Result<ObserverHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("strata-observer".to_string())
            .spawn(move || {
                if let Err(err) = self.startup() {
                    tracing::error!(error = %err, "startup reconciliation failed");
                }
                loop {
                    if let Err(err) = self.run_one_cycle() {
                        tracing::error!(error = %err, "observer cycle failed, retrying next cycle");
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("observer stopped");
            })?;
        Ok(ObserverHandle {
            stop: stop_tx,
            thread: Some(thread),
        })
    }
}

/// Handle to a running observer thread.
///
/// Stopping lets an in-flight cycle finish; dropping the handle stops too.
#[derive(Debug)]
pub struct ObserverHandle {
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ObserverHandle {
    /// Signal the loop to stop and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("observer thread panicked");
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
