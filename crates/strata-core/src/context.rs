//! Application context wiring the store, controller, observer and loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::bundle::{ClaimStore, ContentLoader};
use crate::config::StrataConfig;
use crate::content::{ContentStore, FsStore};
use crate::controller::Controller;
use crate::processor::ProcessorRegistry;
use crate::state::StateStore;
use crate::task::TaskContext;
use crate::watch::{FileFilter, FolderFilter, RepositoryObserver};

/// Shared services built once from a [`StrataConfig`].
///
/// The CLI creates this once per invocation and hands out the pieces.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: StrataConfig,
    state_dir: PathBuf,
    store: Arc<dyn ContentStore>,
    controller: Arc<Controller>,
    loader: Arc<ContentLoader>,
}

impl AppContext {
    /// Build the context on a directory-backed content store.
    pub fn from_config(config: StrataConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.content_root).with_context(|| {
            format!(
                "Failed to create content root: {}",
                config.content_root.display()
            )
        })?;
        let store: Arc<dyn ContentStore> = Arc::new(FsStore::new(config.content_root.clone()));
        Self::with_store(config, store)
    }

    /// Build the context on an existing content store.
    pub fn with_store(config: StrataConfig, store: Arc<dyn ContentStore>) -> anyhow::Result<Self> {
        config.validate()?;

        let state_dir = match &config.state_dir {
            Some(dir) => dir.clone(),
            None => StateStore::default_state_dir()?,
        };
        let state = StateStore::in_dir(&state_dir)
            .with_context(|| format!("Failed to open state in {}", state_dir.display()))?;
        let processors =
            ProcessorRegistry::with_default_processors(&config.runtime_dir, &config.artifact_extensions);
        let controller = Arc::new(Controller::new(TaskContext::new(
            config.override_rules(),
            processors,
            state,
        )));

        let claims = ClaimStore::new(store.clone(), config.claim_timeout());
        let loader = Arc::new(ContentLoader::new(store.clone(), claims));

        Ok(Self {
            config,
            state_dir,
            store,
            controller,
            loader,
        })
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn loader(&self) -> &Arc<ContentLoader> {
        &self.loader
    }

    /// A fresh observer over the configured roots.
    pub fn observer(&self) -> anyhow::Result<RepositoryObserver> {
        let folder_filter = FolderFilter::new(&self.config.folder_pattern, &self.config.run_modes)
            .context("Invalid folder_pattern")?;
        let file_filter =
            FileFilter::new(&self.config.file_pattern).context("Invalid file_pattern")?;
        Ok(RepositoryObserver::new(
            self.store.clone(),
            self.controller.clone(),
            self.config.roots.clone(),
            folder_filter,
            file_filter,
        ))
    }
}
