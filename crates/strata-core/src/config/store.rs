//! Config store for loading and saving strata.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{StrataConfig, parser, paths};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Resolve the config file from an optional `--config` argument.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let working_dir = std::env::current_dir().context("Failed to read working directory")?;
        let global_dir = paths::global_config_dir();
        let config_path =
            paths::resolve_config_path(explicit, &working_dir, global_dir.as_deref());
        Ok(Self::from_path(config_path))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config; a missing file yields defaults.
    ///
    /// Relative directories are resolved against the config file's directory.
    pub fn load(&self) -> anyhow::Result<StrataConfig> {
        let mut config = if self.config_path.exists() {
            parser::parse_strata_toml(&self.config_path)?
        } else {
            tracing::debug!(path = %self.config_path.display(), "no config file, using defaults");
            StrataConfig::new()
        };
        let base = match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().context("Failed to read working directory")?,
        };
        config.resolve_relative_to(&base);
        Ok(config)
    }

    pub fn save(&self, config: &StrataConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
