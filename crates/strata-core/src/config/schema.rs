//! Configuration schema for strata.toml

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::overrides::{OverrideRule, OverrideRules};

/// Root configuration structure for strata.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Directory backing the content store
    #[serde(default = "default_content_root")]
    pub content_root: PathBuf,

    /// Directory processors deploy into
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Directory holding the resource state file (platform state dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Pause between two observer cycles
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Content locations searched for install folders
    #[serde(default = "default_roots")]
    pub roots: Vec<String>,

    /// Regex a folder path must match to be watched
    #[serde(default = "default_folder_pattern")]
    pub folder_pattern: String,

    /// Regex a child name must match to be considered a resource
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Active run modes; `install.<mode>` folders are watched too
    #[serde(default)]
    pub run_modes: Vec<String>,

    /// Age after which a bundle content claim is considered abandoned
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,

    /// File extensions deployed by the artifact processor
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,

    /// Priority overrides, `higher` wins over `lower`
    #[serde(rename = "override", default = "default_overrides")]
    pub overrides: Vec<OverrideRule>,
}

fn default_content_root() -> PathBuf {
    PathBuf::from("content")
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("runtime")
}

fn default_scan_interval_ms() -> u64 {
    1000
}

fn default_roots() -> Vec<String> {
    vec!["/libs".to_string(), "/apps".to_string()]
}

fn default_folder_pattern() -> String {
    ".*/install$".to_string()
}

fn default_file_pattern() -> String {
    "^[^.]".to_string()
}

fn default_claim_timeout_secs() -> u64 {
    600
}

fn default_artifact_extensions() -> Vec<String> {
    vec!["jar".to_string(), "zip".to_string(), "bin".to_string()]
}

fn default_overrides() -> Vec<OverrideRule> {
    vec![OverrideRule::new("/apps", "/libs")]
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            content_root: default_content_root(),
            runtime_dir: default_runtime_dir(),
            state_dir: None,
            scan_interval_ms: default_scan_interval_ms(),
            roots: default_roots(),
            folder_pattern: default_folder_pattern(),
            file_pattern: default_file_pattern(),
            run_modes: Vec::new(),
            claim_timeout_secs: default_claim_timeout_secs(),
            artifact_extensions: default_artifact_extensions(),
            overrides: default_overrides(),
        }
    }
}

impl StrataConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scan_interval_ms == 0 {
            anyhow::bail!("scan_interval_ms must be greater than zero");
        }
        if self.roots.is_empty() {
            anyhow::bail!("At least one watch root is required");
        }
        for root in &self.roots {
            if !root.starts_with('/') {
                anyhow::bail!("Watch root must be an absolute content path: '{}'", root);
            }
        }
        regex::Regex::new(&self.folder_pattern)
            .with_context(|| format!("Invalid folder_pattern '{}'", self.folder_pattern))?;
        regex::Regex::new(&self.file_pattern)
            .with_context(|| format!("Invalid file_pattern '{}'", self.file_pattern))?;
        for mode in &self.run_modes {
            if mode.is_empty() || mode.contains('/') {
                anyhow::bail!("Invalid run mode '{}'", mode);
            }
        }
        for ext in &self.artifact_extensions {
            if ext.trim_start_matches('.').is_empty() {
                anyhow::bail!("Artifact extensions cannot be empty");
            }
        }
        for rule in &self.overrides {
            rule.validate().with_context(|| {
                format!("Invalid override rule '{}' over '{}'", rule.higher, rule.lower)
            })?;
        }
        Ok(())
    }

    pub fn override_rules(&self) -> OverrideRules {
        OverrideRules::new(self.overrides.clone())
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scan_interval_ms)
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.claim_timeout_secs).unwrap_or(i64::MAX))
    }

    /// Resolve relative directories against `base` (the config file's directory).
    pub fn resolve_relative_to(&mut self, base: &std::path::Path) {
        if self.content_root.is_relative() {
            self.content_root = base.join(&self.content_root);
        }
        if self.runtime_dir.is_relative() {
            self.runtime_dir = base.join(&self.runtime_dir);
        }
        if let Some(state_dir) = &self.state_dir
            && state_dir.is_relative()
        {
            self.state_dir = Some(base.join(state_dir));
        }
    }
}
