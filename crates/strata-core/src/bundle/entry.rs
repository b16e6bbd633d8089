//! Declared content roots of a bundle.

use serde::{Deserialize, Serialize};

use crate::types::normalize_path;

/// One content root: where it lives in the bundle and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    /// Bundle-relative directory holding the content
    pub path: String,

    /// Content path the entries are created under
    #[serde(default = "default_target")]
    pub target: String,

    /// Replace existing nodes instead of keeping them
    #[serde(default)]
    pub overwrite: bool,

    /// Remove created nodes when the bundle is unloaded (defaults to `overwrite`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall: Option<bool>,
}

fn default_target() -> String {
    "/".to_string()
}

impl PathEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: default_target(),
            overwrite: false,
            uninstall: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = normalize_path(target);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_uninstall(mut self, uninstall: bool) -> Self {
        self.uninstall = Some(uninstall);
        self
    }

    /// Whether created nodes are tracked for removal.
    pub fn uninstall(&self) -> bool {
        self.uninstall.unwrap_or(self.overwrite)
    }

    /// Bundle path without surrounding slashes.
    pub fn bundle_path(&self) -> &str {
        self.path.trim_matches('/')
    }

    /// Parse a header such as
    /// `content;overwrite:=true;uninstall:=false;path:=/target, more`.
    pub fn parse_header(header: &str) -> anyhow::Result<Vec<PathEntry>> {
        let mut entries = Vec::new();
        for clause in header.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let mut parts = clause.split(';').map(str::trim);
            let Some(path) = parts.next().filter(|p| !p.is_empty()) else {
                anyhow::bail!("Missing content path in '{}'", clause);
            };
            let mut entry = PathEntry::new(path);
            for directive in parts.filter(|p| !p.is_empty()) {
                let Some((key, value)) = directive.split_once(":=") else {
                    anyhow::bail!("Invalid directive '{}' in '{}'", directive, clause);
                };
                let value = value.trim().trim_matches('"');
                match key.trim() {
                    "overwrite" => entry.overwrite = parse_flag(key, value)?,
                    "uninstall" => entry.uninstall = Some(parse_flag(key, value)?),
                    "path" => entry.target = normalize_path(value),
                    other => {
                        tracing::debug!(directive = %other, "ignoring unknown content directive");
                    }
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn parse_flag(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => anyhow::bail!("Directive '{}' expects true or false, got '{}'", key, value),
    }
}
