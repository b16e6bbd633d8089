//! Bundles unpacked into a directory.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::bundle::entry::PathEntry;

/// Manifest at the top of a bundle directory.
pub const MANIFEST_FILENAME: &str = "bundle.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BundleManifest {
    name: String,

    /// Header form: `path;overwrite:=true;path:=/target, ...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    initial_content: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    content: Vec<PathEntry>,
}

/// A bundle read from a directory with a `bundle.toml` manifest.
#[derive(Debug, Clone)]
pub struct DirBundle {
    name: String,
    root: PathBuf,
    paths: Vec<PathEntry>,
}

impl DirBundle {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, paths: Vec<PathEntry>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            paths,
        }
    }

    /// Read the manifest of the bundle at `root`.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let manifest_path = root.join(MANIFEST_FILENAME);
        let content = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read bundle manifest: {}", manifest_path.display()))?;
        let manifest: BundleManifest = toml::from_str(&content)
            .with_context(|| format!("Invalid bundle manifest: {}", manifest_path.display()))?;

        if manifest.name.trim().is_empty() {
            anyhow::bail!("Bundle manifest {} has an empty name", manifest_path.display());
        }

        let mut paths = manifest.content;
        if let Some(header) = manifest.initial_content.as_deref() {
            paths.extend(
                PathEntry::parse_header(header)
                    .with_context(|| format!("Invalid initial_content in {}", manifest_path.display()))?,
            );
        }
        for entry in &mut paths {
            entry.target = crate::types::normalize_path(&entry.target);
        }

        Ok(Self::new(manifest.name, root, paths))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> io::Result<PathBuf> {
        let mut host = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." || segment == "." {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("bundle entry '{}' escapes the bundle", path),
                ));
            }
            host.push(segment);
        }
        Ok(host)
    }
}

impl Bundle for DirBundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn content_paths(&self) -> &[PathEntry] {
        &self.paths
    }

    fn entry_paths(&self, path: &str) -> io::Result<Option<Vec<String>>> {
        let dir = self.host_path(path)?;
        if !dir.is_dir() {
            return Ok(None);
        }
        let prefix = path.trim_matches('/');
        let mut entries = Vec::new();
        for item in std::fs::read_dir(&dir)? {
            let item = item?;
            let name = item.file_name().to_string_lossy().into_owned();
            let mut entry = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            if item.file_type()?.is_dir() {
                entry.push('/');
            }
            entries.push(entry);
        }
        entries.sort();
        Ok(Some(entries))
    }

    fn entry(&self, path: &str) -> io::Result<Option<Vec<u8>>> {
        let file = self.host_path(path)?;
        if !file.is_file() {
            return Ok(None);
        }
        std::fs::read(&file).map(Some)
    }

    fn has_entry(&self, path: &str) -> bool {
        self.host_path(path).is_ok_and(|p| p.exists())
    }
}
