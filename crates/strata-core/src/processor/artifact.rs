//! Deploys opaque artifacts (jars, archives) into the runtime directory.

use std::path::{Path, PathBuf};

use super::{InstallStatus, ResourceProcessor};
use crate::error::ProcessorError;
use crate::fs::{remove_path_if_exists, write_atomic};
use crate::state::ResourceRecord;
use crate::types::{Payload, ResourceId};

/// Record attribute holding the deployed file.
pub const DEPLOYED_PATH: &str = "deployed_path";

/// Copies artifacts to `<artifacts_dir>/<resource path>`.
///
/// The deployed path mirrors the full resource id, so equally named artifacts
/// from different folders never share a file.
#[derive(Debug, Clone)]
pub struct ArtifactProcessor {
    artifacts_dir: PathBuf,
    extensions: Vec<String>,
}

impl ArtifactProcessor {
    pub fn new(artifacts_dir: PathBuf, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            artifacts_dir,
            extensions,
        }
    }

    fn target_for(&self, id: &ResourceId) -> PathBuf {
        id.as_str()
            .split('/')
            .filter(|segment| !matches!(*segment, "" | "." | ".."))
            .fold(self.artifacts_dir.clone(), |acc, segment| acc.join(segment))
    }

    /// Remove directories left empty below the artifacts dir.
    fn prune_empty_parents(&self, target: &Path) {
        let mut current = target.parent();
        while let Some(dir) = current {
            if dir == self.artifacts_dir || !dir.starts_with(&self.artifacts_dir) {
                break;
            }
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl ResourceProcessor for ArtifactProcessor {
    fn id(&self) -> &'static str {
        "artifact"
    }

    fn can_handle(&self, id: &ResourceId, _payload: &Payload) -> bool {
        id.extension()
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn install_or_update(
        &self,
        id: &ResourceId,
        record: &mut ResourceRecord,
        payload: &Payload,
    ) -> Result<InstallStatus, ProcessorError> {
        let target = self.target_for(id);
        if record.has_digest(&payload.digest) && target.exists() {
            tracing::debug!(id = %id, "artifact unchanged");
            return Ok(InstallStatus::Ignored);
        }

        write_atomic(&target, &payload.data).map_err(|e| ProcessorError::io(&target, e))?;
        record
            .attributes
            .insert(DEPLOYED_PATH.to_string(), target.display().to_string());

        tracing::info!(id = %id, target = %target.display(), "deployed artifact");
        Ok(if record.installed {
            InstallStatus::Updated
        } else {
            InstallStatus::Installed
        })
    }

    fn uninstall(&self, id: &ResourceId, record: &ResourceRecord) -> Result<(), ProcessorError> {
        let target = record
            .attribute(DEPLOYED_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.target_for(id));
        let removed = remove_path_if_exists(&target).map_err(|e| ProcessorError::io(&target, e))?;
        if removed {
            self.prune_empty_parents(&target);
            tracing::info!(id = %id, target = %target.display(), "removed artifact");
        } else {
            tracing::debug!(id = %id, target = %target.display(), "artifact already gone");
        }
        Ok(())
    }
}
