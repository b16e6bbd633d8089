//! Error types for the orchestration layers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::ResourceId;

/// Failures reported by a content store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Content store unavailable: {0}")]
    Unavailable(String),

    #[error("Content store rejected change at '{path}': {message}")]
    Constraint { path: String, message: String },

    #[error("No node at '{0}'")]
    NotFound(String),

    #[error("Content store I/O failed at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid node metadata at '{path}': {source}")]
    Metadata {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by a resource processor.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Malformed content in '{id}': {message}")]
    Format { id: ResourceId, message: String },

    #[error("Runtime I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl ProcessorError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures loading or flushing the resource state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "State file {path} is corrupt: {source}\n\
         Refusing to start with an empty state; repair or remove the file manually."
    )]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported state file version {version} in {path}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Orchestration failure surfaced by tasks and the controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Install of {id} failed: {source}")]
    Install {
        id: ResourceId,
        #[source]
        source: ProcessorError,
    },

    #[error("Uninstall of {id} failed: {source}")]
    Uninstall {
        id: ResourceId,
        #[source]
        source: ProcessorError,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures loading bundle content into the store.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Failed to read '{entry}' from bundle {bundle}: {source}")]
    Entry {
        bundle: String,
        entry: String,
        #[source]
        source: io::Error,
    },

    #[error("Bundle {bundle} is loaded by another instance")]
    Claimed { bundle: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControllerError {
    /// Malformed content only affects one resource; the batch continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ControllerError::Install {
                source: ProcessorError::Format { .. },
                ..
            } | ControllerError::Uninstall {
                source: ProcessorError::Format { .. },
                ..
            }
        )
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            ControllerError::Install { id, .. } | ControllerError::Uninstall { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_errors_are_recoverable() {
        let err = ControllerError::Install {
            id: ResourceId::new("/apps/install/a.cfg"),
            source: ProcessorError::Format {
                id: ResourceId::new("/apps/install/a.cfg"),
                message: "missing '='".to_string(),
            },
        };
        assert!(err.is_recoverable());
        assert_eq!(err.resource_id().map(|id| id.as_str()), Some("/apps/install/a.cfg"));
    }

    #[test]
    fn test_store_errors_abort_the_cycle() {
        let err = ControllerError::from(StoreError::Unavailable("offline".to_string()));
        assert!(!err.is_recoverable());
        assert!(err.resource_id().is_none());
    }
}
