//! Runtime processors: the side that actually installs resources.
//!
//! A processor is a pure predicate ([`ResourceProcessor::can_handle`]) plus an
//! install/uninstall action pair. Processors are tried in registration order
//! and the first one that accepts a resource handles it.

pub mod artifact;
pub mod config;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::error::ProcessorError;
use crate::state::ResourceRecord;
use crate::types::{Payload, ResourceId};

pub use artifact::ArtifactProcessor;
pub use config::ConfigProcessor;
pub use registry::ProcessorRegistry;

/// Result of [`ResourceProcessor::install_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStatus {
    /// First install
    Installed,
    /// Replaced a previously installed version
    Updated,
    /// Nothing to do, the runtime already has this content
    Ignored,
}

/// A runtime component able to install a class of resources.
pub trait ResourceProcessor: std::fmt::Debug + Send + Sync {
    /// Stable processor id, recorded with each installed resource.
    fn id(&self) -> &'static str;

    /// Whether this processor handles `id`. Must not have side effects.
    fn can_handle(&self, id: &ResourceId, payload: &Payload) -> bool;

    /// Install or update the resource.
    ///
    /// `record` holds the previous state (default for a first install); the
    /// processor may add attributes to it. State is only persisted when the
    /// result is not [`InstallStatus::Ignored`].
    fn install_or_update(
        &self,
        id: &ResourceId,
        record: &mut ResourceRecord,
        payload: &Payload,
    ) -> Result<InstallStatus, ProcessorError>;

    /// Remove the resource from the runtime.
    fn uninstall(&self, id: &ResourceId, record: &ResourceRecord) -> Result<(), ProcessorError>;
}
