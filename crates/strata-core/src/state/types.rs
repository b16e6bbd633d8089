//! State file types for installed resources.
//!
//! Tracks digests, install status and the processor that handled each resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ResourceId;

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Persisted resource state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,

    /// Timestamp of the last flush
    pub generated_at: chrono::DateTime<chrono::Utc>,

    /// Known resources keyed by id
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceRecord>,

    /// Controller settings that must survive restarts
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl StateFile {
    /// Create a new empty state file
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION,
            generated_at: chrono::Utc::now(),
            resources: BTreeMap::new(),
            settings: BTreeMap::new(),
        }
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one installed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource id (also the map key)
    pub id: ResourceId,

    /// Digest of the content that was last installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Whether the processor reported a successful install
    #[serde(default)]
    pub installed: bool,

    /// Id of the processor that last handled this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,

    /// Processor-specific attributes (deployed path, config pid, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Last modification of this record
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ResourceRecord {
    /// Create a record for a resource that has not been installed yet
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            digest: None,
            installed: false,
            processor: None,
            attributes: BTreeMap::new(),
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }

    /// True if `digest` matches the installed content.
    pub fn has_digest(&self, digest: &str) -> bool {
        self.installed && self.digest.as_deref() == Some(digest)
    }
}
