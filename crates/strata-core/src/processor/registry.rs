//! Processor registry.
//!
//! Ordered list of processors; lookup walks it once and returns the first
//! processor accepting the resource.

use std::path::Path;

use super::{ArtifactProcessor, ConfigProcessor, ResourceProcessor};
use crate::types::{Payload, ResourceId};

/// Registry of runtime processors, in priority order.
#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn ResourceProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// Create a registry with the built-in processors deploying into `runtime_dir`.
    ///
    /// Config files are tried before artifacts so `.json` configs are never
    /// treated as opaque artifacts.
    pub fn with_default_processors(runtime_dir: &Path, artifact_extensions: &[String]) -> Self {
        let processors: Vec<Box<dyn ResourceProcessor>> = vec![
            Box::new(ConfigProcessor::new(runtime_dir.join("configs"))),
            Box::new(ArtifactProcessor::new(
                runtime_dir.join("artifacts"),
                artifact_extensions.to_vec(),
            )),
        ];
        Self { processors }
    }

    /// Register a processor after the existing ones.
    pub fn register(&mut self, processor: Box<dyn ResourceProcessor>) {
        self.processors.push(processor);
    }

    pub fn all(&self) -> &[Box<dyn ResourceProcessor>] {
        &self.processors
    }

    /// Get a processor by id.
    pub fn get(&self, id: &str) -> Option<&dyn ResourceProcessor> {
        self.processors
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.as_ref())
    }

    /// First processor accepting the resource.
    pub fn find_for(&self, id: &ResourceId, payload: &Payload) -> Option<&dyn ResourceProcessor> {
        self.processors
            .iter()
            .find(|p| p.can_handle(id, payload))
            .map(|p| p.as_ref())
    }

    /// List all processor ids.
    pub fn processor_ids(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.id()).collect()
    }
}
