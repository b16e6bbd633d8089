//! Node descriptor readers.
//!
//! A descriptor is a bundle file whose suffix has a registered reader. It
//! describes a node (properties plus nested child nodes) instead of carrying
//! file data.

use std::collections::BTreeMap;

/// Parsed descriptor: properties and nested child nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorNode {
    pub properties: BTreeMap<String, serde_json::Value>,
    pub children: Vec<(String, DescriptorNode)>,
}

/// Parses one descriptor format.
pub trait ContentReader: std::fmt::Debug + Send + Sync {
    /// Suffix including the dot, e.g. `.json`.
    fn extension(&self) -> &'static str;

    fn parse(&self, data: &[u8]) -> Result<DescriptorNode, String>;
}

/// JSON descriptors: object members become child nodes, everything else a
/// property.
#[derive(Debug, Default)]
pub struct JsonReader;

impl JsonReader {
    fn node_from(map: serde_json::Map<String, serde_json::Value>) -> DescriptorNode {
        let mut node = DescriptorNode::default();
        for (key, value) in map {
            match value {
                serde_json::Value::Object(child) => node.children.push((key, Self::node_from(child))),
                other => {
                    node.properties.insert(key, other);
                }
            }
        }
        node
    }
}

impl ContentReader for JsonReader {
    fn extension(&self) -> &'static str {
        ".json"
    }

    fn parse(&self, data: &[u8]) -> Result<DescriptorNode, String> {
        match serde_json::from_slice(data) {
            Ok(serde_json::Value::Object(map)) => Ok(Self::node_from(map)),
            Ok(_) => Err("descriptor must be a JSON object".to_string()),
            Err(e) => Err(format!("invalid JSON: {}", e)),
        }
    }
}

/// Registered readers keyed by suffix.
#[derive(Debug)]
pub struct ReaderRegistry {
    readers: Vec<Box<dyn ContentReader>>,
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_default_readers()
    }
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self {
            readers: Vec::new(),
        }
    }

    pub fn with_default_readers() -> Self {
        Self {
            readers: vec![Box::new(JsonReader)],
        }
    }

    pub fn register(&mut self, reader: Box<dyn ContentReader>) {
        self.readers.push(reader);
    }

    pub fn readers(&self) -> impl Iterator<Item = &dyn ContentReader> {
        self.readers.iter().map(|r| r.as_ref())
    }

    /// Reader whose suffix ends `name` (with a non-empty stem).
    pub fn for_name(&self, name: &str) -> Option<&dyn ContentReader> {
        self.readers
            .iter()
            .find(|r| name.len() > r.extension().len() && name.ends_with(r.extension()))
            .map(|r| r.as_ref())
    }
}
