//! Turns configuration files into runtime configuration entries.
//!
//! Supported formats:
//! - `.cfg`, `.config`, `.properties`: `key=value` (or `key: value`) lines,
//!   `#` and `!` start comments
//! - `.json`: a single JSON object
//! - any other name: a JSON object, as produced for property-only nodes
//!
//! The file stem (or the full name of a property-only node) is the configuration pid. A stem of the form `factory-alias`
//! declares a factory configuration; the factory pid is recorded separately.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::{InstallStatus, ResourceProcessor};
use crate::error::ProcessorError;
use crate::fs::{remove_path_if_exists, write_atomic};
use crate::state::ResourceRecord;
use crate::types::{Payload, ResourceId};

const EXTENSIONS: &[&str] = &["cfg", "config", "properties", "json"];

/// Record attribute holding the configuration pid.
pub const PID: &str = "pid";
/// Record attribute holding the factory pid, for factory configurations.
pub const FACTORY_PID: &str = "factory_pid";

/// Runtime configuration entry as written to `<configs_dir>/<pid>.json`.
#[derive(Debug, Serialize)]
struct ConfigEntry<'a> {
    pid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    factory_pid: Option<&'a str>,
    source: &'a str,
    properties: BTreeMap<String, serde_json::Value>,
}

/// Writes configuration entries into `configs_dir`.
#[derive(Debug, Clone)]
pub struct ConfigProcessor {
    configs_dir: PathBuf,
}

impl ConfigProcessor {
    pub fn new(configs_dir: PathBuf) -> Self {
        Self { configs_dir }
    }

    fn target_for(&self, pid: &str) -> PathBuf {
        self.configs_dir.join(format!("{}.json", pid))
    }
}

/// Split a stem into `(pid, factory_pid)`.
fn split_pid(stem: &str) -> (String, Option<String>) {
    match stem.split_once('-') {
        Some((factory, alias)) if !factory.is_empty() && !alias.is_empty() => {
            (stem.to_string(), Some(factory.to_string()))
        }
        _ => (stem.to_string(), None),
    }
}

/// Parse configuration properties from a payload.
pub fn parse_properties(
    id: &ResourceId,
    data: &[u8],
) -> Result<BTreeMap<String, serde_json::Value>, ProcessorError> {
    let format_error = |message: String| ProcessorError::Format {
        id: id.clone(),
        message,
    };

    if is_json(id, data) {
        let value: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| format_error(format!("invalid JSON: {}", e)))?;
        return match value {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(format_error(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        };
    }

    let text = std::str::from_utf8(data)
        .map_err(|e| format_error(format!("content is not UTF-8: {}", e)))?;
    let mut properties = BTreeMap::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some(split) = line.find(['=', ':']) else {
            return Err(format_error(format!(
                "line {}: expected 'key=value', found '{}'",
                index + 1,
                line
            )));
        };
        let key = line[..split].trim();
        if key.is_empty() {
            return Err(format_error(format!("line {}: empty key", index + 1)));
        }
        let value = line[split + 1..].trim();
        properties.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
    Ok(properties)
}

/// True for `.json` files and for other non-config names carrying a JSON object.
fn is_json(id: &ResourceId, data: &[u8]) -> bool {
    match id.extension().as_deref() {
        Some("json") => true,
        Some(ext) if EXTENSIONS.contains(&ext) => false,
        _ => data.trim_ascii_start().first() == Some(&b'{'),
    }
}

fn has_config_extension(id: &ResourceId) -> bool {
    id.extension()
        .is_some_and(|ext| EXTENSIONS.contains(&ext.as_str()))
}

/// Name the pid is derived from: the stem for config files, else the full name
/// (`org.example.Service` is a pid, not a file with extension `Service`).
fn pid_name(id: &ResourceId) -> &str {
    if has_config_extension(id) {
        id.stem()
    } else {
        id.name()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl ResourceProcessor for ConfigProcessor {
    fn id(&self) -> &'static str {
        "config"
    }

    fn can_handle(&self, id: &ResourceId, payload: &Payload) -> bool {
        has_config_extension(id) || is_json(id, &payload.data)
    }

    fn install_or_update(
        &self,
        id: &ResourceId,
        record: &mut ResourceRecord,
        payload: &Payload,
    ) -> Result<InstallStatus, ProcessorError> {
        let (pid, factory_pid) = split_pid(pid_name(id));
        let target = self.target_for(&pid);
        if record.has_digest(&payload.digest) && target.exists() {
            tracing::debug!(id = %id, pid = %pid, "configuration unchanged");
            return Ok(InstallStatus::Ignored);
        }

        let properties = parse_properties(id, &payload.data)?;
        let entry = ConfigEntry {
            pid: &pid,
            factory_pid: factory_pid.as_deref(),
            source: id.as_str(),
            properties,
        };
        let bytes = serde_json::to_vec_pretty(&entry)
            .map_err(|e| ProcessorError::Failed(format!("Failed to serialize configuration {}: {}", pid, e)))?;
        write_atomic(&target, &bytes).map_err(|e| ProcessorError::io(&target, e))?;

        record.attributes.insert(PID.to_string(), pid.clone());
        match factory_pid {
            Some(factory) => {
                record.attributes.insert(FACTORY_PID.to_string(), factory);
            }
            None => {
                record.attributes.remove(FACTORY_PID);
            }
        }

        tracing::info!(id = %id, pid = %pid, "applied configuration");
        Ok(if record.installed {
            InstallStatus::Updated
        } else {
            InstallStatus::Installed
        })
    }

    fn uninstall(&self, id: &ResourceId, record: &ResourceRecord) -> Result<(), ProcessorError> {
        let pid = record
            .attribute(PID)
            .map(str::to_string)
            .unwrap_or_else(|| split_pid(pid_name(id)).0);
        let target = self.target_for(&pid);
        remove_path_if_exists(&target).map_err(|e| ProcessorError::io(&target, e))?;
        tracing::info!(id = %id, pid = %pid, "removed configuration");
        Ok(())
    }
}
