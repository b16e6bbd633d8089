//! Priority-override rules between content locations.
//!
//! A rule `(higher, lower)` says a resource under `higher` always wins over the
//! resource with the same suffix under `lower`. With the rule `("/apps", "/libs")`,
//! `/apps/foo/install/x.jar` and `/libs/foo/install/x.jar` are the same logical
//! target and the `/apps` one is the one that may be installed.
//!
//! Rules chain: with `(/a, /b)` and `(/b, /c)`, `/a/x` also outranks `/c/x`.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{ResourceId, normalize_path};

/// One `(higher, lower)` prefix pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub higher: String,
    pub lower: String,
}

impl OverrideRule {
    pub fn new(higher: impl AsRef<str>, lower: impl AsRef<str>) -> Self {
        Self {
            higher: normalize_path(higher.as_ref()),
            lower: normalize_path(lower.as_ref()),
        }
    }

    /// Validate the rule
    pub fn validate(&self) -> anyhow::Result<()> {
        for prefix in [&self.higher, &self.lower] {
            if !prefix.starts_with('/') {
                anyhow::bail!("Override prefix must be absolute: '{}'", prefix);
            }
            if normalize_path(prefix) == "/" {
                anyhow::bail!("Override prefix cannot be the root path");
            }
        }
        if normalize_path(&self.higher) == normalize_path(&self.lower) {
            anyhow::bail!(
                "Override rule has identical prefixes: '{}'",
                self.higher
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Higher,
    Lower,
}

/// Static, immutable set of override rules.
///
/// An empty rule set means every resource is independent.
#[derive(Debug, Clone, Default)]
pub struct OverrideRules {
    rules: Vec<OverrideRule>,
}

impl OverrideRules {
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| OverrideRule::new(&r.higher, &r.lower))
            .collect();
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    /// Ids of the same logical target that outrank `id`, nearest first.
    pub fn higher_priority_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.related(id, Direction::Higher)
    }

    /// Ids of the same logical target that `id` outranks, nearest first.
    pub fn lower_priority_of(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.related(id, Direction::Lower)
    }

    fn related(&self, id: &ResourceId, direction: Direction) -> Vec<ResourceId> {
        let mut result = Vec::new();
        if self.rules.is_empty() {
            return result;
        }

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(id.as_str().to_string());
        let mut frontier = VecDeque::new();
        frontier.push_back(id.as_str().to_string());

        while let Some(current) = frontier.pop_front() {
            for rule in &self.rules {
                let (from, to) = match direction {
                    Direction::Higher => (&rule.lower, &rule.higher),
                    Direction::Lower => (&rule.higher, &rule.lower),
                };
                if let Some(suffix) = strip_segment_prefix(&current, from) {
                    let candidate = format!("{}{}", to, suffix);
                    if seen.insert(candidate.clone()) {
                        result.push(ResourceId::new(candidate.clone()));
                        frontier.push_back(candidate);
                    }
                }
            }
        }
        result
    }
}

/// Strip `prefix` from `path` only on a segment boundary, keeping the leading `/`.
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.len() > 1 && rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}
