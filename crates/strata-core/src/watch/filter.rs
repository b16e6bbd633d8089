//! Name filters for watched folders and their children.

use regex::Regex;

use crate::types::{base_name, join_path, parent_path};

/// Accepts folder paths matching a regex, plus run-mode variants.
///
/// With the pattern `.*/install$` and active run mode `author`, both
/// `/apps/x/install` and `/apps/x/install.author` are accepted, while
/// `/apps/x/install.publish` is not. Several modes can be combined
/// (`install.author.dev`); all of them must be active.
#[derive(Debug, Clone)]
pub struct FolderFilter {
    regex: Regex,
    run_modes: Vec<String>,
}

impl FolderFilter {
    pub fn new(pattern: &str, run_modes: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            run_modes: run_modes.to_vec(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn accept(&self, path: &str) -> bool {
        if self.regex.is_match(path) {
            return true;
        }

        let name = base_name(path);
        let Some((base, modes)) = name.split_once('.') else {
            return false;
        };
        if base.is_empty() || modes.is_empty() {
            return false;
        }
        let all_active = modes
            .split('.')
            .all(|mode| self.run_modes.iter().any(|active| active == mode));
        if !all_active {
            return false;
        }
        let stripped = match parent_path(path) {
            Some(parent) => join_path(parent, base),
            None => return false,
        };
        self.regex.is_match(&stripped)
    }
}

/// Accepts child names matching a regex.
#[derive(Debug, Clone)]
pub struct FileFilter {
    regex: Regex,
}

impl FileFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn accept(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}
