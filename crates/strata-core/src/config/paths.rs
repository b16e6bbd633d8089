//! Config path resolution helpers.

use std::path::{Path, PathBuf};

/// Config file name.
pub const CONFIG_FILENAME: &str = "strata.toml";

/// Pick the config file: explicit path, else `./strata.toml` if present,
/// else the user config dir.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    working_dir: &Path,
    global_dir: Option<&Path>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = working_dir.join(CONFIG_FILENAME);
    if local.exists() {
        return local;
    }
    match global_dir {
        Some(dir) => dir.join(CONFIG_FILENAME),
        None => local,
    }
}

/// Per-user config directory (`~/.config/strata` on Linux).
pub fn global_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("strata"))
}
