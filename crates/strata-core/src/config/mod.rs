//! Configuration for the controller
//!
//! A single `strata.toml` configures the content root, the runtime directory,
//! watch filters and override rules. Every field has a default, so a missing
//! file is a valid configuration.

pub mod parser;
pub mod paths;
pub mod schema;
pub mod store;

pub use parser::{parse_strata_toml, parse_strata_toml_str, to_toml};
pub use paths::{CONFIG_FILENAME, global_config_dir, resolve_config_path};
pub use schema::StrataConfig;
pub use store::ConfigStore;
