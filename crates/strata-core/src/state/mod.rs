//! Resource state types and persistence.
//!
//! Represents what is installed, with which digest, by which processor.

pub mod store;
pub mod types;

pub use store::{STATE_FILENAME, StateStore};
pub use types::{ResourceRecord, STATE_VERSION, StateFile};
