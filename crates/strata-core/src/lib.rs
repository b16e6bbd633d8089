//! Strata Core Library
//!
//! Watches install folders in a hierarchical content store and keeps a runtime
//! in sync with them: new or changed resources are installed by pluggable
//! processors, vanished ones are uninstalled, and override rules decide which
//! of two competing resources wins. Bundles can seed the store with content.

pub mod bundle;
pub mod config;
pub mod content;
pub mod context;
pub mod controller;
pub mod error;
pub mod fs;
pub mod overrides;
pub mod processor;
pub mod state;
pub mod task;
pub mod types;
pub mod watch;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, StrataConfig};
    pub use crate::context::AppContext;

    // Content store
    pub use crate::content::{ChildEntry, ContentStore, FsStore, MemoryStore, Node, NodeKind};

    // Orchestration
    pub use crate::controller::{Controller, CycleReport, PendingTask, TaskKind};
    pub use crate::overrides::{OverrideRule, OverrideRules};
    pub use crate::processor::{InstallStatus, ProcessorRegistry, ResourceProcessor};
    pub use crate::state::{ResourceRecord, StateStore};
    pub use crate::task::{TaskContext, TaskOutcome};

    // Watching
    pub use crate::watch::{FileFilter, FolderFilter, ObserverHandle, RepositoryObserver};

    // Bundles
    pub use crate::bundle::{Bundle, ContentLoader, DirBundle, PathEntry, RegisterOutcome};

    // Errors and shared types
    pub use crate::error::{ControllerError, LoaderError, ProcessorError, StateError, StoreError};
    pub use crate::types::{Payload, ResourceId};
}
