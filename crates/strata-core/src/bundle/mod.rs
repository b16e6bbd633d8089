//! Bundle content loading.
//!
//! A bundle declares content roots ([`PathEntry`]); loading copies the tree
//! below each root into the content store in one save. Descriptor files with
//! a registered reader suffix become structured nodes. A per-bundle claim
//! node records what was loaded and keeps concurrent instances apart.

pub mod claim;
pub mod dir;
pub mod entry;
pub mod loader;
pub mod reader;

use std::io;

pub use claim::{BundleClaim, ClaimStore, CLAIM_ROOT};
pub use dir::{DirBundle, MANIFEST_FILENAME};
pub use entry::PathEntry;
pub use loader::{ContentLoader, RegisterOutcome, UnregisterOutcome};
pub use reader::{ContentReader, DescriptorNode, JsonReader, ReaderRegistry};

/// Source of bundle content.
///
/// Entry paths are bundle-relative and use `/` separators; directory entries
/// end in `/`.
pub trait Bundle: std::fmt::Debug + Send + Sync {
    /// Symbolic name, unique among loaded bundles.
    fn name(&self) -> &str;

    /// Declared content roots; empty if the bundle carries no content.
    fn content_paths(&self) -> &[PathEntry];

    /// Direct entries below `path`, sorted. `None` if `path` is not a directory.
    fn entry_paths(&self, path: &str) -> io::Result<Option<Vec<String>>>;

    /// Bytes of the file entry at `path`.
    fn entry(&self, path: &str) -> io::Result<Option<Vec<u8>>>;

    fn has_entry(&self, path: &str) -> bool;
}
