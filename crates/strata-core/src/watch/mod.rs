//! Content-store watching.
//!
//! The [`RepositoryObserver`] walks the configured roots for folders accepted
//! by the [`FolderFilter`], keeps one [`WatchedFolder`] per match and turns
//! changes of their children into controller tasks.

pub mod convert;
pub mod filter;
pub mod folder;
pub mod observer;

pub use convert::{FileNodeConverter, NodeConverter, PropertyNodeConverter, default_converters};
pub use filter::{FileFilter, FolderFilter};
pub use folder::{ScanResult, WatchedFolder};
pub use observer::{FOLDER_PATTERN_SETTING, ObserverHandle, RepositoryObserver};
