//! Backups taken while an [`FsStore`](super::FsStore) commit runs.
//!
//! Every host path an operation is about to touch is saved first: files are
//! copied, directories the operation would delete are moved aside, and paths
//! that do not exist yet are remembered so they can be removed again.
//! Restoring walks the log backwards.

use std::io;
use std::path::{Path, PathBuf};

use crate::fs::remove_path_if_exists;

#[derive(Debug)]
struct Saved {
    original: PathBuf,
    /// `None` when nothing existed at `original`
    backup: Option<PathBuf>,
}

#[derive(Debug)]
pub(crate) struct UndoLog {
    dir: PathBuf,
    saved: Vec<Saved>,
}

impl UndoLog {
    /// Backups go to a hidden directory under `root`, so renames stay on one
    /// filesystem and listings never show them.
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(format!(".strata-commit-{}", uuid::Uuid::new_v4())),
            saved: Vec::new(),
        }
    }

    pub fn save(&mut self, original: PathBuf) -> io::Result<()> {
        let metadata = match std::fs::symlink_metadata(&original) {
            Ok(metadata) => metadata,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                ) =>
            {
                self.saved.push(Saved {
                    original,
                    backup: None,
                });
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        std::fs::create_dir_all(&self.dir)?;
        let backup = self.dir.join(self.saved.len().to_string());
        if metadata.is_dir() {
            std::fs::rename(&original, &backup)?;
        } else {
            std::fs::copy(&original, &backup)?;
        }
        self.saved.push(Saved {
            original,
            backup: Some(backup),
        });
        Ok(())
    }

    /// Put every saved path back, newest first.
    ///
    /// Keeps going after a failed step and returns the first error.
    pub fn restore(mut self) -> io::Result<()> {
        let mut first_error = None;
        while let Some(saved) = self.saved.pop() {
            if let Err(err) = restore_one(&saved) {
                tracing::warn!(
                    path = %saved.original.display(),
                    error = %err,
                    "failed to restore path after aborted commit"
                );
                first_error.get_or_insert(err);
            }
        }
        self.discard();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drop the backups once the commit went through.
    pub fn discard(&self) {
        if let Err(err) = remove_path_if_exists(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %err, "failed to remove commit backups");
        }
    }
}

fn restore_one(saved: &Saved) -> io::Result<()> {
    let Some(backup) = &saved.backup else {
        // Parent may still be a plain file, which also means nothing was created
        if std::fs::symlink_metadata(&saved.original).is_ok() {
            remove_path_if_exists(&saved.original)?;
        }
        return Ok(());
    };
    remove_path_if_exists(&saved.original)?;
    if let Some(parent) = saved.original.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(backup, &saved.original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_restore_brings_back_files_and_removes_new_ones() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let kept = tmp.path().join("kept.txt");
        let tree = tmp.path().join("tree");
        let fresh = tmp.path().join("fresh");
        std::fs::write(&kept, "old").expect("write should succeed");
        std::fs::create_dir_all(tree.join("sub")).expect("mkdir should succeed");
        std::fs::write(tree.join("sub/leaf"), "leaf").expect("write should succeed");

        let mut log = UndoLog::new(tmp.path());
        log.save(kept.clone()).expect("save should succeed");
        log.save(tree.clone()).expect("save should succeed");
        log.save(fresh.clone()).expect("save should succeed");
        assert!(!tree.exists());

        std::fs::write(&kept, "new").expect("write should succeed");
        std::fs::create_dir_all(fresh.join("x")).expect("mkdir should succeed");

        log.restore().expect("restore should succeed");
        assert_eq!(std::fs::read_to_string(&kept).expect("kept exists"), "old");
        assert_eq!(
            std::fs::read_to_string(tree.join("sub/leaf")).expect("leaf exists"),
            "leaf"
        );
        assert!(!fresh.exists());
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .expect("read_dir should succeed")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".strata-commit-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
