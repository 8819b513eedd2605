use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{BackupError, IoContext, Result};

/// Paths excluded from both archiving and rollback sweeps.
///
/// An entry excludes itself and everything below it. Directories that merely
/// contain an ignored entry are "shielded": their contents may be swept but
/// the directory itself survives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnorePaths {
    paths: BTreeSet<PathBuf>,
}

impl IgnorePaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative entries are resolved against `root`.
    pub fn resolve<I, P>(root: &Path, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut out = Self::new();
        for p in paths {
            out.insert(root, p.as_ref());
        }
        out
    }

    pub fn insert(&mut self, root: &Path, path: &Path) {
        let abs = if path.is_absolute() { path.to_path_buf() } else { root.join(path) };
        self.paths.insert(abs);
    }

    pub fn extend(&mut self, other: &IgnorePaths) {
        self.paths.extend(other.paths.iter().cloned());
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.paths.iter().any(|ignored| path.starts_with(ignored))
    }

    /// True when `dir` is an ancestor of some ignored path.
    pub fn shields(&self, dir: &Path) -> bool {
        self.paths.iter().any(|ignored| ignored != dir && ignored.starts_with(dir))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Depth-first walk below `root` (children before parents), pruning ignored paths.
///
/// The pre-order walk is collected and reversed: walkdir's `filter_entry`
/// under `contents_first` skips the rest of the parent, not the pruned dir.
pub fn walk_children_first(root: &Path, ignore: &IgnorePaths) -> impl Iterator<Item = walkdir::DirEntry> {
    let entries: Vec<walkdir::DirEntry> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !ignore.is_ignored(e.path()))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .collect();
    entries.into_iter().rev()
}

/// Walk below `root` with parents before children, pruning ignored paths.
/// Entries come back sorted by name so archives and uploads are stable.
pub fn walk_parents_first<'a>(root: &Path, ignore: &'a IgnorePaths) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> + 'a {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| !ignore.is_ignored(e.path()))
}

/// Remove everything below `dir` except ignored paths and their ancestors.
/// `dir` itself is kept.
pub fn clean_dir_except(dir: &Path, ignore: &IgnorePaths) -> Result<()> {
    for entry in walk_children_first(dir, ignore) {
        let path = entry.path();
        if entry.file_type().is_dir() {
            if ignore.shields(path) {
                continue;
            }
            fs::remove_dir(path).at(path)?;
        } else {
            fs::remove_file(path).at(path)?;
        }
        debug!(path = %path.display(), "removed");
    }
    Ok(())
}

/// Best-effort removal of a file or directory tree; failures are logged.
pub fn remove_quietly(path: &Path) {
    let res = match fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return,
    };
    if let Err(err) = res {
        warn!(path = %path.display(), error = %err, "cleanup failed");
    }
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).at(dir)
}

/// A file or directory that is removed when the guard drops, unless kept.
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
    keep: bool,
}

impl ScopedPath {
    /// Create a fresh directory. Fails if it already exists.
    pub fn create_dir(path: PathBuf) -> Result<Self> {
        match fs::create_dir(&path) {
            Ok(()) => Ok(Self { path, keep: false }),
            Err(err) => Err(BackupError::permissions(
                format!("failed to create directory {}: {}", path.display(), err),
                Some(path),
            )),
        }
    }

    /// Create an empty file.
    pub fn create_file(path: PathBuf) -> Result<Self> {
        fs::File::create(&path).at(&path)?;
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(&mut self, keep: bool) {
        self.keep = keep;
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        if !self.keep {
            remove_quietly(&self.path);
        }
    }
}
