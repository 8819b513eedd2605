use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::errors::{BackupError, Result};
use crate::storage;
use crate::utils::io::IgnorePaths;

pub mod db;
pub mod filesystem;
pub mod scope;
pub mod snapshot;

pub use db::DatabaseBackup;
pub use filesystem::FilesystemBackup;
pub use scope::ExecutionScope;
pub use snapshot::SnapshotCoordinator;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Database,
    Filesystem,
    Snapshot,
}

impl BackupKind {
    pub fn tag(self) -> &'static str {
        match self {
            BackupKind::Database => "db",
            BackupKind::Filesystem => "filesystem",
            BackupKind::Snapshot => "snapshot",
        }
    }

    pub fn default_extension(self, compress: bool) -> &'static str {
        match (self, compress) {
            (BackupKind::Database, true) => "sql.gz",
            (BackupKind::Database, false) => "sql",
            (_, true) => "tgz",
            (_, false) => "tar",
        }
    }
}

/// How the last `create`/`rollback` ended. Absent while an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded,
    /// Failed; artifacts created by the operation were removed.
    FailedCleanedUp,
    /// Failed; nothing was removed, or the removal itself failed.
    FailedCleanupSkipped,
}

impl OperationOutcome {
    pub fn failed(cleaned: bool) -> Self {
        if cleaned { OperationOutcome::FailedCleanedUp } else { OperationOutcome::FailedCleanupSkipped }
    }
}

/// Everything that identifies one backup artifact and where it applies.
///
/// `kind` is fixed at construction. The artifact file name is derived from
/// `name`, `time` and `extension` as `<name>_<time>.<extension>`.
#[derive(Debug, Clone)]
pub struct BackupDescriptor {
    kind: BackupKind,
    name: String,
    time: i64,
    root_dir: PathBuf,
    backups_dir: PathBuf,
    ignore_paths: IgnorePaths,
    keep_source: bool,
    extension: String,
}

impl BackupDescriptor {
    pub fn new(kind: BackupKind, root_dir: impl Into<PathBuf>, backups_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: kind.tag().to_string(),
            time: Local::now().timestamp(),
            root_dir: root_dir.into(),
            backups_dir: backups_dir.into(),
            ignore_paths: IgnorePaths::new(),
            keep_source: false,
            extension: kind.default_extension(true).to_string(),
        }
    }

    /// Same settings under a different kind; used to build a composite's parts.
    pub fn derive(&self, kind: BackupKind) -> Self {
        Self { kind, ..self.clone() }
    }

    pub fn kind(&self) -> BackupKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn ignore_paths(&self) -> &IgnorePaths {
        &self.ignore_paths
    }

    /// Configured ignore paths plus the backups directory itself.
    pub fn effective_ignore(&self) -> IgnorePaths {
        let mut ignore = self.ignore_paths.clone();
        ignore.insert(&self.root_dir, &self.backups_dir);
        ignore
    }

    pub fn keep_source(&self) -> bool {
        self.keep_source
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn set_time(&mut self, time: i64) -> &mut Self {
        self.time = time;
        self
    }

    pub fn set_backups_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.backups_dir = dir.into();
        self
    }

    pub fn set_ignore_paths(&mut self, ignore: IgnorePaths) -> &mut Self {
        self.ignore_paths = ignore;
        self
    }

    pub fn add_ignore_path(&mut self, path: &Path) -> &mut Self {
        self.ignore_paths.insert(&self.root_dir, path);
        self
    }

    pub fn set_keep_source(&mut self, keep: bool) -> &mut Self {
        self.keep_source = keep;
        self
    }

    pub fn set_extension(&mut self, extension: impl Into<String>) -> &mut Self {
        self.extension = extension.into();
        self
    }

    pub fn backup_filename(&self) -> String {
        storage::backup_filename(&self.name, self.time, &self.extension)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.backups_dir.join(self.backup_filename())
    }
}

/// One backup unit as seen by the controller layer.
pub trait Backup {
    fn descriptor(&self) -> &BackupDescriptor;

    fn type_tag(&self) -> &'static str;

    fn create(&mut self, scope: &ExecutionScope) -> Result<()>;

    fn rollback(&mut self, scope: &ExecutionScope) -> Result<()>;

    fn size_bytes(&self) -> Result<u64>;

    fn outcome(&self) -> Option<OperationOutcome>;

    fn last_operation_succeeded(&self) -> bool {
        self.outcome() == Some(OperationOutcome::Succeeded)
    }

    fn backup_filename(&self) -> String {
        self.descriptor().backup_filename()
    }

    fn backup_path(&self) -> PathBuf {
        self.descriptor().backup_path()
    }
}

/// The archive must be a regular, readable file.
pub(crate) fn check_archive(path: &Path) -> Result<()> {
    if path.is_file() && File::open(path).is_ok() {
        Ok(())
    } else {
        Err(BackupError::CantLoadSnapshot(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_derives_filename_from_name_and_time() {
        let mut d = BackupDescriptor::new(BackupKind::Database, "/srv/app", "/srv/app/var/backups");
        d.set_name("nightly").set_time(1700000000);
        assert_eq!(d.backup_filename(), "nightly_1700000000.sql.gz");
        assert_eq!(d.backup_path(), PathBuf::from("/srv/app/var/backups/nightly_1700000000.sql.gz"));
    }

    #[test]
    fn default_name_is_the_kind_tag() {
        let d = BackupDescriptor::new(BackupKind::Snapshot, "/a", "/b");
        assert_eq!(d.name(), "snapshot");
        assert_eq!(d.extension(), "tgz");
    }

    #[test]
    fn derive_keeps_identity_but_changes_kind() {
        let mut d = BackupDescriptor::new(BackupKind::Snapshot, "/a", "/a/backups");
        d.set_name("s").set_time(7).set_keep_source(true);
        let fs = d.derive(BackupKind::Filesystem);
        assert_eq!(fs.kind(), BackupKind::Filesystem);
        assert_eq!(fs.backup_path(), d.backup_path());
        assert!(fs.keep_source());
    }

    #[test]
    fn backups_dir_is_always_ignored() {
        let d = BackupDescriptor::new(BackupKind::Filesystem, "/a", "/a/var/backups");
        assert!(d.effective_ignore().is_ignored(Path::new("/a/var/backups/x.tgz")));
        assert!(!d.effective_ignore().is_ignored(Path::new("/a/var/log")));
    }

    #[test]
    fn missing_archive_cannot_be_loaded() {
        let err = check_archive(Path::new("/no/such/archive.tgz")).unwrap_err();
        assert!(matches!(err, BackupError::CantLoadSnapshot(_)));
    }
}
