use std::fs;
use std::path::PathBuf;

use tracing::{info, info_span, warn};

use super::{Backup, BackupDescriptor, BackupKind, DatabaseBackup, ExecutionScope, FilesystemBackup, OperationOutcome};
use crate::drivers::DataStore;
use crate::errors::{BackupError, Result};
use crate::rollback::Delivery;

/// Filesystem archive and database dump handled as one backup.
///
/// The dump is written into a staging directory inside the root before the
/// tree is archived, so it travels inside the filesystem artifact. The dump
/// file itself only lives for the duration of `create` or `rollback`.
///
/// A failed database restore does not undo the file restore that preceded it.
pub struct SnapshotCoordinator {
    descriptor: BackupDescriptor,
    filesystem: FilesystemBackup,
    database: DatabaseBackup,
    outcome: Option<OperationOutcome>,
}

impl SnapshotCoordinator {
    pub fn new(descriptor: BackupDescriptor, staging_dir: impl Into<PathBuf>, delivery: Delivery, store: Box<dyn DataStore>) -> Self {
        let filesystem = FilesystemBackup::new(descriptor.derive(BackupKind::Filesystem), delivery);

        let mut db = BackupDescriptor::new(BackupKind::Database, descriptor.root_dir(), staging_dir);
        db.set_name(descriptor.name()).set_time(descriptor.time()).set_extension(BackupKind::Database.default_extension(false));
        let database = DatabaseBackup::new(db, store);

        Self::from_parts(descriptor, filesystem, database)
    }

    pub fn from_parts(descriptor: BackupDescriptor, filesystem: FilesystemBackup, database: DatabaseBackup) -> Self {
        Self { descriptor, filesystem, database, outcome: None }
    }

    pub fn database_backup_filename(&self) -> String {
        self.database.backup_filename()
    }

    pub fn filesystem(&self) -> &FilesystemBackup {
        &self.filesystem
    }

    pub fn database(&self) -> &DatabaseBackup {
        &self.database
    }

    fn check_staging(&self) -> Result<()> {
        let staging = self.database.descriptor().backups_dir();
        if self.filesystem.descriptor().effective_ignore().is_ignored(staging) {
            return Err(BackupError::Config(format!(
                "staging directory {} is excluded from the archive",
                staging.display()
            )));
        }
        if !staging.starts_with(self.descriptor.root_dir()) {
            return Err(BackupError::Config(format!(
                "staging directory {} is outside the installation root",
                staging.display()
            )));
        }
        Ok(())
    }

    /// Best-effort; true when no dump file is left behind.
    fn remove_database_artifact(&self) -> bool {
        let path = self.database.backup_path();
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not remove database dump");
                false
            }
        }
    }

    fn fail(&mut self, err: BackupError) -> Result<()> {
        let cleaned = self.remove_database_artifact();
        self.outcome = Some(OperationOutcome::failed(cleaned));
        Err(err)
    }
}

impl Backup for SnapshotCoordinator {
    fn descriptor(&self) -> &BackupDescriptor {
        &self.descriptor
    }

    fn type_tag(&self) -> &'static str {
        "snapshot"
    }

    fn create(&mut self, scope: &ExecutionScope) -> Result<()> {
        self.outcome = None;
        let _span = info_span!("snapshot_create", file = %self.backup_path().display()).entered();
        self.check_staging()?;

        if let Err(err) = self.database.create(scope) {
            self.outcome = self.database.outcome();
            return Err(err);
        }

        scope.checkpoint("filesystem");
        if let Err(err) = self.filesystem.create(scope) {
            return self.fail(err);
        }

        if !self.remove_database_artifact() {
            warn!("database dump left in staging directory");
        }
        info!("snapshot created");
        self.outcome = Some(OperationOutcome::Succeeded);
        Ok(())
    }

    fn rollback(&mut self, scope: &ExecutionScope) -> Result<()> {
        self.outcome = None;
        let _span = info_span!("snapshot_rollback", file = %self.backup_path().display()).entered();

        if let Err(err) = self.filesystem.rollback(scope) {
            return self.fail(err);
        }

        scope.checkpoint("database");
        if let Err(err) = self.database.rollback(scope) {
            warn!("database restore failed after files were restored; files are not reverted");
            return self.fail(err);
        }

        self.remove_database_artifact();
        info!("snapshot restored");
        self.outcome = Some(OperationOutcome::Succeeded);
        Ok(())
    }

    fn size_bytes(&self) -> Result<u64> {
        Ok(self.filesystem.size_bytes()? + self.database.size_bytes()?)
    }

    fn outcome(&self) -> Option<OperationOutcome> {
        self.outcome
    }
}
