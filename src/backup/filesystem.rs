use std::fs;
use std::path::Path;

use tracing::{info, info_span};

use super::{Backup, BackupDescriptor, ExecutionScope, OperationOutcome};
use crate::archive::{ArchiveCodec, TarCodec};
use crate::errors::{BackupError, Result};
use crate::rollback::{Delivery, select_worker};
use crate::transport::RemoteTransport;
use crate::utils::io::{ensure_dir, remove_quietly};
use crate::utils::probe::{ProbeFlags, tree_info};

/// Filesystem backup: one archive of the installation root.
pub struct FilesystemBackup {
    descriptor: BackupDescriptor,
    delivery: Delivery,
    codec: Box<dyn ArchiveCodec>,
    transport: Option<Box<dyn RemoteTransport>>,
    outcome: Option<OperationOutcome>,
}

impl FilesystemBackup {
    pub fn new(descriptor: BackupDescriptor, delivery: Delivery) -> Self {
        Self { descriptor, delivery, codec: Box::new(TarCodec), transport: None, outcome: None }
    }

    pub fn with_codec(mut self, codec: Box<dyn ArchiveCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use this transport for the next remote rollback instead of one built
    /// from the connection string.
    pub fn with_transport(mut self, transport: Box<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn descriptor_mut(&mut self) -> &mut BackupDescriptor {
        &mut self.descriptor
    }

    fn archive_tree(&self, path: &Path) -> Result<()> {
        let root = self.descriptor.root_dir();
        let ignore = self.descriptor.effective_ignore();

        let info = tree_info(root, &ignore, ProbeFlags::READABLE);
        if !info.readable {
            return Err(BackupError::permissions(
                "not enough permissions to read files for backup",
                info.offenders.first().cloned(),
            ));
        }

        self.codec.pack(root, &ignore, path)?;

        match fs::metadata(path) {
            Ok(md) if md.is_file() && md.len() > 0 => Ok(()),
            _ => Err(BackupError::Archive(format!("failed to create backup {}", path.display()))),
        }
    }
}

impl Backup for FilesystemBackup {
    fn descriptor(&self) -> &BackupDescriptor {
        &self.descriptor
    }

    fn type_tag(&self) -> &'static str {
        "filesystem"
    }

    fn create(&mut self, scope: &ExecutionScope) -> Result<()> {
        self.outcome = None;
        let path = self.descriptor.backup_path();
        let _span = info_span!("fs_create", root = %self.descriptor.root_dir().display(), file = %path.display()).entered();

        ensure_dir(self.descriptor.backups_dir())?;
        scope.checkpoint("archive");

        if let Err(err) = self.archive_tree(&path) {
            remove_quietly(&path);
            self.outcome = Some(OperationOutcome::FailedCleanedUp);
            return Err(err);
        }

        info!("filesystem archive written");
        self.outcome = Some(OperationOutcome::Succeeded);
        Ok(())
    }

    fn rollback(&mut self, scope: &ExecutionScope) -> Result<()> {
        self.outcome = None;
        let _span = info_span!("fs_rollback", file = %self.descriptor.backup_path().display()).entered();

        let transport = self.transport.take();
        let mut worker = select_worker(&self.descriptor, &self.delivery, self.codec.as_ref(), transport);
        info!(worker = worker.name(), "restoring files");
        let result = worker.run(scope);
        drop(worker);

        self.outcome = Some(match &result {
            Ok(()) => OperationOutcome::Succeeded,
            Err(_) => OperationOutcome::FailedCleanupSkipped,
        });
        result
    }

    fn size_bytes(&self) -> Result<u64> {
        let info = tree_info(self.descriptor.root_dir(), &self.descriptor.effective_ignore(), ProbeFlags::SIZE);
        Ok(info.size)
    }

    fn outcome(&self) -> Option<OperationOutcome> {
        self.outcome
    }
}
