use tracing::{info, warn};

use super::RollbackWorker;
use crate::archive::ArchiveCodec;
use crate::backup::{BackupDescriptor, ExecutionScope, check_archive};
use crate::errors::{BackupError, Result};
use crate::utils::io::clean_dir_except;
use crate::utils::probe::{ProbeFlags, tree_info};

/// Restores an archive straight onto the local installation root.
///
/// The root is emptied before unpacking; if unpacking then fails the tree is
/// left empty.
pub struct LocalRollback<'a> {
    descriptor: &'a BackupDescriptor,
    codec: &'a dyn ArchiveCodec,
}

impl<'a> LocalRollback<'a> {
    pub fn new(descriptor: &'a BackupDescriptor, codec: &'a dyn ArchiveCodec) -> Self {
        Self { descriptor, codec }
    }
}

impl RollbackWorker for LocalRollback<'_> {
    fn name(&self) -> &'static str { "local" }

    fn run(&mut self, scope: &ExecutionScope) -> Result<()> {
        let archive = self.descriptor.backup_path();
        let root = self.descriptor.root_dir();
        let ignore = self.descriptor.effective_ignore();

        check_archive(&archive)?;

        let info = tree_info(root, &ignore, ProbeFlags::WRITABLE);
        if !info.writable {
            return Err(BackupError::permissions(
                "unable to make rollback because not all files are writable",
                info.offenders.first().cloned(),
            ));
        }

        scope.checkpoint("clean");
        if self.descriptor.keep_source() {
            warn!(root = %root.display(), "keeping existing files; archive is unpacked over them");
        } else {
            clean_dir_except(root, &ignore)?;
        }

        scope.checkpoint("unpack");
        self.codec.unpack(&archive, root)?;
        info!(archive = %archive.display(), root = %root.display(), "files restored");
        Ok(())
    }
}
