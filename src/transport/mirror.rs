use std::fs;
use std::path::{Path, PathBuf};

use super::RemoteTransport;
use crate::errors::{BackupError, IoContext, Result};

/// Remote installation reachable as a mounted directory (`file:///srv/site`).
#[derive(Debug, Default)]
pub struct MirrorTransport {
    base: Option<PathBuf>,
}

impl MirrorTransport {
    fn local(&self, remote: &str) -> Result<PathBuf> {
        let base = self.base.as_ref().ok_or_else(|| BackupError::Transport("mirror is not connected".into()))?;
        Ok(base.join(remote.trim_start_matches('/')))
    }
}

impl RemoteTransport for MirrorTransport {
    fn name(&self) -> &'static str { "mirror" }

    fn connect(&mut self, connection: &str) -> Result<()> {
        let path = connection
            .strip_prefix("file://")
            .ok_or_else(|| BackupError::Transport(format!("not a file:// connection: {connection}")))?;
        let base = PathBuf::from(path);
        if !base.is_dir() {
            return Err(BackupError::Transport(format!("{} is not a directory", base.display())));
        }
        self.base = Some(base);
        Ok(())
    }

    fn file_exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.local(path)?.exists())
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let target = self.local(path)?;
        let md = fs::symlink_metadata(&target).at(&target)?;
        if md.is_dir() {
            fs::remove_dir(&target).at(&target)
        } else {
            fs::remove_file(&target).at(&target)
        }
    }

    fn mkdir_recursive(&mut self, path: &str) -> Result<()> {
        let target = self.local(path)?;
        fs::create_dir_all(&target).at(&target)
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<bool> {
        let target = self.local(remote)?;
        Ok(fs::copy(local, &target).is_ok())
    }
}
