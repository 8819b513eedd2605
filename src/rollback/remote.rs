use std::path::Path;

use tracing::{debug, info};

use super::{RemoteTarget, RollbackWorker};
use crate::archive::ArchiveCodec;
use crate::backup::{BackupDescriptor, ExecutionScope, check_archive};
use crate::errors::{BackupError, Result};
use crate::storage::{tmp_dir_for, validation_file_for};
use crate::transport::{self, RemoteTransport, remote_path};
use crate::utils::io::{IgnorePaths, ScopedPath, walk_children_first, walk_parents_first};

/// Restores an archive onto a remote copy of the installation.
///
/// The remote root must serve the same tree as the local root; this is
/// checked with a probe file before anything remote is deleted.
pub struct RemoteRollback<'a> {
    descriptor: &'a BackupDescriptor,
    target: &'a RemoteTarget,
    remote_root: String,
    codec: &'a dyn ArchiveCodec,
    transport: Option<Box<dyn RemoteTransport>>,
}

impl<'a> RemoteRollback<'a> {
    pub fn new(
        descriptor: &'a BackupDescriptor,
        target: &'a RemoteTarget,
        codec: &'a dyn ArchiveCodec,
        transport: Option<Box<dyn RemoteTransport>>,
    ) -> Self {
        let remote_root = if target.path.is_empty() {
            transport::root_from_connection(&target.connection)
        } else {
            target.path.clone()
        };
        Self { descriptor, target, remote_root, codec, transport }
    }

    fn connect(&mut self) -> Result<Box<dyn RemoteTransport>> {
        let mut client = match self.transport.take() {
            Some(client) => client,
            None => transport::for_connection(&self.target.connection)
                .map_err(|e| BackupError::FtpConnectionFailed(e.to_string()))?,
        };
        client
            .connect(&self.target.connection)
            .map_err(|e| BackupError::FtpConnectionFailed(e.to_string()))?;
        Ok(client)
    }

    fn validate(&self, client: &mut dyn RemoteTransport) -> Result<()> {
        let probe_path = validation_file_for(self.descriptor.backups_dir());
        let probe = ScopedPath::create_file(probe_path)
            .map_err(|e| BackupError::FtpValidationFailed(format!("unable to write validation file: {e}")))?;

        let rel = probe.path().strip_prefix(self.descriptor.root_dir()).map_err(|_| {
            BackupError::FtpValidationFailed(format!(
                "backups directory {} is outside the installation root",
                self.descriptor.backups_dir().display()
            ))
        })?;
        let remote = remote_path(&self.remote_root, rel);
        let found = client.file_exists(&remote).unwrap_or(false);
        drop(probe);

        if !found {
            return Err(BackupError::FtpValidationFailed(format!("{remote} not found on the remote side")));
        }
        debug!(remote, "remote root validated");
        Ok(())
    }

    fn cleanup_remote(&self, client: &mut dyn RemoteTransport, ignore: &IgnorePaths) {
        let root = self.descriptor.root_dir();
        for entry in walk_children_first(root, ignore) {
            let Ok(rel) = entry.path().strip_prefix(root) else { continue };
            let remote = remote_path(&self.remote_root, rel);
            if let Err(err) = client.delete(&remote) {
                debug!(remote, error = %err, "remote delete skipped");
            }
        }
    }

    fn upload(&self, client: &mut dyn RemoteTransport, from: &Path) -> Result<()> {
        let none = IgnorePaths::new();
        for entry in walk_parents_first(from, &none) {
            let entry = entry.map_err(|e| BackupError::Archive(format!("cannot read unpacked tree: {e}")))?;
            let ft = entry.file_type();
            if ft.is_symlink() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(from) else { continue };
            let remote = remote_path(&self.remote_root, rel);

            if ft.is_dir() {
                client.mkdir_recursive(&remote)?;
            } else if !client.put(entry.path(), &remote)? {
                return Err(BackupError::permissions(
                    format!("failed to upload file {} to ftp", entry.path().display()),
                    Some(entry.path().to_path_buf()),
                ));
            }
        }
        Ok(())
    }
}

impl RollbackWorker for RemoteRollback<'_> {
    fn name(&self) -> &'static str { "remote" }

    fn run(&mut self, scope: &ExecutionScope) -> Result<()> {
        let archive = self.descriptor.backup_path();
        check_archive(&archive)?;

        let mut client = self.connect()?;
        self.validate(client.as_mut())?;

        let mut tmp = ScopedPath::create_dir(tmp_dir_for(self.descriptor.backups_dir()))?;
        scope.checkpoint("unpack");
        self.codec.unpack(&archive, tmp.path())?;

        scope.checkpoint("remote cleanup");
        self.cleanup_remote(client.as_mut(), &self.descriptor.effective_ignore());

        scope.checkpoint("upload");
        self.upload(client.as_mut(), tmp.path())?;

        tmp.keep(self.descriptor.keep_source());
        info!(archive = %archive.display(), remote = %self.remote_root, via = client.name(), "files restored remotely");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TarCodec;
    use crate::backup::BackupKind;
    use crate::transport::MirrorTransport;
    use std::cell::RefCell;
    use std::fs;
    use std::path::PathBuf;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        deleted: Vec<String>,
        created: Vec<String>,
        uploaded: Vec<String>,
    }

    /// Transport that answers from a fixed script and records calls.
    struct ScriptedTransport {
        exists: bool,
        refuse: Option<String>,
        fail_connect: bool,
        calls: Rc<RefCell<Calls>>,
    }

    impl ScriptedTransport {
        fn new(exists: bool) -> (Self, Rc<RefCell<Calls>>) {
            let calls = Rc::new(RefCell::new(Calls::default()));
            (Self { exists, refuse: None, fail_connect: false, calls: calls.clone() }, calls)
        }
    }

    impl RemoteTransport for ScriptedTransport {
        fn name(&self) -> &'static str { "scripted" }

        fn connect(&mut self, _connection: &str) -> Result<()> {
            if self.fail_connect {
                return Err(BackupError::Transport("530 login incorrect".into()));
            }
            Ok(())
        }

        fn file_exists(&mut self, _path: &str) -> Result<bool> {
            Ok(self.exists)
        }

        fn delete(&mut self, path: &str) -> Result<()> {
            self.calls.borrow_mut().deleted.push(path.to_string());
            Ok(())
        }

        fn mkdir_recursive(&mut self, path: &str) -> Result<()> {
            self.calls.borrow_mut().created.push(path.to_string());
            Ok(())
        }

        fn put(&mut self, _local: &Path, remote: &str) -> Result<bool> {
            if self.refuse.as_deref() == Some(remote) {
                return Ok(false);
            }
            self.calls.borrow_mut().uploaded.push(remote.to_string());
            Ok(true)
        }
    }

    struct Site {
        _tmp: TempDir,
        root: PathBuf,
        descriptor: BackupDescriptor,
    }

    fn site() -> Site {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("site");
        fs::create_dir_all(root.join("app/etc")).unwrap();
        fs::write(root.join("index.php"), "v1").unwrap();
        fs::write(root.join("app/etc/env.php"), "env").unwrap();

        let backups = root.join("var/backups");
        fs::create_dir_all(&backups).unwrap();
        let mut descriptor = BackupDescriptor::new(BackupKind::Filesystem, &root, &backups);
        descriptor.set_name("site").set_time(9);
        TarCodec.pack(&root, &descriptor.effective_ignore(), &descriptor.backup_path()).unwrap();
        Site { _tmp: tmp, root, descriptor }
    }

    fn leftovers(backups: &Path) -> Vec<String> {
        fs::read_dir(backups)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('~'))
            .collect()
    }

    fn target(path: &str) -> RemoteTarget {
        RemoteTarget { connection: "ftp://u:p@example".into(), path: path.into() }
    }

    #[test]
    fn validation_failure_touches_nothing_remote() {
        let s = site();
        let (transport, calls) = ScriptedTransport::new(false);
        let t = target("/public_html");

        let err = RemoteRollback::new(&s.descriptor, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap_err();

        assert!(matches!(err, BackupError::FtpValidationFailed(_)));
        assert!(calls.borrow().deleted.is_empty());
        assert!(calls.borrow().uploaded.is_empty());
        assert!(leftovers(s.descriptor.backups_dir()).is_empty(), "probe and temp dir must be gone");
    }

    #[test]
    fn connection_failure_is_reported_as_such() {
        let s = site();
        let (mut transport, calls) = ScriptedTransport::new(true);
        transport.fail_connect = true;
        let t = target("/");

        let err = RemoteRollback::new(&s.descriptor, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap_err();
        assert!(matches!(err, BackupError::FtpConnectionFailed(_)));
        assert!(calls.borrow().deleted.is_empty());
    }

    #[test]
    fn cleans_children_first_then_uploads_parents_first() {
        let s = site();
        let (transport, calls) = ScriptedTransport::new(true);
        let t = target("/public_html");

        RemoteRollback::new(&s.descriptor, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap();

        let calls = calls.borrow();
        let pos = |list: &Vec<String>, p: &str| list.iter().position(|x| x == p).unwrap();
        assert!(pos(&calls.deleted, "/public_html/app/etc/env.php") < pos(&calls.deleted, "/public_html/app/etc"));
        assert!(pos(&calls.deleted, "/public_html/app/etc") < pos(&calls.deleted, "/public_html/app"));
        assert!(!calls.deleted.iter().any(|p| p.starts_with("/public_html/var/backups")));

        assert!(calls.created.contains(&"/public_html/app/etc".to_string()));
        assert_eq!(calls.uploaded, vec!["/public_html/app/etc/env.php".to_string(), "/public_html/index.php".to_string()]);
        assert!(leftovers(s.descriptor.backups_dir()).is_empty());
    }

    #[test]
    fn cleanup_reaches_siblings_of_the_backups_dir() {
        let s = site();
        fs::write(s.root.join("var/a.log"), "a").unwrap();
        fs::write(s.root.join("var/stale.log"), "x").unwrap();
        let (transport, calls) = ScriptedTransport::new(true);
        let t = target("/public_html");

        RemoteRollback::new(&s.descriptor, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap();

        let deleted = &calls.borrow().deleted;
        assert!(deleted.contains(&"/public_html/var/a.log".to_string()));
        assert!(deleted.contains(&"/public_html/var/stale.log".to_string()));
        assert!(deleted.contains(&"/public_html/index.php".to_string()));
    }

    #[test]
    fn connection_path_is_the_root_when_none_is_given() {
        let s = site();
        let (transport, calls) = ScriptedTransport::new(true);
        let t = RemoteTarget { connection: "ftp://u:p@example/public_html".into(), path: String::new() };

        RemoteRollback::new(&s.descriptor, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap();

        assert_eq!(
            calls.borrow().uploaded,
            vec!["/public_html/app/etc/env.php".to_string(), "/public_html/index.php".to_string()]
        );
    }

    #[test]
    fn refused_upload_names_the_file() {
        let s = site();
        let (mut transport, _calls) = ScriptedTransport::new(true);
        transport.refuse = Some("/index.php".into());
        let t = target("");

        let err = RemoteRollback::new(&s.descriptor, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap_err();
        match err {
            BackupError::NotEnoughPermissions { message, path } => {
                assert!(message.contains("index.php"));
                assert!(path.unwrap().ends_with("index.php"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(leftovers(s.descriptor.backups_dir()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_uploaded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("site");
        fs::create_dir_all(root.join("var/backups")).unwrap();
        fs::write(root.join("real.txt"), "r").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();
        let mut d = BackupDescriptor::new(BackupKind::Filesystem, &root, root.join("var/backups"));
        d.set_time(3);
        TarCodec.pack(&root, &d.effective_ignore(), &d.backup_path()).unwrap();

        let (transport, calls) = ScriptedTransport::new(true);
        let t = target("/r");
        RemoteRollback::new(&d, &t, &TarCodec, Some(Box::new(transport)))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap();
        assert_eq!(calls.borrow().uploaded, vec!["/r/real.txt".to_string()]);
    }

    #[test]
    fn mirror_of_the_root_is_restored_end_to_end() {
        let s = site();
        fs::write(s.root.join("index.php"), "v2").unwrap();
        fs::write(s.root.join("stale.txt"), "x").unwrap();
        fs::write(s.root.join("var/stale.log"), "x").unwrap();

        let t = RemoteTarget { connection: format!("file://{}", s.root.display()), path: String::new() };
        let mut d = s.descriptor.clone();
        d.set_keep_source(false);
        RemoteRollback::new(&d, &t, &TarCodec, Some(Box::new(MirrorTransport::default())))
            .run(&ExecutionScope::uninterruptible("test"))
            .unwrap();

        assert_eq!(fs::read_to_string(s.root.join("index.php")).unwrap(), "v1");
        assert!(!s.root.join("stale.txt").exists());
        assert!(!s.root.join("var/stale.log").exists());
        assert!(s.descriptor.backup_path().exists());
        assert!(leftovers(s.descriptor.backups_dir()).is_empty());
    }
}
