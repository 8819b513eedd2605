use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, info_span};

use super::{Backup, BackupDescriptor, ExecutionScope, OperationOutcome, check_archive};
use crate::archive::{ArchiveCodec, ArchiveFormat, TarCodec};
use crate::drivers::DataStore;
use crate::drivers::statements::StatementStream;
use crate::errors::{IoContext, Result};
use crate::utils::io::{ensure_dir, remove_quietly};

/// Database backup: a SQL dump of one data store.
pub struct DatabaseBackup {
    descriptor: BackupDescriptor,
    store: Box<dyn DataStore>,
    codec: Box<dyn ArchiveCodec>,
    outcome: Option<OperationOutcome>,
}

impl DatabaseBackup {
    pub fn new(descriptor: BackupDescriptor, store: Box<dyn DataStore>) -> Self {
        Self { descriptor, store, codec: Box::new(TarCodec), outcome: None }
    }

    pub fn with_codec(mut self, codec: Box<dyn ArchiveCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn descriptor_mut(&mut self) -> &mut BackupDescriptor {
        &mut self.descriptor
    }

    fn write_dump(&self, path: &Path) -> Result<()> {
        let out = BufWriter::new(File::create(path).at(path)?);
        if ArchiveFormat::detect(path) == ArchiveFormat::Gz {
            let mut gz = GzEncoder::new(out, Compression::default());
            self.store.dump(&mut gz)?;
            gz.finish().at(path)?.flush().at(path)
        } else {
            let mut out = out;
            self.store.dump(&mut out)?;
            out.flush().at(path)
        }
    }

    fn replay(&self, source: &Path, scope: &ExecutionScope) -> Result<usize> {
        let mut count = 0usize;
        for statement in StatementStream::open(source)? {
            self.store.execute_statement(&statement?)?;
            count += 1;
            if count % 1000 == 0 {
                debug!(statements = count, "replay progress");
                scope.checkpoint("replay");
            }
        }
        Ok(count)
    }
}

impl Backup for DatabaseBackup {
    fn descriptor(&self) -> &BackupDescriptor {
        &self.descriptor
    }

    fn type_tag(&self) -> &'static str {
        "db"
    }

    fn create(&mut self, scope: &ExecutionScope) -> Result<()> {
        self.outcome = None;
        let path = self.descriptor.backup_path();
        let _span = info_span!("db_create", store = self.store.name(), file = %path.display()).entered();

        ensure_dir(self.descriptor.backups_dir())?;
        scope.checkpoint("dump");

        if let Err(err) = self.write_dump(&path) {
            remove_quietly(&path);
            self.outcome = Some(OperationOutcome::FailedCleanedUp);
            return Err(err);
        }

        info!("database dump written");
        self.outcome = Some(OperationOutcome::Succeeded);
        Ok(())
    }

    fn rollback(&mut self, scope: &ExecutionScope) -> Result<()> {
        self.outcome = None;
        let path = self.descriptor.backup_path();
        let _span = info_span!("db_rollback", store = self.store.name(), file = %path.display()).entered();

        if let Err(err) = check_archive(&path) {
            self.outcome = Some(OperationOutcome::FailedCleanupSkipped);
            return Err(err);
        }

        scope.checkpoint("unpack");
        let source = match self.codec.unpack(&path, self.descriptor.backups_dir()) {
            Ok(source) => source,
            Err(err) => {
                self.outcome = Some(OperationOutcome::FailedCleanupSkipped);
                return Err(err);
            }
        };
        let intermediate = source != path;

        let replayed = self.replay(&source, scope);

        let cleaned = intermediate && !self.descriptor.keep_source();
        if cleaned {
            remove_quietly(&source);
        }

        match replayed {
            Ok(count) => {
                info!(statements = count, "database restored");
                self.outcome = Some(OperationOutcome::Succeeded);
                Ok(())
            }
            Err(err) => {
                self.outcome = Some(OperationOutcome::failed(cleaned));
                Err(err)
            }
        }
    }

    fn size_bytes(&self) -> Result<u64> {
        self.store.size_bytes()
    }

    fn outcome(&self) -> Option<OperationOutcome> {
        self.outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::BackupKind;
    use crate::errors::BackupError;
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;
    use tempfile::TempDir;

    /// In-memory store that records executed statements.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub dump_sql: String,
        pub executed: Rc<RefCell<Vec<String>>>,
        pub fail_dump: bool,
        pub fail_on: Option<String>,
        pub dumps: Rc<Cell<usize>>,
        /// Panic inside the next dump or statement, leaving the unit mid-operation.
        pub interrupt: Rc<Cell<bool>>,
    }

    impl MemoryStore {
        pub fn with_dump(sql: &str) -> Self {
            Self { dump_sql: sql.to_string(), ..Self::default() }
        }
    }

    impl DataStore for MemoryStore {
        fn name(&self) -> &'static str { "memory" }

        fn dump(&self, out: &mut dyn Write) -> Result<()> {
            self.dumps.set(self.dumps.get() + 1);
            if self.interrupt.get() {
                panic!("store interrupted during dump");
            }
            out.write_all(self.dump_sql.as_bytes()).map_err(|e| BackupError::DataStore(e.to_string()))?;
            if self.fail_dump {
                return Err(BackupError::DataStore("dump interrupted".into()));
            }
            Ok(())
        }

        fn execute_statement(&self, sql: &str) -> Result<()> {
            if self.interrupt.get() {
                panic!("store interrupted during replay");
            }
            if self.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
                return Err(BackupError::DataStore(format!("cannot run {sql}")));
            }
            self.executed.borrow_mut().push(sql.to_string());
            Ok(())
        }

        fn size_bytes(&self) -> Result<u64> {
            Ok(self.dump_sql.len() as u64)
        }
    }

    fn unit(tmp: &TempDir, store: MemoryStore, extension: &str) -> DatabaseBackup {
        let mut d = BackupDescriptor::new(BackupKind::Database, tmp.path(), tmp.path().join("backups"));
        d.set_name("db").set_time(100).set_extension(extension);
        DatabaseBackup::new(d, Box::new(store))
    }

    const DUMP: &str = "CREATE TABLE t(x);\nINSERT INTO t\nVALUES(1);\n";

    #[test]
    fn create_then_rollback_replays_every_statement() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::with_dump(DUMP);
        let executed = store.executed.clone();
        let mut db = unit(&tmp, store, "sql.gz");
        let scope = ExecutionScope::uninterruptible("test");

        db.create(&scope).unwrap();
        assert!(db.last_operation_succeeded());
        assert!(db.backup_path().ends_with("backups/db_100.sql.gz"));
        assert!(db.backup_path().is_file());

        db.rollback(&scope).unwrap();
        assert!(db.last_operation_succeeded());
        assert_eq!(*executed.borrow(), vec!["CREATE TABLE t(x);".to_string(), "INSERT INTO t\nVALUES(1);".to_string()]);
        assert!(!tmp.path().join("backups/db_100.sql").exists(), "intermediate dump should be removed");
        assert!(db.backup_path().exists(), "the artifact itself stays");
    }

    #[test]
    fn keep_source_retains_the_decompressed_dump() {
        let tmp = TempDir::new().unwrap();
        let mut db = unit(&tmp, MemoryStore::with_dump(DUMP), "sql.gz");
        db.descriptor_mut().set_keep_source(true);
        let scope = ExecutionScope::uninterruptible("test");
        db.create(&scope).unwrap();
        db.rollback(&scope).unwrap();
        assert!(tmp.path().join("backups/db_100.sql").exists());
    }

    #[test]
    fn plain_dump_is_replayed_in_place() {
        let tmp = TempDir::new().unwrap();
        let mut db = unit(&tmp, MemoryStore::with_dump(DUMP), "sql");
        let scope = ExecutionScope::uninterruptible("test");
        db.create(&scope).unwrap();
        assert_eq!(fs::read_to_string(db.backup_path()).unwrap(), DUMP);
        db.rollback(&scope).unwrap();
        assert!(db.backup_path().exists());
    }

    #[test]
    fn failed_dump_leaves_no_artifact() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore { fail_dump: true, ..MemoryStore::with_dump(DUMP) };
        let mut db = unit(&tmp, store, "sql.gz");

        let err = db.create(&ExecutionScope::uninterruptible("test")).unwrap_err();
        assert!(matches!(err, BackupError::DataStore(_)));
        assert!(!db.last_operation_succeeded());
        assert_eq!(db.outcome(), Some(OperationOutcome::FailedCleanedUp));
        assert!(!db.backup_path().exists());
    }

    #[test]
    fn rollback_without_artifact_cannot_load() {
        let tmp = TempDir::new().unwrap();
        let mut db = unit(&tmp, MemoryStore::with_dump(DUMP), "sql.gz");
        let err = db.rollback(&ExecutionScope::uninterruptible("test")).unwrap_err();
        assert!(matches!(err, BackupError::CantLoadSnapshot(_)));
    }

    #[test]
    fn failed_statement_stops_replay_and_clears_flag() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore { fail_on: Some("INSERT".into()), ..MemoryStore::with_dump(DUMP) };
        let executed = store.executed.clone();
        let mut db = unit(&tmp, store, "sql.gz");
        let scope = ExecutionScope::uninterruptible("test");
        db.create(&scope).unwrap();
        assert!(db.last_operation_succeeded());

        let err = db.rollback(&scope).unwrap_err();
        assert!(matches!(err, BackupError::DataStore(_)));
        assert!(!db.last_operation_succeeded());
        assert_eq!(executed.borrow().len(), 1);
        assert!(!tmp.path().join("backups/db_100.sql").exists());
    }

    #[test]
    fn flag_is_cleared_while_an_operation_runs() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::with_dump(DUMP);
        let interrupt = store.interrupt.clone();
        let mut db = unit(&tmp, store, "sql");
        let scope = ExecutionScope::uninterruptible("test");

        db.create(&scope).unwrap();
        assert!(db.last_operation_succeeded());

        interrupt.set(true);
        assert!(catch_unwind(AssertUnwindSafe(|| db.create(&scope))).is_err());
        assert_eq!(db.outcome(), None);
        assert!(!db.last_operation_succeeded());

        interrupt.set(false);
        db.create(&scope).unwrap();
        assert!(db.last_operation_succeeded());

        interrupt.set(true);
        assert!(catch_unwind(AssertUnwindSafe(|| db.rollback(&scope))).is_err());
        assert_eq!(db.outcome(), None);
        assert!(!db.last_operation_succeeded());
    }

    #[test]
    fn size_comes_from_the_store() {
        let tmp = TempDir::new().unwrap();
        let db = unit(&tmp, MemoryStore::with_dump(DUMP), "sql");
        assert_eq!(db.size_bytes().unwrap(), DUMP.len() as u64);
        assert_eq!(db.type_tag(), "db");
    }
}
