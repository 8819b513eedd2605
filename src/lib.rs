//! Backup and rollback of an installation: a database dump, a filesystem
//! archive, or both as one snapshot. File rollback can restore in place or
//! upload to a remote copy of the installation.

pub mod archive;
pub mod backup;
pub mod config;
pub mod drivers;
pub mod errors;
pub mod logging;
pub mod rollback;
pub mod storage;
pub mod transport;
pub mod utils;

pub use backup::{Backup, BackupDescriptor, BackupKind, ExecutionScope, OperationOutcome};
pub use errors::{BackupError, Result};
