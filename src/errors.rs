use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    /// The source archive is missing or cannot be read.
    #[error("can't load snapshot archive {}", .0.display())]
    CantLoadSnapshot(PathBuf),

    /// The target tree is not fully writable/readable, or a remote write failed.
    #[error("not enough permissions: {message}")]
    NotEnoughPermissions {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("ftp connection failed: {0}")]
    FtpConnectionFailed(String),

    #[error("failed to validate ftp account: {0}")]
    FtpValidationFailed(String),

    #[error("data store error: {0}")]
    DataStore(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BackupError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        BackupError::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn permissions(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        BackupError::NotEnoughPermissions { message: message.into(), path }
    }

    /// Offending path carried by permission failures, if any.
    pub fn offending_path(&self) -> Option<&Path> {
        match self {
            BackupError::NotEnoughPermissions { path, .. } => path.as_deref(),
            BackupError::CantLoadSnapshot(path) | BackupError::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        BackupError::DataStore(err.to_string())
    }
}

/// Extension for attaching the path to bare `io::Result`s.
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| BackupError::io(path, e))
    }
}
