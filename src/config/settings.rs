use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backup::{Backup, BackupDescriptor, BackupKind, DatabaseBackup, FilesystemBackup, SnapshotCoordinator};
use crate::drivers::selector::open_data_store;
use crate::errors::{BackupError, Result};
use crate::rollback::{Delivery, RemoteTarget};
use crate::storage::ArtifactName;
use crate::utils::io::IgnorePaths;

pub const SETTINGS_FILE: &str = ".snapback.json";

/// On-disk settings. Every field is optional; CLI flags override them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub root_dir: Option<PathBuf>,
    /// Relative paths are taken from the root. Default `var/backups`.
    pub backups_dir: Option<PathBuf>,
    /// Where a snapshot's database dump is written before archiving. Default `var`.
    pub staging_dir: Option<PathBuf>,
    pub name: Option<String>,
    pub ignore_paths: Vec<PathBuf>,
    pub keep_source: bool,
    /// `sql.gz`/`tgz` when true (default), `sql`/`tar` otherwise.
    pub compress: Option<bool>,
    pub data_store: Option<String>,
    pub remote: Option<RemoteTarget>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| BackupError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Explicit file if given, else `<root>/.snapback.json` when present, else defaults.
    pub fn discover(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = root.join(SETTINGS_FILE);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "loading settings");
            return Self::load(&candidate);
        }
        Ok(Self::default())
    }

    /// Fields set in `overrides` win; ignore paths are combined.
    pub fn merge(mut self, overrides: Settings) -> Settings {
        if overrides.root_dir.is_some() {
            self.root_dir = overrides.root_dir;
        }
        if overrides.backups_dir.is_some() {
            self.backups_dir = overrides.backups_dir;
        }
        if overrides.staging_dir.is_some() {
            self.staging_dir = overrides.staging_dir;
        }
        if overrides.name.is_some() {
            self.name = overrides.name;
        }
        if overrides.compress.is_some() {
            self.compress = overrides.compress;
        }
        if overrides.data_store.is_some() {
            self.data_store = overrides.data_store;
        }
        if overrides.remote.is_some() {
            self.remote = overrides.remote;
        }
        self.keep_source |= overrides.keep_source;
        self.ignore_paths.extend(overrides.ignore_paths);
        self
    }

    pub fn resolve(&self) -> Result<ResolvedSettings> {
        let root = match &self.root_dir {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(|e| BackupError::io(".", e))?,
        };
        let root_dir = root
            .canonicalize()
            .map_err(|e| BackupError::Config(format!("installation root {}: {}", root.display(), e)))?;

        let under_root = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { root_dir.join(p) };
        let backups_dir = under_root(self.backups_dir.as_deref().unwrap_or(Path::new("var/backups")));
        let staging_dir = under_root(self.staging_dir.as_deref().unwrap_or(Path::new("var")));

        Ok(ResolvedSettings {
            ignore: IgnorePaths::resolve(&root_dir, &self.ignore_paths),
            root_dir,
            backups_dir,
            staging_dir,
            name: self.name.clone(),
            keep_source: self.keep_source,
            compress: self.compress.unwrap_or(true),
            data_store: self.data_store.clone(),
            delivery: match &self.remote {
                Some(target) => Delivery::Remote(target.clone()),
                None => Delivery::Local,
            },
        })
    }
}

/// Settings with every path made absolute.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub root_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub name: Option<String>,
    pub ignore: IgnorePaths,
    pub keep_source: bool,
    pub compress: bool,
    pub data_store: Option<String>,
    pub delivery: Delivery,
}

impl ResolvedSettings {
    /// Descriptor for a new backup, or for an existing artifact when given.
    pub fn descriptor(&self, kind: BackupKind, artifact: Option<&ArtifactName>) -> BackupDescriptor {
        let mut d = BackupDescriptor::new(kind, &self.root_dir, &self.backups_dir);
        d.set_ignore_paths(self.ignore.clone())
            .set_keep_source(self.keep_source)
            .set_extension(kind.default_extension(self.compress));
        if let Some(name) = &self.name {
            d.set_name(name.clone());
        }
        if let Some(a) = artifact {
            d.set_name(a.name.clone()).set_time(a.time).set_extension(a.extension.clone());
        }
        d
    }

    fn data_store_target(&self) -> Result<&str> {
        self.data_store
            .as_deref()
            .ok_or_else(|| BackupError::Config("no data store configured (use --db or \"data_store\")".into()))
    }

    /// Build the backup unit for `kind`.
    pub fn backup(&self, kind: BackupKind, artifact: Option<&ArtifactName>) -> Result<Box<dyn Backup>> {
        let descriptor = self.descriptor(kind, artifact);
        Ok(match kind {
            BackupKind::Database => {
                Box::new(DatabaseBackup::new(descriptor, open_data_store(self.data_store_target()?)?))
            }
            BackupKind::Filesystem => Box::new(FilesystemBackup::new(descriptor, self.delivery.clone())),
            BackupKind::Snapshot => {
                let store = open_data_store(self.data_store_target()?)?;
                Box::new(SnapshotCoordinator::new(descriptor, &self.staging_dir, self.delivery.clone(), store))
            }
        })
    }
}
