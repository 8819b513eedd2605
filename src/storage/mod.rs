use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

use crate::backup::BackupKind;
use crate::errors::{IoContext, Result};

/// `<name>_<time>.<extension>`
pub fn backup_filename(name: &str, time: i64, extension: &str) -> String {
    format!("{}_{}.{}", sanitize(name), time, extension)
}

/// Parsed form of an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub name: String,
    pub time: i64,
    pub extension: String,
}

impl ArtifactName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, extension) = split_extension(file_name)?;
        let (name, time) = stem.rsplit_once('_')?;
        if name.is_empty() {
            return None;
        }
        let time = time.parse::<i64>().ok()?;
        Some(Self { name: name.to_string(), time, extension: extension.to_string() })
    }

    /// Artifacts do not record whether a tree archive came from a plain filesystem
    /// backup or a snapshot; both report `Filesystem`.
    pub fn kind(&self) -> BackupKind {
        if self.extension.starts_with("sql") { BackupKind::Database } else { BackupKind::Filesystem }
    }

    pub fn created_at(&self) -> Option<DateTime<Local>> {
        Local.timestamp_opt(self.time, 0).single()
    }
}

const EXTENSIONS: &[&str] = &["sql.gz", "sql", "tar.gz", "tgz", "tar"];

fn split_extension(file_name: &str) -> Option<(&str, &str)> {
    EXTENSIONS.iter().find_map(|ext| {
        let stem = file_name.strip_suffix(ext)?.strip_suffix('.')?;
        Some((stem, &file_name[stem.len() + 1..]))
    })
}

#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub path: PathBuf,
    pub artifact: ArtifactName,
    pub size: u64,
}

/// Artifacts found directly inside `backups_dir`, oldest first.
pub fn list_artifacts(backups_dir: &Path) -> Result<Vec<ArtifactEntry>> {
    if !backups_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(backups_dir).at(backups_dir)? {
        let entry = entry.at(backups_dir)?;
        let path = entry.path();
        let Some(artifact) = path.file_name().and_then(|n| n.to_str()).and_then(ArtifactName::parse) else {
            continue;
        };
        let md = entry.metadata().at(&path)?;
        if !md.is_file() {
            continue;
        }
        out.push(ArtifactEntry { path, artifact, size: md.len() });
    }
    out.sort_by(|a, b| a.artifact.time.cmp(&b.artifact.time).then_with(|| a.artifact.name.cmp(&b.artifact.name)));
    Ok(out)
}

/// Microsecond suffix for throwaway names.
pub fn micro_stamp() -> String {
    let now = Local::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

pub fn tmp_dir_for(backups_dir: &Path) -> PathBuf {
    backups_dir.join(format!("~tmp-{}", micro_stamp()))
}

pub fn validation_file_for(backups_dir: &Path) -> PathBuf {
    backups_dir.join(format!("~validation-{}.tmp", micro_stamp()))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn filename_is_name_underscore_time() {
        assert_eq!(backup_filename("nightly", 1700000000, "tgz"), "nightly_1700000000.tgz");
        assert_eq!(backup_filename("pre deploy/1", 5, "sql.gz"), "pre_deploy_1_5.sql.gz");
    }

    #[test]
    fn parses_names_containing_underscores() {
        let a = ArtifactName::parse("pre_deploy_1700000000.sql.gz").unwrap();
        assert_eq!(a.name, "pre_deploy");
        assert_eq!(a.time, 1700000000);
        assert_eq!(a.extension, "sql.gz");
        assert_eq!(a.kind(), BackupKind::Database);

        let b = ArtifactName::parse("site_42.tgz").unwrap();
        assert_eq!(b.kind(), BackupKind::Filesystem);
    }

    #[test]
    fn rejects_foreign_files() {
        assert!(ArtifactName::parse("notes.txt").is_none());
        assert!(ArtifactName::parse("_42.tgz").is_none());
        assert!(ArtifactName::parse("site_abc.tgz").is_none());
        assert!(ArtifactName::parse("~validation-1.5.tmp").is_none());
    }

    #[test]
    fn lists_artifacts_oldest_first() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b_20.tgz"), "xx").unwrap();
        fs::write(tmp.path().join("a_10.sql"), "x").unwrap();
        fs::write(tmp.path().join("README"), "x").unwrap();
        fs::create_dir(tmp.path().join("~tmp-1.2")).unwrap();

        let found = list_artifacts(tmp.path()).unwrap();
        let names: Vec<_> = found.iter().map(|e| e.artifact.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(found[1].size, 2);
    }

    #[test]
    fn throwaway_names_are_distinct_per_call() {
        let dir = Path::new("/backups");
        let a = tmp_dir_for(dir);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = tmp_dir_for(dir);
        assert_ne!(a, b);
        assert!(validation_file_for(dir).to_string_lossy().ends_with(".tmp"));
    }
}
