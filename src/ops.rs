use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tracing::debug;

use snapback::backup::{Backup, BackupKind, ExecutionScope};
use snapback::config::{ResolvedSettings, Settings};
use snapback::rollback::RemoteTarget;
use snapback::storage::{ArtifactName, list_artifacts};

use crate::cli::Cli;

/// Settings file merged with command-line overrides.
pub fn load_settings(cli: &Cli) -> Result<ResolvedSettings> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let overrides = Settings {
        root_dir: cli.root.clone(),
        backups_dir: cli.backups_dir.clone(),
        name: cli.name.clone(),
        ignore_paths: cli.ignore.clone(),
        keep_source: cli.keep_source,
        compress: cli.no_compress.then_some(false),
        data_store: cli.db.clone(),
        remote: cli.ftp.as_ref().map(|connection| RemoteTarget {
            connection: connection.clone(),
            path: cli.ftp_path.clone().unwrap_or_default(),
        }),
        ..Settings::default()
    };
    let settings = Settings::discover(cli.config.as_deref(), &root)?.merge(overrides);
    let resolved = settings.resolve()?;
    debug!(root = %resolved.root_dir.display(), backups = %resolved.backups_dir.display(), "settings resolved");
    Ok(resolved)
}

pub fn do_create(settings: &ResolvedSettings, kind: BackupKind) -> Result<()> {
    let mut unit = settings.backup(kind, None)?;
    let scope = ExecutionScope::uninterruptible("create");

    let bar = create_progress_bar(&format!("Creating {} backup", kind.tag()));
    let result = unit.create(&scope);
    bar.finish_and_clear();
    result.with_context(|| format!("{} backup failed", kind.tag()))?;

    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Backup written to {}", unit.backup_path().display()).green()
    );
    Ok(())
}

pub fn do_rollback(settings: &ResolvedSettings, artifact: &Path, kind: Option<BackupKind>) -> Result<()> {
    let file_name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid artifact path '{}'", artifact.display()))?;
    let parsed = ArtifactName::parse(file_name)
        .ok_or_else(|| anyhow!("'{}' is not a backup artifact (<name>_<time>.<extension>)", file_name))?;

    let kind = kind.unwrap_or_else(|| parsed.kind());
    let is_dump = parsed.kind() == BackupKind::Database;
    if (kind == BackupKind::Database) != is_dump {
        bail!("artifact '{}' cannot be restored as a {} backup", file_name, kind.tag());
    }

    let mut settings = settings.clone();
    if let Some(dir) = artifact_dir(artifact)? {
        settings.backups_dir = dir;
    }

    let mut unit = settings.backup(kind, Some(&parsed))?;
    let scope = ExecutionScope::uninterruptible("rollback");

    let bar = create_progress_bar(&format!("Rolling back {}", file_name));
    let result = unit.rollback(&scope);
    bar.finish_and_clear();
    result.with_context(|| format!("rollback from {} failed", file_name))?;

    println!("{} {}", "✔".green().bold(), "Rollback complete".green());
    Ok(())
}

/// Directory of an artifact given as a path rather than a bare file name.
fn artifact_dir(artifact: &Path) -> Result<Option<PathBuf>> {
    match artifact.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            let dir = parent
                .canonicalize()
                .with_context(|| format!("artifact directory {}", parent.display()))?;
            Ok(Some(dir))
        }
        _ => Ok(None),
    }
}

pub fn do_size(settings: &ResolvedSettings, kind: BackupKind) -> Result<()> {
    let unit = settings.backup(kind, None)?;
    let size = unit.size_bytes()?;
    println!("{} {} {}", "i".cyan().bold(), format!("{} size:", kind.tag()).cyan(), HumanBytes(size));
    Ok(())
}

pub fn do_list(settings: &ResolvedSettings) -> Result<()> {
    let artifacts = list_artifacts(&settings.backups_dir)?;

    if artifacts.is_empty() {
        println!(
            "{} {}",
            "i".yellow().bold(),
            format!("No backups found in {}", settings.backups_dir.display()).yellow()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Timestamp").add_attribute(Attribute::Bold),
            Cell::new("Size").add_attribute(Attribute::Bold),
        ]);

    for entry in &artifacts {
        let ts = entry
            .artifact
            .created_at()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.artifact.time.to_string());
        let file_name = entry.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        table.add_row(vec![
            Cell::new(file_name),
            Cell::new(entry.artifact.kind().tag()),
            Cell::new(ts),
            Cell::new(HumanBytes(entry.size)).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn do_version() {
    println!("{} {}", "snapback".bold(), env!("CARGO_PKG_VERSION").cyan());
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}
