use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::errors::{BackupError, IoContext, Result};
use crate::utils::io::{IgnorePaths, ensure_dir, walk_parents_first};

/// Packs a directory tree (or a single file) into one archive and back.
pub trait ArchiveCodec {
    /// Write `source` into `dest`. The format follows `dest`'s file name.
    fn pack(&self, source: &Path, ignore: &IgnorePaths, dest: &Path) -> Result<()>;

    /// Extract `archive` into `dest_dir` and return the extracted root.
    /// Plain, uncompressed files are returned unchanged.
    fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Tar,
    Gz,
    Plain,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Self {
        let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            ArchiveFormat::TarGz
        } else if name.ends_with(".tar") {
            ArchiveFormat::Tar
        } else if name.ends_with(".gz") {
            ArchiveFormat::Gz
        } else {
            ArchiveFormat::Plain
        }
    }
}

/// tar/gzip codec backed by the `tar` and `flate2` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarCodec;

impl ArchiveCodec for TarCodec {
    fn pack(&self, source: &Path, ignore: &IgnorePaths, dest: &Path) -> Result<()> {
        let format = ArchiveFormat::detect(dest);
        let create = || File::create(dest).map(BufWriter::new).at(dest);

        match (format, source.is_dir()) {
            (ArchiveFormat::TarGz, true) => {
                let gz = write_tar(GzEncoder::new(create()?, Compression::default()), source, ignore)?;
                finish(gz.finish(), dest)?;
            }
            (ArchiveFormat::Tar, true) => {
                let out = write_tar(create()?, source, ignore)?;
                finish(Ok(out), dest)?;
            }
            (ArchiveFormat::Gz, false) => {
                let mut input = BufReader::new(File::open(source).at(source)?);
                let mut gz = GzEncoder::new(create()?, Compression::default());
                io::copy(&mut input, &mut gz).at(dest)?;
                finish(gz.finish(), dest)?;
            }
            (ArchiveFormat::Plain, false) => {
                fs::copy(source, dest).at(dest)?;
            }
            (format, is_dir) => {
                return Err(BackupError::Archive(format!(
                    "cannot pack {} {} as {:?}",
                    if is_dir { "directory" } else { "file" },
                    source.display(),
                    format
                )));
            }
        }
        debug!(source = %source.display(), dest = %dest.display(), "packed");
        Ok(())
    }

    fn unpack(&self, archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let format = ArchiveFormat::detect(archive);
        if format == ArchiveFormat::Plain {
            return Ok(archive.to_path_buf());
        }
        ensure_dir(dest_dir)?;
        let input = BufReader::new(File::open(archive).at(archive)?);

        let extracted = match format {
            ArchiveFormat::TarGz => {
                unpack_tar(GzDecoder::new(input), archive, dest_dir)?;
                dest_dir.to_path_buf()
            }
            ArchiveFormat::Tar => {
                unpack_tar(input, archive, dest_dir)?;
                dest_dir.to_path_buf()
            }
            ArchiveFormat::Gz => {
                let target = dest_dir.join(strip_gz(archive));
                let mut out = BufWriter::new(File::create(&target).at(&target)?);
                io::copy(&mut GzDecoder::new(input), &mut out)
                    .map_err(|e| BackupError::Archive(format!("gunzip {} failed: {e}", archive.display())))?;
                out.flush().at(&target)?;
                target
            }
            ArchiveFormat::Plain => archive.to_path_buf(),
        };
        debug!(archive = %archive.display(), dest = %extracted.display(), "unpacked");
        Ok(extracted)
    }
}

fn write_tar<W: Write>(writer: W, root: &Path, ignore: &IgnorePaths) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for entry in walk_parents_first(root, ignore) {
        let entry = entry.map_err(|e| BackupError::Archive(format!("tar walk failed: {e}")))?;
        let path = entry.path();
        let rel = path.strip_prefix(root).map_err(|_| BackupError::Archive(format!("{} is outside {}", path.display(), root.display())))?;
        if entry.file_type().is_dir() {
            builder.append_dir(rel, path).map_err(|e| map_tar_append_error(path, e))?;
        } else {
            builder.append_path_with_name(path, rel).map_err(|e| map_tar_append_error(path, e))?;
        }
    }

    builder
        .into_inner()
        .map_err(|e| BackupError::Archive(format!("tar finalize failed: {e}")))
}

fn unpack_tar<R: io::Read>(reader: R, archive: &Path, dest_dir: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(dest_dir)
        .map_err(|e| BackupError::Archive(format!("failed to unpack {}: {e}", archive.display())))
}

fn finish<W: Write>(res: io::Result<W>, dest: &Path) -> Result<()> {
    let mut writer = res.map_err(|e| BackupError::Archive(format!("finalize {} failed: {e}", dest.display())))?;
    writer.flush().at(dest)
}

fn map_tar_append_error(path: &Path, err: io::Error) -> BackupError {
    BackupError::Archive(format!("tar append {} failed: {err}", path.display()))
}

fn strip_gz(archive: &Path) -> String {
    let name = archive.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    match name.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{name}.out"),
    }
}
