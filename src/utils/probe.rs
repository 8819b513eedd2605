use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::io::{IgnorePaths, walk_parents_first};

/// What `tree_info` should look at. Size accounting reads every file's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeFlags {
    pub readable: bool,
    pub writable: bool,
    pub size: bool,
}

impl ProbeFlags {
    pub const READABLE: ProbeFlags = ProbeFlags { readable: true, writable: false, size: false };
    pub const WRITABLE: ProbeFlags = ProbeFlags { readable: false, writable: true, size: false };
    pub const SIZE: ProbeFlags = ProbeFlags { readable: false, writable: false, size: true };
    pub const ALL: ProbeFlags = ProbeFlags { readable: true, writable: true, size: true };
}

#[derive(Debug, Clone, Default)]
pub struct TreeInfo {
    pub readable: bool,
    pub writable: bool,
    pub size: u64,
    /// Paths that failed one of the requested checks, in walk order.
    pub offenders: Vec<PathBuf>,
}

/// Inspect the tree under `root`, skipping ignored paths.
pub fn tree_info(root: &Path, ignore: &IgnorePaths, flags: ProbeFlags) -> TreeInfo {
    let mut info = TreeInfo { readable: true, writable: true, size: 0, offenders: Vec::new() };

    if flags.writable && !is_writable(root) {
        info.writable = false;
        info.offenders.push(root.to_path_buf());
    }

    for entry in walk_parents_first(root, ignore) {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                debug!(path = %path.display(), error = %err, "probe could not read entry");
                info.readable = false;
                info.writable = false;
                info.offenders.push(path);
                continue;
            }
        };
        let path = entry.path();
        let ft = entry.file_type();
        if ft.is_symlink() {
            continue;
        }

        if flags.readable && !is_readable(path, ft.is_dir()) {
            info.readable = false;
            info.offenders.push(path.to_path_buf());
        }
        if flags.writable && !is_writable(path) {
            info.writable = false;
            info.offenders.push(path.to_path_buf());
        }
        if flags.size && ft.is_file() {
            if let Ok(md) = entry.metadata() {
                info.size += md.len();
            }
        }
    }

    info
}

fn is_readable(path: &Path, is_dir: bool) -> bool {
    if is_dir {
        fs::read_dir(path).is_ok()
    } else {
        fs::File::open(path).is_ok()
    }
}

/// Mode bits must allow writing and the kernel must grant it to this process.
/// The second check covers ownership and ACLs; it passes for root, the first
/// does not.
fn is_writable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(md) => !md.permissions().readonly() && access_writable(path),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn access_writable(path: &Path) -> bool {
    rustix::fs::access(path, rustix::fs::Access::WRITE_OK).is_ok()
}

#[cfg(not(unix))]
fn access_writable(_path: &Path) -> bool {
    true
}
