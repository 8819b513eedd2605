use std::path::{Component, Path};

use crate::errors::{BackupError, Result};

pub mod ftp;
pub mod mirror;

pub use ftp::FtpTransport;
pub use mirror::MirrorTransport;

/// Remote side of a rollback. Paths are `/`-separated.
pub trait RemoteTransport {
    fn name(&self) -> &'static str;

    fn connect(&mut self, connection: &str) -> Result<()>;

    fn file_exists(&mut self, path: &str) -> Result<bool>;

    /// Remove a file or an empty directory.
    fn delete(&mut self, path: &str) -> Result<()>;

    fn mkdir_recursive(&mut self, path: &str) -> Result<()>;

    /// Upload `local` to `remote`. `Ok(false)` when the server refused the file.
    fn put(&mut self, local: &Path, remote: &str) -> Result<bool>;
}

/// Pick a transport for a connection string (`ftp://...` or `file:///...`).
pub fn for_connection(connection: &str) -> Result<Box<dyn RemoteTransport>> {
    if connection.starts_with("ftp://") {
        Ok(Box::new(FtpTransport::default()))
    } else if connection.starts_with("file://") {
        Ok(Box::new(MirrorTransport::default()))
    } else {
        Err(BackupError::Config(format!(
            "unsupported remote connection '{}'",
            crate::drivers::selector::redact(connection)
        )))
    }
}

/// Remote installation root named by the connection string itself
/// (`ftp://host/public_html` gives `/public_html`). Empty when there is none.
pub fn root_from_connection(connection: &str) -> String {
    if connection.starts_with("ftp://") {
        ftp::FtpConnection::parse(connection).map(|c| c.path).unwrap_or_default()
    } else {
        String::new()
    }
}

/// `remote_root + "/" + rel`, with `/` separators and no doubled slashes.
pub fn remote_path(remote_root: &str, rel: &Path) -> String {
    let mut out = remote_root.replace('\\', "/").trim_end_matches('/').to_string();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            out.push('/');
            out.push_str(&part.to_string_lossy().replace('\\', "/"));
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_root_and_relative_path() {
        assert_eq!(remote_path("/public_html", Path::new("app/etc/env.php")), "/public_html/app/etc/env.php");
        assert_eq!(remote_path("/public_html/", Path::new("index.php")), "/public_html/index.php");
        assert_eq!(remote_path("", Path::new("var/x.tmp")), "/var/x.tmp");
        assert_eq!(remote_path("", Path::new("")), "/");
    }

    #[test]
    fn normalizes_backslashes() {
        assert_eq!(remote_path("\\site\\", Path::new("a")), "/site/a");
    }

    #[test]
    fn selects_transport_by_scheme() {
        assert_eq!(for_connection("ftp://u:p@host").unwrap().name(), "ftp");
        assert_eq!(for_connection("file:///srv/mirror").unwrap().name(), "mirror");
        assert!(for_connection("sftp://host").is_err());
    }

    #[test]
    fn connection_path_names_the_remote_root() {
        assert_eq!(root_from_connection("ftp://u:p@host:21/public_html/"), "/public_html");
        assert_eq!(root_from_connection("ftp://u:p@host"), "");
        assert_eq!(root_from_connection("file:///srv/mirror"), "");
    }
}
