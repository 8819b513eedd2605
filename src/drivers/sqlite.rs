use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::DataStore;
use crate::errors::{BackupError, Result};

pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE)?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn schema(&self) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, name, sql FROM sqlite_master \
             WHERE sql NOT NULL AND substr(name, 1, 7) <> 'sqlite_' \
             ORDER BY CASE type WHEN 'table' THEN 0 WHEN 'index' THEN 1 WHEN 'view' THEN 2 ELSE 3 END, name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn dump_rows(&self, table: &str, out: &mut dyn Write) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut count = 0usize;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(render_value(row.get_ref(i)?));
            }
            emit(out, &format!("INSERT INTO {} VALUES({});", quote_ident(table), values.join(",")))?;
            count += 1;
        }
        debug!(table, rows = count, "dumped table");
        Ok(())
    }
}

impl DataStore for SqliteStore {
    fn name(&self) -> &'static str { "sqlite" }

    fn dump(&self, out: &mut dyn Write) -> Result<()> {
        emit(out, "PRAGMA foreign_keys=OFF;")?;
        emit(out, "BEGIN TRANSACTION;")?;
        for (kind, name, sql) in self.schema()? {
            let keyword = match kind.as_str() {
                "table" => "TABLE",
                "index" => "INDEX",
                "view" => "VIEW",
                "trigger" => "TRIGGER",
                _ => continue,
            };
            emit(out, &format!("DROP {} IF EXISTS {};", keyword, quote_ident(&name)))?;
            emit(out, &format!("{};", flatten_sql(&sql)))?;
            if kind == "table" {
                self.dump_rows(&name, out)?;
            }
        }
        emit(out, "COMMIT;")?;
        Ok(())
    }

    fn execute_statement(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(|e| BackupError::DataStore(format!("{e} (while executing: {})", preview(sql))))
    }

    fn size_bytes(&self) -> Result<u64> {
        let pages: i64 = self.conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = self.conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok((pages.max(0) as u64) * (page_size.max(0) as u64))
    }
}

fn emit(out: &mut dyn Write, line: &str) -> Result<()> {
    writeln!(out, "{line}").map_err(|e| BackupError::DataStore(format!("writing dump failed: {e}")))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rewrite schema SQL onto one line so no inner line can end with `;`.
///
/// Line comments become block comments. String literals that span lines are
/// spelled with `char(N)` inside parentheses; other literals and quoted
/// identifiers are copied as written.
fn flatten_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            literal.push('\'');
                        }
                        Some('\'') | None => break,
                        Some(ch) => literal.push(ch),
                    }
                }
                if literal.contains(['\n', '\r']) {
                    out.push('(');
                    out.push_str(&quote_text(&literal));
                    out.push(')');
                } else {
                    out.push('\'');
                    out.push_str(&literal.replace('\'', "''"));
                    out.push('\'');
                }
            }
            '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                out.push(c);
                while let Some(ch) = chars.next() {
                    out.push(ch);
                    if ch == close {
                        // "" and `` are escaped quotes inside the identifier
                        if close != ']' && chars.peek() == Some(&close) {
                            out.push(close);
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                let mut comment = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '\n' || ch == '\r' {
                        break;
                    }
                    comment.push(ch);
                    chars.next();
                }
                out.push_str("/*");
                out.push_str(&comment.replace("*/", "* /"));
                out.push_str("*/");
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("/*");
                let mut prev = '\0';
                for ch in chars.by_ref() {
                    out.push(if ch == '\n' || ch == '\r' { ' ' } else { ch });
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
            }
            '\n' | '\r' => {
                let kept = out.trim_end().len();
                out.truncate(kept);
                if !out.is_empty() {
                    out.push(' ');
                }
                while chars.next_if(|ch| *ch == ' ' || *ch == '\t').is_some() {}
            }
            _ => out.push(c),
        }
    }
    out.trim_end().to_string()
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) if f.is_finite() => format!("{f:?}"),
        ValueRef::Real(f) if f.is_nan() => "NULL".to_string(),
        ValueRef::Real(f) => if f > 0.0 { "9e999".to_string() } else { "-9e999".to_string() },
        ValueRef::Text(bytes) => quote_text(&String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode(bytes)),
    }
}

/// Quote text with line breaks spelled as `char(N)` so every dumped row
/// stays on one line.
fn quote_text(text: &str) -> String {
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '\n' | '\r' => {
                parts.push(format!("'{}'", current.replace('\'', "''")));
                current.clear();
                parts.push(format!("char({})", c as u32));
            }
            _ => current.push(c),
        }
    }
    parts.push(format!("'{}'", current.replace('\'', "''")));
    parts.join("||")
}

fn preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
