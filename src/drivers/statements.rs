use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::{BackupError, IoContext, Result};

/// Lazily splits a dump into statements, one at a time.
///
/// A statement ends on the first line whose trimmed content ends with `;`.
/// Lines are joined with `\n`; text left over at end of input is never
/// yielded as a statement.
pub struct StatementStream<R> {
    lines: Lines<R>,
    source: PathBuf,
    buf: String,
}

impl StatementStream<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).at(path)?;
        Ok(Self::from_reader(BufReader::new(file), path))
    }
}

impl<R: BufRead> StatementStream<R> {
    pub fn from_reader(reader: R, source: impl Into<PathBuf>) -> Self {
        Self { lines: reader.lines(), source: source.into(), buf: String::new() }
    }
}

pub fn is_statement_end(line: &str) -> bool {
    line.trim().ends_with(';')
}

impl<R: BufRead> Iterator for StatementStream<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => return Some(Err(BackupError::io(&self.source, err))),
                None => {
                    if !self.buf.trim().is_empty() {
                        warn!(source = %self.source.display(), "dump ends with an unterminated statement; ignored");
                        self.buf.clear();
                    }
                    return None;
                }
            };

            if self.buf.is_empty() && line.trim().is_empty() {
                continue;
            }
            if !self.buf.is_empty() {
                self.buf.push('\n');
            }
            self.buf.push_str(&line);

            if is_statement_end(&line) {
                let statement = self.buf.trim().to_string();
                self.buf.clear();
                return Some(Ok(statement));
            }
        }
    }
}
