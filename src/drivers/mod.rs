use std::io::Write;

use crate::errors::Result;

pub mod selector;
pub mod sqlite;
pub mod statements;

/// Connection to the data store whose contents a database backup captures.
pub trait DataStore {
    fn name(&self) -> &'static str;

    /// Write a replayable SQL dump. Every statement must end a line with `;`
    /// and no other line may end with `;`.
    fn dump(&self, out: &mut dyn Write) -> Result<()>;

    /// Run one statement produced by a dump.
    fn execute_statement(&self, sql: &str) -> Result<()>;

    /// Current on-disk size of the store, in bytes.
    fn size_bytes(&self) -> Result<u64>;
}
