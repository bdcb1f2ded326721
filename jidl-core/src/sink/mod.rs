//! The logging sink contract.
//!
//! A sink is an append-only relational store holding three table classes:
//!
//! - `JIDL Diagnostics(TIMESTAMP TEXT PRIMARY KEY, MESSAGE TEXT)`;
//! - `JIDL Configuration(ID TEXT PRIMARY KEY, DATA TEXT)`, one serialized
//!   INI section per row;
//! - one table per connection, named like the connection, with a
//!   `TIMESTAMP TEXT` column followed by one typed column per reader.
//!
//! [`SinkError::Unavailable`] is the engine's one fatal mid-run signal:
//! it means inserts cannot complete even after retry, and stops the
//! logger.

pub mod dialect;
pub mod dummy;
pub mod statement;

use crate::config::ini::IniSection;
use crate::datatype::DataType;
use crate::device::BoxFuture;
use crate::error::SinkError;
use crate::value::Value;

pub use dialect::SqlDialect;
pub use dummy::DummySink;

/// Name of the timestamp column every table starts with.
pub const TIMESTAMP_COLUMN: &str = "TIMESTAMP";

/// Name of the diagnostics table.
pub const DIAGNOSTICS_TABLE: &str = "JIDL Diagnostics";

/// Name of the diagnostics message column.
pub const DIAGNOSTICS_COLUMN: &str = "MESSAGE";

/// Name of the configuration table.
pub const CONFIGURATION_TABLE: &str = "JIDL Configuration";

/// Name of the configuration key column.
pub const CONFIGURATION_ID_COLUMN: &str = "ID";

/// Name of the configuration data column.
pub const CONFIGURATION_DATA_COLUMN: &str = "DATA";

/// One sample row: ordered column/value pairs. Columns a sample does not
/// carry are simply absent and default to NULL in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Vec<(String, Value)>);

impl Row {
    pub fn new() -> Row {
        Row::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.0.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Declaration of one per-connection table: the reader columns in order.
/// The timestamp column is implicit and always first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<(String, DataType)>,
}

/// The relational store behind a data logger.
pub trait Sink: Send + Sync {
    /// Acquires the underlying store handle and discovers the headers of
    /// the existing user tables (column order included).
    fn open(&self) -> BoxFuture<'_, Result<(), SinkError>>;

    /// Releases the store handle. Never fails.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// The INI sections stored in the configuration table, in row order.
    /// Empty when no configuration has been stored.
    fn configuration(&self) -> BoxFuture<'_, Result<Vec<IniSection>, SinkError>>;

    /// Rewrites the configuration table, one section per row.
    fn store_configuration<'a>(
        &'a self,
        sections: &'a [IniSection],
    ) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Creates any missing tables (diagnostics and configuration
    /// included) and refreshes the header cache.
    fn ensure_tables<'a>(
        &'a self,
        specs: &'a [TableSpec],
    ) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Appends one row to a connection table. Columns absent from the row
    /// are omitted from the INSERT and default to NULL.
    fn add_entry<'a>(&'a self, table: &'a str, row: &'a Row)
        -> BoxFuture<'a, Result<(), SinkError>>;

    /// Appends a diagnostics row with a generated timestamp.
    ///
    /// Error messages are prefixed with `[E]` and stripped of embedded
    /// single quotes; if an error message itself cannot be inserted the
    /// sink is considered [`SinkError::Unavailable`].
    fn log<'a>(&'a self, message: &'a str, is_error: bool)
        -> BoxFuture<'a, Result<(), SinkError>>;

    /// Whether this sink supports the archiver (snapshot + prune).
    fn is_archiver(&self) -> bool {
        false
    }

    /// Writes a dated snapshot of the store, tagged `-<YYYY-MM-DD>`.
    fn snapshot<'a>(&'a self, date_tag: &'a str) -> BoxFuture<'a, Result<(), SinkError>>;

    /// Deletes rows older than `retention_days` from every user table and
    /// from the diagnostics table.
    fn prune(&self, retention_days: u32) -> BoxFuture<'_, Result<(), SinkError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_keep_insertion_order() {
        let mut row = Row::new();
        row.insert(TIMESTAMP_COLUMN, Value::Text("t".into()));
        row.insert("b", Value::Int(1));
        row.insert("a", Value::Int(2));

        let columns: Vec<_> = row.iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(columns, [TIMESTAMP_COLUMN, "b", "a"]);
        assert_eq!(row.get("a"), Some(&Value::Int(2)));
        assert_eq!(row.get("missing"), None);
    }
}
