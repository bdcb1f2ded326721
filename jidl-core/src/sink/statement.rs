//! SQL statement builder shared by the relational sinks.
//!
//! All statements the sinks execute are built here, parameterized only by
//! [`SqlDialect`]. Values are rendered as literals (the stores behind
//! this engine accept one statement string at a time); text goes through
//! single-quote doubling.

use crate::sink::dialect::{escape_text, SqlDialect};
use crate::sink::{
    Row, TableSpec, CONFIGURATION_DATA_COLUMN, CONFIGURATION_ID_COLUMN, CONFIGURATION_TABLE,
    DIAGNOSTICS_COLUMN, DIAGNOSTICS_TABLE, TIMESTAMP_COLUMN,
};

/// Builds the SQL statements of one dialect.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    dialect: SqlDialect,
}

impl StatementBuilder {
    pub fn new(dialect: SqlDialect) -> StatementBuilder {
        StatementBuilder { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// `CREATE TABLE IF NOT EXISTS` for the diagnostics table.
    pub fn create_diagnostics_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} TEXT);",
            self.dialect.quote(DIAGNOSTICS_TABLE),
            self.dialect.column(TIMESTAMP_COLUMN),
            self.dialect.column(DIAGNOSTICS_COLUMN),
        )
    }

    /// `CREATE TABLE IF NOT EXISTS` for the configuration table.
    pub fn create_configuration_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} TEXT);",
            self.dialect.quote(CONFIGURATION_TABLE),
            self.dialect.column(CONFIGURATION_ID_COLUMN),
            self.dialect.column(CONFIGURATION_DATA_COLUMN),
        )
    }

    /// `CREATE TABLE IF NOT EXISTS` for one connection table: the
    /// timestamp column first, then one typed column per reader.
    pub fn create_connection_table(&self, spec: &TableSpec) -> String {
        let mut columns = vec![format!(
            "{} TEXT",
            self.dialect.column(TIMESTAMP_COLUMN)
        )];
        for (name, data_type) in &spec.columns {
            columns.push(format!(
                "{} {}",
                self.dialect.column(name),
                data_type.sql_type().name()
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.dialect.quote(&spec.name),
            columns.join(", ")
        )
    }

    /// INSERT of one sample row, aligned to the table's discovered
    /// headers. Headers without a value in the row are omitted so their
    /// column defaults to NULL. Fails when the row lacks a timestamp.
    pub fn insert(
        &self,
        table: &str,
        headers: &[String],
        row: &Row,
    ) -> Result<String, String> {
        let mut columns = Vec::new();
        let mut values = Vec::new();

        for header in headers {
            let value = row
                .iter()
                .find(|(name, _)| self.dialect.fold(name) == self.dialect.fold(header))
                .map(|(_, value)| value);
            if let Some(value) = value {
                columns.push(self.dialect.column(header));
                values.push(value.to_sql_literal());
            }
        }

        if !columns
            .first()
            .is_some_and(|c| *c == self.dialect.column(TIMESTAMP_COLUMN))
        {
            return Err(format!("row for {table} has no timestamp"));
        }

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({});",
            self.dialect.quote(table),
            columns.join(","),
            values.join(",")
        ))
    }

    /// INSERT of one diagnostics row. Error messages get the `[E]`
    /// prefix; embedded single quotes are escaped.
    pub fn insert_diagnostics(&self, timestamp: &str, message: &str, is_error: bool) -> String {
        let message = if is_error {
            format!("[E] {}", escape_text(message))
        } else {
            escape_text(message)
        };
        format!(
            "INSERT INTO {} ({},{}) VALUES ('{}','{}');",
            self.dialect.quote(DIAGNOSTICS_TABLE),
            self.dialect.column(TIMESTAMP_COLUMN),
            self.dialect.column(DIAGNOSTICS_COLUMN),
            timestamp,
            message
        )
    }

    /// INSERT of one configuration section row.
    pub fn insert_configuration(&self, id: &str, data: &str) -> String {
        format!(
            "INSERT INTO {} ({},{}) VALUES ('{}','{}');",
            self.dialect.quote(CONFIGURATION_TABLE),
            self.dialect.column(CONFIGURATION_ID_COLUMN),
            self.dialect.column(CONFIGURATION_DATA_COLUMN),
            escape_text(id),
            escape_text(data)
        )
    }

    /// Empties the configuration table before a rewrite.
    pub fn clear_configuration(&self) -> String {
        format!("DELETE FROM {};", self.dialect.quote(CONFIGURATION_TABLE))
    }

    /// SELECT of the stored configuration sections, in row order.
    pub fn select_configuration(&self) -> String {
        format!(
            "SELECT {} FROM {};",
            self.dialect.column(CONFIGURATION_DATA_COLUMN),
            self.dialect.quote(CONFIGURATION_TABLE)
        )
    }

    /// Retention DELETE: rows older than `days` days.
    ///
    /// The timestamp column stays unquoted on SQLite: a single-quoted
    /// name in an expression is a string literal there, not a column.
    pub fn delete_older_than(&self, table: &str, days: u32) -> String {
        let timestamp = match self.dialect {
            SqlDialect::Sqlite => TIMESTAMP_COLUMN.to_string(),
            _ => self.dialect.column(TIMESTAMP_COLUMN),
        };
        format!(
            "DELETE FROM {} WHERE {} < {};",
            self.dialect.quote(table),
            timestamp,
            self.dialect.horizon(days)
        )
    }

    /// Discovery query for the user tables (diagnostics and configuration
    /// excluded).
    pub fn tables_query(&self) -> String {
        match self.dialect {
            SqlDialect::Sqlite => format!(
                "SELECT name FROM sqlite_schema WHERE type='table' \
                 AND name NOT LIKE 'sqlite_%' \
                 AND name <> '{DIAGNOSTICS_TABLE}' AND name <> '{CONFIGURATION_TABLE}';"
            ),
            SqlDialect::MariaDb => format!(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() \
                 AND table_name <> '{DIAGNOSTICS_TABLE}' \
                 AND table_name <> '{CONFIGURATION_TABLE}';"
            ),
            SqlDialect::MonetDb => format!(
                "SELECT name FROM sys.tables WHERE NOT system \
                 AND name <> '{DIAGNOSTICS_TABLE}' AND name <> '{CONFIGURATION_TABLE}';"
            ),
        }
    }

    /// Discovery query for one table's columns, in declaration order.
    pub fn columns_query(&self, table: &str) -> String {
        match self.dialect {
            SqlDialect::Sqlite => {
                format!("SELECT name FROM pragma_table_info('{table}') ORDER BY cid;")
            }
            SqlDialect::MariaDb => format!(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = '{table}' \
                 ORDER BY ordinal_position;"
            ),
            SqlDialect::MonetDb => format!(
                "SELECT c.name FROM sys.columns c JOIN sys.tables t ON c.table_id = t.id \
                 WHERE t.name = '{table}' ORDER BY c.number;"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::value::Value;

    fn sqlite() -> StatementBuilder {
        StatementBuilder::new(SqlDialect::Sqlite)
    }

    fn sample_headers() -> Vec<String> {
        vec![
            TIMESTAMP_COLUMN.to_string(),
            "speed".to_string(),
            "level".to_string(),
        ]
    }

    fn sample_row(with_level: bool) -> Row {
        let mut row = Row::new();
        row.insert(TIMESTAMP_COLUMN, Value::Text("2024-05-01 13:30:02,417".into()));
        row.insert("speed", Value::Int(42));
        if with_level {
            row.insert("level", Value::Float(1.5));
        }
        row
    }

    #[test]
    fn insert_lists_every_present_column() {
        let sql = sqlite()
            .insert("press1", &sample_headers(), &sample_row(true))
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO 'press1' ('TIMESTAMP','speed','level') \
             VALUES ('2024-05-01 13:30:02,417',42,1.5);"
        );
    }

    #[test]
    fn insert_skips_absent_columns() {
        let sql = sqlite()
            .insert("press1", &sample_headers(), &sample_row(false))
            .unwrap();
        assert!(!sql.contains("level"));
        assert!(sql.contains("'speed'"));
    }

    #[test]
    fn insert_requires_a_timestamp() {
        let mut row = Row::new();
        row.insert("speed", Value::Int(42));
        assert!(sqlite().insert("press1", &sample_headers(), &row).is_err());
    }

    #[test]
    fn insert_folds_columns_on_folding_dialects() {
        let builder = StatementBuilder::new(SqlDialect::MonetDb);
        let headers = vec!["timestamp".to_string(), "speed".to_string()];
        let sql = builder.insert("press1", &headers, &sample_row(false)).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"press1\" (\"timestamp\",\"speed\") \
             VALUES ('2024-05-01 13:30:02,417',42);"
        );
    }

    #[test]
    fn connection_table_declares_typed_columns() {
        let spec = TableSpec {
            name: "press1".to_string(),
            columns: vec![
                ("speed".to_string(), DataType::Word),
                ("level".to_string(), DataType::Real),
                ("label".to_string(), DataType::Text(Some(8))),
                ("on".to_string(), DataType::Boolean),
            ],
        };
        assert_eq!(
            sqlite().create_connection_table(&spec),
            "CREATE TABLE IF NOT EXISTS 'press1' ('TIMESTAMP' TEXT, 'speed' INTEGER, \
             'level' REAL, 'label' TEXT, 'on' NUMERIC);"
        );
    }

    #[test]
    fn diagnostics_insert_escapes_and_prefixes_errors() {
        let sql = sqlite().insert_diagnostics("2024-05-01 00:00:00,000", "can't insert", true);
        assert!(sql.contains("'[E] can''t insert'"));

        let sql = sqlite().insert_diagnostics("2024-05-01 00:00:00,000", "started", false);
        assert!(sql.contains("'started'"));
        assert!(!sql.contains("[E]"));
    }

    #[test]
    fn retention_delete_uses_the_dialect_horizon() {
        assert_eq!(
            sqlite().delete_older_than(DIAGNOSTICS_TABLE, 7),
            "DELETE FROM 'JIDL Diagnostics' WHERE TIMESTAMP < date('now', '-7 days');"
        );
        assert!(StatementBuilder::new(SqlDialect::MariaDb)
            .delete_older_than("t", 37)
            .contains("NOW() - INTERVAL 37 DAY"));
    }

    #[test]
    fn backtick_quoting_on_mariadb() {
        let builder = StatementBuilder::new(SqlDialect::MariaDb);
        let sql = builder.insert_diagnostics("ts", "m", false);
        assert!(sql.starts_with("INSERT INTO `JIDL Diagnostics` (`timestamp`,`message`)"));
    }
}
