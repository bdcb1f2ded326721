//! SQL dialect differences.
//!
//! The three supported stores differ only in identifier quoting and case
//! handling; everything else the statement builder emits is common SQL.
//! MariaDB and MonetDB fold unquoted column names to lowercase, so for
//! them the engine addresses columns in lowercase throughout — table
//! names keep their case, they are always quoted.

/// A supported SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// Single-quoted identifiers, case preserved.
    Sqlite,
    /// Backtick-quoted identifiers, lowercase column names.
    MariaDb,
    /// Double-quoted identifiers, lowercase column names.
    MonetDb,
}

impl SqlDialect {
    /// Quotes an identifier (table or column name).
    pub fn quote(self, identifier: &str) -> String {
        match self {
            SqlDialect::Sqlite => format!("'{identifier}'"),
            SqlDialect::MariaDb => format!("`{identifier}`"),
            SqlDialect::MonetDb => format!("\"{identifier}\""),
        }
    }

    /// Applies the dialect's column-name folding.
    pub fn fold(self, column: &str) -> String {
        match self {
            SqlDialect::Sqlite => column.to_string(),
            SqlDialect::MariaDb | SqlDialect::MonetDb => column.to_lowercase(),
        }
    }

    /// Folds and quotes a column name in one step.
    pub fn column(self, name: &str) -> String {
        self.quote(&self.fold(name))
    }

    /// The SQL expression for "now minus `days` days", used by retention
    /// deletes.
    pub fn horizon(self, days: u32) -> String {
        match self {
            SqlDialect::Sqlite => format!("date('now', '-{days} days')"),
            SqlDialect::MariaDb => format!("NOW() - INTERVAL {days} DAY"),
            SqlDialect::MonetDb => format!("now() - INTERVAL '{days}' DAY"),
        }
    }
}

/// Escapes a text literal by doubling embedded single quotes.
pub fn escape_text(text: &str) -> String {
    text.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(SqlDialect::Sqlite.quote("JIDL Diagnostics"), "'JIDL Diagnostics'");
        assert_eq!(SqlDialect::MariaDb.quote("JIDL Diagnostics"), "`JIDL Diagnostics`");
        assert_eq!(
            SqlDialect::MonetDb.quote("JIDL Diagnostics"),
            "\"JIDL Diagnostics\""
        );
    }

    #[test]
    fn lowercase_folding_is_dialect_specific() {
        assert_eq!(SqlDialect::Sqlite.column("TIMESTAMP"), "'TIMESTAMP'");
        assert_eq!(SqlDialect::MariaDb.column("TIMESTAMP"), "`timestamp`");
        assert_eq!(SqlDialect::MonetDb.column("TIMESTAMP"), "\"timestamp\"");
    }

    #[test]
    fn text_escaping_doubles_quotes() {
        assert_eq!(escape_text("it's"), "it''s");
        assert_eq!(escape_text("plain"), "plain");
    }
}
