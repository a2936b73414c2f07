use crate::sql_format;
use crate::Value;

/// Database-specific SQL syntax (quoting, escaping, literals).
///
/// The builders and the reconciler go through this trait so that another
/// dialect can be slotted in without touching them. The shipped
/// implementation targets MySQL-compatible servers.
pub trait SqlDialect: Send + Sync {
    /// Quote an identifier (table/column name).
    fn quote_identifier(&self, name: &str) -> String;

    /// Build a qualified table reference.
    fn qualified_table(&self, database: Option<&str>, table: &str) -> String;

    /// Convert a value to a SQL literal string.
    fn value_to_literal(&self, value: &Value) -> String;

    /// Escape a string for use inside a single-quoted literal.
    fn escape_string(&self, s: &str) -> String;

    /// Whether this dialect supports `RETURNING` on mutations.
    fn supports_returning(&self) -> bool {
        false
    }
}

/// MySQL/MariaDB dialect: backtick identifiers, quote-doubled literals.
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlDialect;

impl SqlDialect for MysqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        sql_format::format_identifier(name)
    }

    fn qualified_table(&self, database: Option<&str>, table: &str) -> String {
        match database {
            Some(db) => format!(
                "{}.{}",
                sql_format::format_identifier(db),
                sql_format::format_identifier(table)
            ),
            None => sql_format::format_identifier(table),
        }
    }

    fn value_to_literal(&self, value: &Value) -> String {
        sql_format::format_value(value)
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_table_with_database() {
        let dialect = MysqlDialect;
        assert_eq!(
            dialect.qualified_table(Some("app"), "users"),
            "`app`.`users`"
        );
        assert_eq!(dialect.qualified_table(None, "users"), "`users`");
    }
}
