use crate::schema::{ForeignKeyInfo, IndexInfo, TableInfo};
use crate::{OrmError, ParamType, ParameterBag, Value};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

bitflags! {
    /// Optional behaviours a driver may support.
    ///
    /// The flush planner consults SAVEPOINTS before wrapping phases; the
    /// session consults CANCELLATION before honouring deadline expiry with
    /// an in-flight cancel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverCapabilities: u32 {
        const SAVEPOINTS = 1 << 0;
        const CANCELLATION = 1 << 1;
        const LAST_INSERT_ID = 1 << 2;
        const INTROSPECTION = 1 << 3;
    }
}

/// Connection parameters for a database server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            database: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Absolute point in time after which an operation should be abandoned.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn from_timeout(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// Column metadata attached to a result cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

pub type Row = Vec<Value>;

/// A fully materialised query result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_cursor(cursor: &mut dyn ResultCursor) -> Result<Self, OrmError> {
        let columns = cursor.columns().to_vec();
        let rows = cursor.fetch_all()?;
        cursor.close()?;
        Ok(Self { columns, rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Factory for database connections.
pub trait Driver: Send + Sync {
    /// Stable driver identifier (e.g. "mysql").
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> DriverCapabilities;

    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, OrmError>;
}

/// Active database connection.
///
/// The session interacts exclusively through this trait, never through
/// driver internals. A connection is owned by one session at a time; it is
/// not required to be thread-safe.
pub trait Connection {
    fn capabilities(&self) -> DriverCapabilities;

    /// Lightweight liveness check.
    fn ping(&mut self) -> Result<(), OrmError>;

    /// Prepare a statement for named-parameter binding.
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>, OrmError>;

    /// Execute a mutation, returning the affected row count.
    fn exec(
        &mut self,
        sql: &str,
        params: &ParameterBag,
        deadline: Option<Deadline>,
    ) -> Result<u64, OrmError>;

    /// Execute a query, returning a cursor over the result.
    fn query(
        &mut self,
        sql: &str,
        params: &ParameterBag,
        deadline: Option<Deadline>,
    ) -> Result<Box<dyn ResultCursor>, OrmError>;

    fn begin(&mut self) -> Result<(), OrmError>;
    fn commit(&mut self) -> Result<(), OrmError>;
    fn rollback(&mut self) -> Result<(), OrmError>;

    fn savepoint(&mut self, name: &str) -> Result<(), OrmError>;
    fn release_savepoint(&mut self, name: &str) -> Result<(), OrmError>;
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), OrmError>;

    /// The key generated by the most recent auto-increment insert on this
    /// connection, if any.
    fn last_insert_id(&mut self) -> Result<Option<u64>, OrmError>;

    /// Cancel the currently running statement, where the driver has a
    /// cancellation primitive.
    fn cancel_active(&mut self) -> Result<(), OrmError> {
        Err(OrmError::NotSupported(
            "statement cancellation not supported by this driver".to_string(),
        ))
    }

    // -- Introspection surface --

    fn list_tables(&mut self) -> Result<Vec<String>, OrmError>;

    fn describe_table(&mut self, table: &str) -> Result<TableInfo, OrmError>;

    fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>, OrmError>;

    fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, OrmError>;
}

/// Prepared statement with typed named-parameter binding.
pub trait Statement {
    fn bind_value(
        &mut self,
        placeholder: &str,
        value: Value,
        param_type: ParamType,
    ) -> Result<(), OrmError>;

    /// Execute as a mutation.
    fn exec(&mut self) -> Result<u64, OrmError>;

    /// Execute as a query.
    fn query(&mut self) -> Result<RowSet, OrmError>;
}

/// Cursor over a query result.
pub trait ResultCursor {
    fn columns(&self) -> &[ColumnMeta];

    fn fetch_one(&mut self) -> Result<Option<Row>, OrmError>;

    fn fetch_all(&mut self) -> Result<Vec<Row>, OrmError>;

    fn close(&mut self) -> Result<(), OrmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expiry() {
        let deadline = Deadline::from_timeout(Duration::from_secs(60));
        assert!(!deadline.expired());
        assert!(deadline.remaining() > Duration::ZERO);

        let past = Deadline::at(Instant::now() - Duration::from_secs(1));
        assert!(past.expired());
        assert_eq!(past.remaining(), Duration::ZERO);
    }

    #[test]
    fn config_builder_sets_fields() {
        let config = ConnectionConfig::new("db.internal")
            .with_port(3307)
            .with_user("app")
            .with_database("app_db");
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3307);
        assert_eq!(config.database.as_deref(), Some("app_db"));
    }
}
