use mysql::prelude::*;
use mysql::{Conn, Opts, OptsBuilder, Params};
use ormkit_core::{
    ColumnMeta, Connection, ConnectionConfig, Deadline, Driver, DriverCapabilities,
    ForeignKeyInfo, IndexGroupBuilder, IndexInfo, OrmError, ParamType, ParameterBag,
    ResultCursor, Row, RowSet, Statement, TableInfo, Value,
};
use std::collections::{HashMap, VecDeque};

/// MySQL driver over the synchronous `mysql` crate.
pub struct MysqlDriver;

impl Driver for MysqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::SAVEPOINTS
            | DriverCapabilities::CANCELLATION
            | DriverCapabilities::LAST_INSERT_ID
            | DriverCapabilities::INTROSPECTION
    }

    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>, OrmError> {
        let opts = build_opts(config);

        log::info!(
            "connecting to MySQL at {}:{} as {} (database: {:?})",
            config.host,
            config.port,
            config.user,
            config.database
        );

        let mut conn =
            Conn::new(opts.clone()).map_err(|e| format_connect_error(&e, config))?;

        // Needed to KILL QUERY from a second connection on cancellation.
        let connection_id: u64 = conn
            .query_first("SELECT CONNECTION_ID()")
            .map_err(map_mysql_error)?
            .unwrap_or(0);

        log::info!("connection established (id: {})", connection_id);

        Ok(Box::new(MysqlConnection {
            conn,
            connection_id,
            kill_opts: opts,
            database: config.database.clone(),
        }))
    }
}

fn build_opts(config: &ConnectionConfig) -> Opts {
    let mut builder = OptsBuilder::new()
        .ip_or_hostname(Some(config.host.as_str()))
        .tcp_port(config.port)
        .user(Some(config.user.as_str()))
        .pass(config.password.as_deref());

    if let Some(db) = &config.database {
        builder = builder.db_name(Some(db.as_str()));
    }

    builder.into()
}

pub struct MysqlConnection {
    conn: Conn,
    connection_id: u64,
    kill_opts: Opts,
    database: Option<String>,
}

impl MysqlConnection {
    fn database(&self) -> Result<&str, OrmError> {
        self.database.as_deref().ok_or_else(|| {
            OrmError::InvalidConfig("introspection requires a database name".to_string())
        })
    }

    fn run_query(&mut self, sql: &str, params: Params) -> Result<RowSet, OrmError> {
        let mut result = self
            .conn
            .exec_iter(sql, params)
            .map_err(map_mysql_error)?;

        let Some(set) = result.iter() else {
            return Ok(RowSet::empty());
        };

        let mut columns: Vec<ColumnMeta> = Vec::new();
        let mut rows: Vec<Row> = Vec::new();
        for row in set {
            let row = row.map_err(map_mysql_error)?;
            let row_cols = row.columns_ref();
            if columns.is_empty() {
                columns = row_cols
                    .iter()
                    .map(|c| ColumnMeta {
                        name: c.name_str().to_string(),
                        type_name: format!("{:?}", c.column_type()),
                        nullable: !c
                            .flags()
                            .contains(mysql::consts::ColumnFlags::NOT_NULL_FLAG),
                    })
                    .collect();
            }
            let values = (0..row_cols.len())
                .map(|i| mysql_value_to_value(&row, i, &row_cols[i]))
                .collect();
            rows.push(values);
        }

        Ok(RowSet { columns, rows })
    }

    fn exec_simple(&mut self, sql: &str) -> Result<(), OrmError> {
        self.conn.query_drop(sql).map_err(map_mysql_error)
    }
}

impl Connection for MysqlConnection {
    fn capabilities(&self) -> DriverCapabilities {
        MysqlDriver.capabilities()
    }

    fn ping(&mut self) -> Result<(), OrmError> {
        self.conn.query_drop("SELECT 1").map_err(map_mysql_error)
    }

    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>, OrmError> {
        Ok(Box::new(MysqlStatement {
            conn: self,
            sql: sql.to_string(),
            params: ParameterBag::new(),
        }))
    }

    fn exec(
        &mut self,
        sql: &str,
        params: &ParameterBag,
        deadline: Option<Deadline>,
    ) -> Result<u64, OrmError> {
        check_deadline(deadline)?;
        let mut result = self
            .conn
            .exec_iter(sql, bag_to_params(params))
            .map_err(map_mysql_error)?;
        let affected = result.affected_rows();
        while result.iter().is_some() {}
        Ok(affected)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &ParameterBag,
        deadline: Option<Deadline>,
    ) -> Result<Box<dyn ResultCursor>, OrmError> {
        check_deadline(deadline)?;
        let rows = self.run_query(sql, bag_to_params(params))?;
        Ok(Box::new(MysqlCursor::new(rows)))
    }

    fn begin(&mut self) -> Result<(), OrmError> {
        self.exec_simple("START TRANSACTION")
    }

    fn commit(&mut self) -> Result<(), OrmError> {
        self.exec_simple("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), OrmError> {
        self.exec_simple("ROLLBACK")
    }

    fn savepoint(&mut self, name: &str) -> Result<(), OrmError> {
        self.exec_simple(&format!("SAVEPOINT {}", quote_ident(name)))
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), OrmError> {
        self.exec_simple(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), OrmError> {
        self.exec_simple(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
    }

    fn last_insert_id(&mut self) -> Result<Option<u64>, OrmError> {
        let id = self.conn.last_insert_id();
        Ok(if id == 0 { None } else { Some(id) })
    }

    fn cancel_active(&mut self) -> Result<(), OrmError> {
        if self.connection_id == 0 {
            return Err(OrmError::NotSupported(
                "connection id unavailable for KILL QUERY".to_string(),
            ));
        }
        let mut kill_conn =
            Conn::new(self.kill_opts.clone()).map_err(map_mysql_error)?;
        kill_conn
            .query_drop(format!("KILL QUERY {}", self.connection_id))
            .map_err(map_mysql_error)
    }

    fn list_tables(&mut self) -> Result<Vec<String>, OrmError> {
        let database = self.database()?.to_string();
        self.conn
            .exec(
                r"SELECT table_name
                  FROM information_schema.tables
                  WHERE table_schema = ?
                    AND table_type = 'BASE TABLE'
                  ORDER BY table_name",
                (database,),
            )
            .map_err(map_mysql_error)
    }

    fn describe_table(&mut self, table: &str) -> Result<TableInfo, OrmError> {
        let database = self.database()?.to_string();
        let rows: Vec<(String, String, String, Option<String>, String, String)> = self
            .conn
            .exec(
                r"SELECT column_name, column_type, is_nullable, column_default, column_key, extra
                  FROM information_schema.columns
                  WHERE table_schema = ? AND table_name = ?
                  ORDER BY ordinal_position",
                (database, table),
            )
            .map_err(map_mysql_error)?;

        if rows.is_empty() {
            return Err(OrmError::query_failed(format!("unknown table {}", table)));
        }

        let columns = rows
            .into_iter()
            .map(|(name, column_type, nullable, default, key, extra)| {
                let enum_values = parse_enum_or_set(&column_type);
                ormkit_core::ColumnInfo {
                    name,
                    column_type,
                    nullable: nullable == "YES",
                    default_value: default,
                    extra,
                    is_primary_key: key == "PRI",
                    enum_values,
                }
            })
            .collect();

        Ok(TableInfo {
            name: table.to_string(),
            columns,
            indexes: self.list_indexes(table)?,
            foreign_keys: self.list_foreign_keys(table)?,
        })
    }

    fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>, OrmError> {
        let database = self.database()?.to_string();
        let rows: Vec<(String, String, String, String, String, String)> = self
            .conn
            .exec(
                r"SELECT
                      kcu.CONSTRAINT_NAME,
                      kcu.COLUMN_NAME,
                      kcu.REFERENCED_TABLE_NAME,
                      kcu.REFERENCED_COLUMN_NAME,
                      rc.DELETE_RULE,
                      rc.UPDATE_RULE
                  FROM information_schema.KEY_COLUMN_USAGE kcu
                  JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
                      ON kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME
                      AND kcu.TABLE_SCHEMA = rc.CONSTRAINT_SCHEMA
                  WHERE kcu.TABLE_SCHEMA = ?
                      AND kcu.TABLE_NAME = ?
                      AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
                  ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
                (database, table),
            )
            .map_err(map_mysql_error)?;

        Ok(rows
            .into_iter()
            .map(
                |(constraint_name, column, referenced_table, referenced_column, on_delete, on_update)| {
                    ForeignKeyInfo {
                        constraint_name,
                        column,
                        referenced_table,
                        referenced_column,
                        on_delete,
                        on_update,
                    }
                },
            )
            .collect())
    }

    fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, OrmError> {
        let database = self.database()?.to_string();
        let sql = format!(
            "SHOW INDEX FROM {}.{}",
            quote_ident(&database),
            quote_ident(table)
        );
        let rows: Vec<mysql::Row> = self.conn.query(&sql).map_err(map_mysql_error)?;

        let mut builder = IndexGroupBuilder::new();
        for row in rows {
            let key_name: String = row.get("Key_name").unwrap_or_default();
            let column_name: String = row.get("Column_name").unwrap_or_default();
            let non_unique: i32 = row.get("Non_unique").unwrap_or(1);
            builder.add_column(key_name, column_name, non_unique == 0);
        }
        Ok(builder.build())
    }
}

struct MysqlStatement<'c> {
    conn: &'c mut MysqlConnection,
    sql: String,
    params: ParameterBag,
}

impl Statement for MysqlStatement<'_> {
    fn bind_value(
        &mut self,
        placeholder: &str,
        value: Value,
        param_type: ParamType,
    ) -> Result<(), OrmError> {
        self.params.add_named_typed(placeholder, value, param_type);
        Ok(())
    }

    fn exec(&mut self) -> Result<u64, OrmError> {
        self.params.verify_against(&self.sql)?;
        let mut result = self
            .conn
            .conn
            .exec_iter(self.sql.as_str(), bag_to_params(&self.params))
            .map_err(map_mysql_error)?;
        let affected = result.affected_rows();
        while result.iter().is_some() {}
        Ok(affected)
    }

    fn query(&mut self) -> Result<RowSet, OrmError> {
        self.params.verify_against(&self.sql)?;
        self.conn.run_query(&self.sql, bag_to_params(&self.params))
    }
}

struct MysqlCursor {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Row>,
}

impl MysqlCursor {
    fn new(rows: RowSet) -> Self {
        Self {
            columns: rows.columns,
            rows: rows.rows.into(),
        }
    }
}

impl ResultCursor for MysqlCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn fetch_one(&mut self) -> Result<Option<Row>, OrmError> {
        Ok(self.rows.pop_front())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, OrmError> {
        Ok(self.rows.drain(..).collect())
    }

    fn close(&mut self) -> Result<(), OrmError> {
        self.rows.clear();
        Ok(())
    }
}

fn check_deadline(deadline: Option<Deadline>) -> Result<(), OrmError> {
    if deadline.is_some_and(|d| d.expired()) {
        return Err(OrmError::Timeout);
    }
    Ok(())
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn bag_to_params(bag: &ParameterBag) -> Params {
    if bag.is_empty() {
        return Params::Empty;
    }
    let map: HashMap<Vec<u8>, mysql::Value> = bag
        .iter()
        .map(|(name, param)| (name.as_bytes().to_vec(), value_to_mysql(&param.value)))
        .collect();
    Params::Named(map)
}

fn value_to_mysql(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(b) => mysql::Value::Int(i64::from(*b)),
        Value::Int(i) => mysql::Value::Int(*i),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => {
            mysql::Value::Bytes(s.as_bytes().to_vec())
        }
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
        Value::DateTime(dt) => {
            mysql::Value::Bytes(dt.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes())
        }
        Value::Date(d) => mysql::Value::Bytes(d.format("%Y-%m-%d").to_string().into_bytes()),
        Value::Time(t) => mysql::Value::Bytes(t.format("%H:%M:%S").to_string().into_bytes()),
    }
}

fn mysql_value_to_value(row: &mysql::Row, idx: usize, col: &mysql::Column) -> Value {
    use mysql::consts::{ColumnFlags, ColumnType};

    let col_type = col.column_type();

    // TINYINT(1) is MySQL's boolean type.
    if col_type == ColumnType::MYSQL_TYPE_TINY
        && col.column_length() == 1
        && let Some(Ok(val)) = row.get_opt::<Option<i8>, _>(idx)
    {
        return match val {
            Some(v) => Value::Bool(v != 0),
            None => Value::Null,
        };
    }

    // UNSIGNED BIGINT can exceed i64::MAX.
    if col_type == ColumnType::MYSQL_TYPE_LONGLONG
        && col.flags().contains(ColumnFlags::UNSIGNED_FLAG)
        && let Some(Ok(val)) = row.get_opt::<Option<u64>, _>(idx)
    {
        return match val {
            Some(v) if v <= i64::MAX as u64 => Value::Int(v as i64),
            Some(v) => Value::Text(v.to_string()),
            None => Value::Null,
        };
    }

    if matches!(
        col_type,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP
    ) && let Some(mysql_val) = row.as_ref(idx)
    {
        match mysql_val {
            mysql::Value::Date(year, month, day, hour, min, sec, micro) => {
                if let Some(date) =
                    chrono::NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                    && let Some(time) = chrono::NaiveTime::from_hms_micro_opt(
                        u32::from(*hour),
                        u32::from(*min),
                        u32::from(*sec),
                        *micro,
                    )
                {
                    let naive = chrono::NaiveDateTime::new(date, time);
                    return Value::DateTime(chrono::DateTime::from_naive_utc_and_offset(
                        naive,
                        chrono::Utc,
                    ));
                }
                return Value::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                ));
            }
            mysql::Value::NULL => return Value::Null,
            _ => {}
        }
    }

    if col_type == ColumnType::MYSQL_TYPE_DATE
        && let Some(mysql_val) = row.as_ref(idx)
    {
        match mysql_val {
            mysql::Value::Date(year, month, day, ..) => {
                if let Some(date) =
                    chrono::NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                {
                    return Value::Date(date);
                }
                return Value::Text(format!("{:04}-{:02}-{:02}", year, month, day));
            }
            mysql::Value::NULL => return Value::Null,
            _ => {}
        }
    }

    if col_type == ColumnType::MYSQL_TYPE_TIME
        && let Some(mysql_val) = row.as_ref(idx)
    {
        match mysql_val {
            mysql::Value::Time(_neg, _days, hours, mins, secs, micros) => {
                if let Some(time) = chrono::NaiveTime::from_hms_micro_opt(
                    u32::from(*hours),
                    u32::from(*mins),
                    u32::from(*secs),
                    *micros,
                ) {
                    return Value::Time(time);
                }
                return Value::Text(format!("{:02}:{:02}:{:02}", hours, mins, secs));
            }
            mysql::Value::NULL => return Value::Null,
            _ => {}
        }
    }

    if let Some(Ok(val)) = row.get_opt::<Option<i64>, _>(idx) {
        return match val {
            Some(v) => Value::Int(v),
            None => Value::Null,
        };
    }

    if let Some(Ok(val)) = row.get_opt::<Option<f64>, _>(idx) {
        return match val {
            Some(v) => Value::Float(v),
            None => Value::Null,
        };
    }

    if let Some(Ok(val)) = row.get_opt::<Option<String>, _>(idx) {
        return match val {
            Some(v) => Value::Text(v),
            None => Value::Null,
        };
    }

    match row.get_opt::<Option<Vec<u8>>, _>(idx) {
        Some(Ok(Some(v))) => Value::Bytes(v),
        Some(Ok(None)) | None => Value::Null,
        Some(Err(e)) => {
            log::warn!(
                "unsupported MySQL column type {:?} at index {}: {}",
                col_type,
                idx,
                e
            );
            Value::Null
        }
    }
}

/// Parse MySQL `enum('a','b')` or `set('x','y')` column types.
fn parse_enum_or_set(column_type: &str) -> Option<Vec<String>> {
    let lower = column_type.to_lowercase();
    let inner = if lower.starts_with("enum(") && lower.ends_with(')') {
        &column_type[5..column_type.len() - 1]
    } else if lower.starts_with("set(") && lower.ends_with(')') {
        &column_type[4..column_type.len() - 1]
    } else {
        return None;
    };

    Some(
        inner
            .split(',')
            .map(|s| {
                let trimmed = s.trim();
                if (trimmed.starts_with('\'') && trimmed.ends_with('\''))
                    || (trimmed.starts_with('"') && trimmed.ends_with('"'))
                {
                    trimmed[1..trimmed.len() - 1]
                        .replace("''", "'")
                        .replace("\\\\", "\\")
                } else {
                    trimmed.to_string()
                }
            })
            .collect(),
    )
}

fn map_mysql_error(error: mysql::Error) -> OrmError {
    match &error {
        mysql::Error::MySqlError(server) => match server.code {
            1062 | 1048 | 1451 | 1452 | 1557 | 3819 => OrmError::integrity(server.message.clone()),
            1317 => OrmError::Cancelled,
            3024 => OrmError::Timeout,
            2006 | 2013 => OrmError::ConnectionLost(server.message.clone()),
            _ => OrmError::query_failed(server.message.clone()),
        },
        mysql::Error::IoError(io) => OrmError::ConnectionLost(io.to_string()),
        other => OrmError::query_failed(other.to_string()),
    }
}

fn format_connect_error(error: &mysql::Error, config: &ConnectionConfig) -> OrmError {
    OrmError::ConnectionLost(format!(
        "failed to connect to {}:{}: {}",
        config.host, config.port, error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enum_and_set_types() {
        assert_eq!(
            parse_enum_or_set("enum('a','b')"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_enum_or_set("set('x')"),
            Some(vec!["x".to_string()])
        );
        assert_eq!(parse_enum_or_set("varchar(255)"), None);
    }

    #[test]
    fn named_params_convert_by_placeholder() {
        let mut bag = ParameterBag::new();
        bag.add_named("id", Value::Int(7));
        let params = bag_to_params(&bag);
        match params {
            Params::Named(map) => {
                assert_eq!(map.get("id".as_bytes()), Some(&mysql::Value::Int(7)));
            }
            _ => panic!("expected named params"),
        }
    }

    #[test]
    fn empty_bag_converts_to_empty_params() {
        assert!(matches!(bag_to_params(&ParameterBag::new()), Params::Empty));
    }
}
