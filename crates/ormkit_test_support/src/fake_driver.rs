use ormkit_core::{
    collect_placeholders, ColumnMeta, Connection, ConnectionConfig, Deadline, Driver,
    DriverCapabilities, ForeignKeyInfo, IndexInfo, OrmError, ParamType, ParameterBag,
    ResultCursor, Row, RowSet, Statement, TableInfo, Value,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Scripted outcome for one exact SQL string.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Rows(RowSet),
    Affected(u64),
    Error(String),
    Timeout,
}

/// One statement the fake connection executed, with its bindings.
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

struct FakeState {
    outcomes: RwLock<HashMap<String, FakeOutcome>>,
    default_rows: RwLock<Option<RowSet>>,
    log: Mutex<Vec<ExecutedStatement>>,
    scripted_insert_ids: Mutex<VecDeque<u64>>,
    next_insert_id: Mutex<u64>,
    last_insert_id: Mutex<Option<u64>>,
    tables: RwLock<BTreeMap<String, TableInfo>>,
    capabilities: Mutex<DriverCapabilities>,
    connect_error: RwLock<Option<String>>,
}

/// Deterministic in-memory driver for tests.
///
/// Results are scripted per exact SQL string; every executed statement is
/// recorded so tests can assert on statement order (the observable SQL
/// log). Generated keys follow MySQL semantics: a multi-row insert reports
/// the first id of the range.
#[derive(Clone)]
pub struct FakeDriver {
    state: Arc<FakeState>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FakeState {
                outcomes: RwLock::new(HashMap::new()),
                default_rows: RwLock::new(None),
                log: Mutex::new(Vec::new()),
                scripted_insert_ids: Mutex::new(VecDeque::new()),
                next_insert_id: Mutex::new(1),
                last_insert_id: Mutex::new(None),
                tables: RwLock::new(BTreeMap::new()),
                capabilities: Mutex::new(
                    DriverCapabilities::SAVEPOINTS
                        | DriverCapabilities::LAST_INSERT_ID
                        | DriverCapabilities::INTROSPECTION,
                ),
                connect_error: RwLock::new(None),
            }),
        }
    }

    pub fn with_query_rows(self, sql: impl Into<String>, rows: RowSet) -> Self {
        write(&self.state.outcomes).insert(sql.into(), FakeOutcome::Rows(rows));
        self
    }

    pub fn with_outcome(self, sql: impl Into<String>, outcome: FakeOutcome) -> Self {
        write(&self.state.outcomes).insert(sql.into(), outcome);
        self
    }

    pub fn with_error(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        write(&self.state.outcomes).insert(sql.into(), FakeOutcome::Error(message.into()));
        self
    }

    pub fn with_default_rows(self, rows: RowSet) -> Self {
        *write(&self.state.default_rows) = Some(rows);
        self
    }

    /// Seed the generated-key sequence; each insert pops the next value.
    pub fn with_insert_ids(self, ids: impl IntoIterator<Item = u64>) -> Self {
        lock(&self.state.scripted_insert_ids).extend(ids);
        self
    }

    pub fn with_capabilities(self, capabilities: DriverCapabilities) -> Self {
        *lock(&self.state.capabilities) = capabilities;
        self
    }

    /// Seed the introspection surface with one table.
    pub fn with_table(self, table: TableInfo) -> Self {
        write(&self.state.tables).insert(table.name.clone(), table);
        self
    }

    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        *write(&self.state.connect_error) = Some(message.into());
        self
    }

    pub fn set_outcome(&self, sql: impl Into<String>, outcome: FakeOutcome) {
        write(&self.state.outcomes).insert(sql.into(), outcome);
    }

    pub fn set_table(&self, table: TableInfo) {
        write(&self.state.tables).insert(table.name.clone(), table);
    }

    pub fn remove_table(&self, name: &str) {
        write(&self.state.tables).remove(name);
    }

    /// Every statement executed so far, in order.
    pub fn statement_log(&self) -> Vec<ExecutedStatement> {
        lock(&self.state.log).clone()
    }

    /// SQL strings of the statement log.
    pub fn executed_sql(&self) -> Vec<String> {
        lock(&self.state.log).iter().map(|s| s.sql.clone()).collect()
    }

    pub fn clear_log(&self) {
        lock(&self.state.log).clear();
    }

    pub fn connection(&self) -> FakeConnection {
        FakeConnection {
            state: self.state.clone(),
        }
    }
}

impl Driver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> DriverCapabilities {
        *lock(&self.state.capabilities)
    }

    fn open(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>, OrmError> {
        if let Some(message) = read(&self.state.connect_error).clone() {
            return Err(OrmError::ConnectionLost(message));
        }
        Ok(Box::new(self.connection()))
    }
}

pub struct FakeConnection {
    state: Arc<FakeState>,
}

impl FakeConnection {
    fn record(&self, sql: &str, params: &ParameterBag) {
        lock(&self.state.log).push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    fn run(&self, sql: &str, params: &ParameterBag) -> Result<FakeOutcome, OrmError> {
        self.record(sql, params);

        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            let generated = match lock(&self.state.scripted_insert_ids).pop_front() {
                Some(id) => id,
                None => {
                    let mut next = lock(&self.state.next_insert_id);
                    let id = *next;
                    *next += insert_row_count(sql) as u64;
                    id
                }
            };
            *lock(&self.state.last_insert_id) = Some(generated);
        }

        if let Some(outcome) = read(&self.state.outcomes).get(sql).cloned() {
            return Ok(outcome);
        }
        if let Some(rows) = read(&self.state.default_rows).clone() {
            return Ok(FakeOutcome::Rows(rows));
        }
        Ok(FakeOutcome::Affected(1))
    }
}

/// `INSERT INTO t (a, b) VALUES (..), (..)` contributes one generated key
/// per row tuple.
fn insert_row_count(sql: &str) -> usize {
    let upper = sql.to_ascii_uppercase();
    let Some(values_at) = upper.find(" VALUES ") else {
        return 1;
    };
    sql[values_at..].matches('(').count().max(1)
}

impl Connection for FakeConnection {
    fn capabilities(&self) -> DriverCapabilities {
        *lock(&self.state.capabilities)
    }

    fn ping(&mut self) -> Result<(), OrmError> {
        Ok(())
    }

    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>, OrmError> {
        Ok(Box::new(FakeStatement {
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
        if deadline.is_some_and(|d| d.expired()) {
            return Err(OrmError::Timeout);
        }
        match self.run(sql, params)? {
            FakeOutcome::Affected(n) => Ok(n),
            FakeOutcome::Rows(rows) => Ok(rows.row_count() as u64),
            FakeOutcome::Error(message) => Err(OrmError::query_failed(message)),
            FakeOutcome::Timeout => Err(OrmError::Timeout),
        }
    }

    fn query(
        &mut self,
        sql: &str,
        params: &ParameterBag,
        deadline: Option<Deadline>,
    ) -> Result<Box<dyn ResultCursor>, OrmError> {
        if deadline.is_some_and(|d| d.expired()) {
            return Err(OrmError::Timeout);
        }
        match self.run(sql, params)? {
            FakeOutcome::Rows(rows) => Ok(Box::new(FakeCursor::new(rows))),
            FakeOutcome::Affected(_) => Ok(Box::new(FakeCursor::new(RowSet::empty()))),
            FakeOutcome::Error(message) => Err(OrmError::query_failed(message)),
            FakeOutcome::Timeout => Err(OrmError::Timeout),
        }
    }

    fn begin(&mut self) -> Result<(), OrmError> {
        self.record("BEGIN", &ParameterBag::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), OrmError> {
        self.record("COMMIT", &ParameterBag::new());
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), OrmError> {
        self.record("ROLLBACK", &ParameterBag::new());
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> Result<(), OrmError> {
        self.record(&format!("SAVEPOINT {}", name), &ParameterBag::new());
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), OrmError> {
        self.record(&format!("RELEASE SAVEPOINT {}", name), &ParameterBag::new());
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), OrmError> {
        self.record(&format!("ROLLBACK TO SAVEPOINT {}", name), &ParameterBag::new());
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<Option<u64>, OrmError> {
        Ok(*lock(&self.state.last_insert_id))
    }

    fn list_tables(&mut self) -> Result<Vec<String>, OrmError> {
        Ok(read(&self.state.tables).keys().cloned().collect())
    }

    fn describe_table(&mut self, table: &str) -> Result<TableInfo, OrmError> {
        read(&self.state.tables)
            .get(table)
            .cloned()
            .ok_or_else(|| OrmError::query_failed(format!("unknown table {}", table)))
    }

    fn list_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeyInfo>, OrmError> {
        Ok(self.describe_table(table)?.foreign_keys)
    }

    fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, OrmError> {
        Ok(self.describe_table(table)?.indexes)
    }
}

struct FakeStatement<'c> {
    conn: &'c mut FakeConnection,
    sql: String,
    params: ParameterBag,
}

impl Statement for FakeStatement<'_> {
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
        self.verify()?;
        self.conn.exec(&self.sql, &self.params, None)
    }

    fn query(&mut self) -> Result<RowSet, OrmError> {
        self.verify()?;
        let mut cursor = self.conn.query(&self.sql, &self.params, None)?;
        RowSet::from_cursor(cursor.as_mut())
    }
}

impl FakeStatement<'_> {
    fn verify(&self) -> Result<(), OrmError> {
        let present = collect_placeholders(&self.sql);
        for (name, _) in self.params.iter() {
            if !present.iter().any(|p| p == name) {
                return Err(OrmError::UnboundParameter(format!(":{}", name)));
            }
        }
        Ok(())
    }
}

struct FakeCursor {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Row>,
}

impl FakeCursor {
    fn new(rows: RowSet) -> Self {
        Self {
            columns: rows.columns,
            rows: rows.rows.into(),
        }
    }
}

impl ResultCursor for FakeCursor {
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

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
