use super::BuiltQuery;
use crate::driver::{Connection, Deadline, RowSet};
use crate::{OrmError, ParameterBag, ParamType, Value};

/// Raw-SQL adapter sharing the parameter bag contract with the typed
/// builders. The SQL passes through untouched.
pub struct RawQuery {
    sql: String,
    params: ParameterBag,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: ParameterBag::new(),
        }
    }

    /// Bind a named parameter referenced as `:name` in the SQL.
    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.params.add_named(name, value);
        self
    }

    pub fn bind_typed(mut self, name: &str, value: Value, param_type: ParamType) -> Self {
        self.params.add_named_typed(name, value, param_type);
        self
    }

    pub fn to_sql(&self) -> BuiltQuery {
        BuiltQuery::new(self.sql.clone(), self.params.clone())
    }

    pub fn fetch(
        &self,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
    ) -> Result<RowSet, OrmError> {
        self.to_sql().fetch(conn, deadline)
    }

    pub fn execute(
        &self,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
    ) -> Result<u64, OrmError> {
        self.to_sql().execute(conn, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_sql_passes_through() {
        let raw = RawQuery::new("SELECT 1 FROM dual WHERE x = :x").bind("x", Value::Int(1));
        let built = raw.to_sql();
        assert_eq!(built.sql, "SELECT 1 FROM dual WHERE x = :x");
        assert_eq!(built.parameters.get("x").unwrap().value, Value::Int(1));
    }
}
