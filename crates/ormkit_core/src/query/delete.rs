use super::clauses::{ConditionGroup, Conjunction, OrderBy, SortOrder};
use super::BuiltQuery;
use crate::dialect::SqlDialect;
use crate::driver::{Connection, Deadline};
use crate::{OrmError, ParameterBag, Value};
use std::sync::Arc;

/// DELETE builder with WHERE, ORDER BY and LIMIT.
///
/// A WHERE-less DELETE fails with `UnsafeMutation` unless explicitly opted
/// in.
pub struct DeleteBuilder {
    dialect: Arc<dyn SqlDialect>,
    params: ParameterBag,
    table: Option<String>,
    where_clause: ConditionGroup,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    allow_unfiltered: bool,
}

impl DeleteBuilder {
    pub(crate) fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            params: ParameterBag::new(),
            table: None,
            where_clause: ConditionGroup::default(),
            order_by: Vec::new(),
            limit: None,
            allow_unfiltered: false,
        }
    }

    pub fn from(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn and_where(mut self, fragment: &str, params: Vec<Value>) -> Result<Self, OrmError> {
        let resolved = self.params.bind_positional(fragment, params)?;
        self.where_clause.push_fragment(Conjunction::And, resolved);
        Ok(self)
    }

    pub fn or_where(mut self, fragment: &str, params: Vec<Value>) -> Result<Self, OrmError> {
        let resolved = self.params.bind_positional(fragment, params)?;
        self.where_clause.push_fragment(Conjunction::Or, resolved);
        Ok(self)
    }

    pub fn add_order_by(mut self, expr: &str, order: SortOrder) -> Self {
        self.order_by.push(OrderBy {
            expr: expr.to_string(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Opt in to a DELETE without a WHERE clause.
    pub fn allow_unfiltered(mut self) -> Self {
        self.allow_unfiltered = true;
        self
    }

    pub fn to_sql(&self) -> Result<BuiltQuery, OrmError> {
        let table = self
            .table
            .as_deref()
            .ok_or_else(|| OrmError::query_failed("DELETE requires a target table"))?;
        if self.where_clause.is_empty() && !self.allow_unfiltered {
            return Err(OrmError::UnsafeMutation(
                "DELETE without WHERE requires allow_unfiltered()".to_string(),
            ));
        }

        let dialect = self.dialect.as_ref();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(table));

        if let Some(where_sql) = self.where_clause.render() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let terms: Vec<String> = self.order_by.iter().map(|o| o.render(dialect)).collect();
            sql.push_str(&terms.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        Ok(BuiltQuery::new(sql, self.params.clone()))
    }

    pub fn execute(
        &self,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
    ) -> Result<u64, OrmError> {
        self.to_sql()?.execute(conn, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MysqlDialect;

    fn builder() -> DeleteBuilder {
        DeleteBuilder::new(Arc::new(MysqlDialect))
    }

    #[test]
    fn renders_delete_with_where() {
        let built = builder()
            .from("users")
            .and_where("id = ?", vec![Value::Int(9)])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(built.sql, "DELETE FROM `users` WHERE id = :param1");
    }

    #[test]
    fn renders_order_by_and_limit() {
        let built = builder()
            .from("events")
            .and_where("kind = ?", vec![Value::Text("stale".into())])
            .unwrap()
            .add_order_by("created_at", SortOrder::Asc)
            .limit(100)
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "DELETE FROM `events` WHERE kind = :param1 ORDER BY `created_at` ASC LIMIT 100"
        );
    }

    #[test]
    fn unfiltered_delete_is_rejected() {
        let err = builder().from("users").to_sql().unwrap_err();
        assert!(matches!(err, OrmError::UnsafeMutation(_)));
    }

    #[test]
    fn unfiltered_delete_with_opt_in() {
        let built = builder().from("users").allow_unfiltered().to_sql().unwrap();
        assert_eq!(built.sql, "DELETE FROM `users`");
    }
}
