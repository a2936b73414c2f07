use super::clauses::{ConditionGroup, Conjunction, GroupBuilder, Join, JoinKind, TableRef};
use super::BuiltQuery;
use crate::dialect::SqlDialect;
use crate::driver::{Connection, Deadline};
use crate::{OrmError, ParameterBag, Value};
use std::sync::Arc;

/// UPDATE builder.
///
/// Assignments take either bound values or verbatim right-hand expressions
/// (`login_count = login_count + 1`). A WHERE-less UPDATE fails with
/// `UnsafeMutation` unless explicitly opted in.
pub struct UpdateBuilder {
    dialect: Arc<dyn SqlDialect>,
    params: ParameterBag,
    table: Option<TableRef>,
    joins: Vec<Join>,
    assignments: Vec<(String, String)>,
    where_clause: ConditionGroup,
    allow_unfiltered: bool,
}

impl UpdateBuilder {
    pub(crate) fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            params: ParameterBag::new(),
            table: None,
            joins: Vec::new(),
            assignments: Vec::new(),
            where_clause: ConditionGroup::default(),
            allow_unfiltered: false,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(TableRef::new(table, None));
        self
    }

    pub fn table_as(mut self, table: &str, alias: &str) -> Self {
        self.table = Some(TableRef::new(table, Some(alias.to_string())));
        self
    }

    /// Assign a bound value to a column.
    pub fn set(mut self, column: &str, value: Value) -> Self {
        let placeholder = self.params.add(value);
        self.assignments.push((column.to_string(), placeholder));
        self
    }

    /// Assign a verbatim expression to a column; column references on the
    /// right-hand side render unquoted.
    pub fn set_expr(mut self, column: &str, expr: &str) -> Self {
        self.assignments.push((column.to_string(), expr.to_string()));
        self
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        table: &str,
        alias: Option<&str>,
        on: &str,
        params: Vec<Value>,
    ) -> Result<Self, OrmError> {
        let resolved = self.params.bind_positional(on, params)?;
        self.joins.push(Join {
            kind,
            table: TableRef::new(table, alias.map(str::to_string)),
            on: resolved,
        });
        Ok(self)
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

    pub fn and_where_named(mut self, fragment: &str, params: Vec<(&str, Value)>) -> Self {
        for (name, value) in params {
            self.params.add_named(name, value);
        }
        self.where_clause
            .push_fragment(Conjunction::And, fragment.to_string());
        self
    }

    pub fn where_group(
        mut self,
        conjunction: Conjunction,
        build: impl FnOnce(&mut GroupBuilder<'_>) -> Result<(), OrmError>,
    ) -> Result<Self, OrmError> {
        let mut builder = GroupBuilder::new(&mut self.params);
        build(&mut builder)?;
        let group = builder.group;
        self.where_clause.push_group(conjunction, group);
        Ok(self)
    }

    /// Opt in to an UPDATE without a WHERE clause.
    pub fn allow_unfiltered(mut self) -> Self {
        self.allow_unfiltered = true;
        self
    }

    pub fn to_sql(&self) -> Result<BuiltQuery, OrmError> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| OrmError::query_failed("UPDATE requires a target table"))?;
        if self.assignments.is_empty() {
            return Err(OrmError::query_failed("UPDATE requires at least one assignment"));
        }
        if self.where_clause.is_empty() && !self.allow_unfiltered {
            return Err(OrmError::UnsafeMutation(
                "UPDATE without WHERE requires allow_unfiltered()".to_string(),
            ));
        }

        let dialect = self.dialect.as_ref();
        let mut sql = format!("UPDATE {}", table.render(dialect));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.render(dialect));
        }

        let assignments: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, rhs)| format!("{} = {}", dialect.quote_identifier(column), rhs))
            .collect();
        sql.push_str(" SET ");
        sql.push_str(&assignments.join(", "));

        if let Some(where_sql) = self.where_clause.render() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
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

    fn builder() -> UpdateBuilder {
        UpdateBuilder::new(Arc::new(MysqlDialect))
    }

    #[test]
    fn renders_update_with_bound_values() {
        let built = builder()
            .table("users")
            .set("name", Value::Text("B".into()))
            .and_where("id = ?", vec![Value::Int(1)])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "UPDATE `users` SET `name` = :param1 WHERE id = :param2"
        );
    }

    #[test]
    fn verbatim_expression_is_not_quoted() {
        let built = builder()
            .table("users")
            .set_expr("login_count", "login_count + 1")
            .and_where("id = ?", vec![Value::Int(1)])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "UPDATE `users` SET `login_count` = login_count + 1 WHERE id = :param1"
        );
    }

    #[test]
    fn unfiltered_update_is_rejected() {
        let err = builder()
            .table("users")
            .set("name", Value::Text("x".into()))
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, OrmError::UnsafeMutation(_)));
    }

    #[test]
    fn unfiltered_update_with_opt_in() {
        let built = builder()
            .table("users")
            .set("active", Value::Bool(false))
            .allow_unfiltered()
            .to_sql()
            .unwrap();
        assert_eq!(built.sql, "UPDATE `users` SET `active` = :param1");
    }

    #[test]
    fn update_with_join() {
        let built = builder()
            .table_as("users", "u")
            .join(
                JoinKind::Inner,
                "profiles",
                Some("p"),
                "p.user_id = u.id",
                vec![],
            )
            .unwrap()
            .set_expr("u.active", "0")
            .and_where("p.deleted = ?", vec![Value::Bool(true)])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "UPDATE `users` AS `u` INNER JOIN `profiles` AS `p` ON p.user_id = u.id \
             SET `u`.`active` = 0 WHERE p.deleted = :param1"
        );
    }
}
