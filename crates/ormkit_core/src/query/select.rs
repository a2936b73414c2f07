use super::clauses::{
    check_alias_references, ConditionGroup, Conjunction, GroupBuilder, Join, JoinKind, OrderBy,
    SortOrder, TableRef,
};
use super::{rewrite_placeholders, BuiltQuery};
use crate::dialect::SqlDialect;
use crate::driver::{Connection, Deadline, RowSet};
use crate::sql_format;
use crate::{OrmError, ParameterBag, Value};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct SelectExpr {
    expr: String,
    alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnionKind {
    Distinct,
    All,
}

#[derive(Debug, Clone)]
struct Cte {
    name: String,
    query: BuiltQuery,
    recursive: bool,
}

/// SELECT builder: projection, FROM/JOIN, WHERE tree, GROUP BY/HAVING,
/// ORDER BY, LIMIT/OFFSET, UNION and CTEs.
pub struct SelectBuilder {
    dialect: Arc<dyn SqlDialect>,
    params: ParameterBag,
    columns: Vec<SelectExpr>,
    from: Vec<TableRef>,
    joins: Vec<Join>,
    where_clause: ConditionGroup,
    group_by: Vec<String>,
    having: ConditionGroup,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    unions: Vec<(UnionKind, BuiltQuery)>,
    ctes: Vec<Cte>,
}

impl SelectBuilder {
    pub(crate) fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            params: ParameterBag::new(),
            columns: Vec::new(),
            from: Vec::new(),
            joins: Vec::new(),
            where_clause: ConditionGroup::default(),
            group_by: Vec::new(),
            having: ConditionGroup::default(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            unions: Vec::new(),
            ctes: Vec::new(),
        }
    }

    /// Append projection expressions. Duplicates are preserved in order;
    /// `*` is allowed.
    pub fn select(mut self, exprs: &[&str]) -> Self {
        for expr in exprs {
            self.columns.push(SelectExpr {
                expr: (*expr).to_string(),
                alias: None,
            });
        }
        self
    }

    /// Append one aliased projection expression.
    pub fn select_as(mut self, expr: &str, alias: &str) -> Self {
        self.columns.push(SelectExpr {
            expr: expr.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.from.push(TableRef::new(table, None));
        self
    }

    pub fn from_as(mut self, table: &str, alias: &str) -> Self {
        self.from.push(TableRef::new(table, Some(alias.to_string())));
        self
    }

    /// Add a join; `?` markers in the ON expression are resolved against
    /// `params` in positional order at append time.
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

    pub fn inner_join(
        self,
        table: &str,
        alias: Option<&str>,
        on: &str,
        params: Vec<Value>,
    ) -> Result<Self, OrmError> {
        self.join(JoinKind::Inner, table, alias, on, params)
    }

    pub fn left_join(
        self,
        table: &str,
        alias: Option<&str>,
        on: &str,
        params: Vec<Value>,
    ) -> Result<Self, OrmError> {
        self.join(JoinKind::Left, table, alias, on, params)
    }

    pub fn right_join(
        self,
        table: &str,
        alias: Option<&str>,
        on: &str,
        params: Vec<Value>,
    ) -> Result<Self, OrmError> {
        self.join(JoinKind::Right, table, alias, on, params)
    }

    /// AND a condition; `?` markers resolved positionally.
    pub fn and_where(mut self, fragment: &str, params: Vec<Value>) -> Result<Self, OrmError> {
        let resolved = self.params.bind_positional(fragment, params)?;
        self.where_clause.push_fragment(Conjunction::And, resolved);
        Ok(self)
    }

    /// OR a condition; `?` markers resolved positionally.
    pub fn or_where(mut self, fragment: &str, params: Vec<Value>) -> Result<Self, OrmError> {
        let resolved = self.params.bind_positional(fragment, params)?;
        self.where_clause.push_fragment(Conjunction::Or, resolved);
        Ok(self)
    }

    /// AND a condition using `:name` markers bound from `params`.
    pub fn and_where_named(mut self, fragment: &str, params: Vec<(&str, Value)>) -> Self {
        for (name, value) in params {
            self.params.add_named(name, value);
        }
        self.where_clause
            .push_fragment(Conjunction::And, fragment.to_string());
        self
    }

    /// AND a nested group of conditions.
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

    pub fn group_by(mut self, expr: &str) -> Self {
        self.group_by.push(expr.to_string());
        self
    }

    pub fn and_having(mut self, fragment: &str, params: Vec<Value>) -> Result<Self, OrmError> {
        let resolved = self.params.bind_positional(fragment, params)?;
        self.having.push_fragment(Conjunction::And, resolved);
        Ok(self)
    }

    /// Append an ORDER BY term; later calls append.
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

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Combine with another built SELECT. ORDER BY and LIMIT on this builder
    /// apply to the whole union.
    pub fn union(mut self, other: BuiltQuery) -> Self {
        self.unions.push((UnionKind::Distinct, other));
        self
    }

    pub fn union_all(mut self, other: BuiltQuery) -> Self {
        self.unions.push((UnionKind::All, other));
        self
    }

    /// Attach a named sub-query usable by name in the main query.
    pub fn with_cte(mut self, name: &str, query: BuiltQuery) -> Self {
        self.ctes.push(Cte {
            name: name.to_string(),
            query,
            recursive: false,
        });
        self
    }

    pub fn with_recursive_cte(mut self, name: &str, query: BuiltQuery) -> Self {
        self.ctes.push(Cte {
            name: name.to_string(),
            query,
            recursive: true,
        });
        self
    }

    /// Names visible to expressions: FROM/JOIN tables and aliases plus CTEs.
    fn known_names(&self) -> HashSet<String> {
        let mut known: HashSet<String> = HashSet::new();
        for table in &self.from {
            known.insert(table.exposed_name().to_string());
        }
        for join in &self.joins {
            known.insert(join.table.exposed_name().to_string());
        }
        for cte in &self.ctes {
            known.insert(cte.name.clone());
        }
        known
    }

    fn check_aliases(&self) -> Result<(), OrmError> {
        let known = self.known_names();
        let column_exprs = self.columns.iter().map(|c| c.expr.as_str());
        let join_ons = self.joins.iter().map(|j| j.on.as_str());
        let where_fragments = self.where_clause.fragments().into_iter();
        let having_fragments = self.having.fragments().into_iter();
        let group_exprs = self.group_by.iter().map(String::as_str);
        let order_exprs = self.order_by.iter().map(|o| o.expr.as_str());

        check_alias_references(
            column_exprs
                .chain(join_ons)
                .chain(where_fragments)
                .chain(having_fragments)
                .chain(group_exprs)
                .chain(order_exprs),
            &known,
        )
    }

    pub fn to_sql(&self) -> Result<BuiltQuery, OrmError> {
        self.check_aliases()?;

        let dialect = self.dialect.as_ref();
        let mut params = self.params.clone();
        let mut sql = String::new();

        if !self.ctes.is_empty() {
            let recursive = self.ctes.iter().any(|c| c.recursive);
            sql.push_str(if recursive { "WITH RECURSIVE " } else { "WITH " });
            let rendered: Result<Vec<String>, OrmError> = self
                .ctes
                .iter()
                .map(|cte| {
                    let renames = params.absorb(&cte.query.parameters);
                    let body = rewrite_placeholders(&cte.query.sql, &renames);
                    Ok(format!(
                        "{} AS ({})",
                        dialect.quote_identifier(&cte.name),
                        body
                    ))
                })
                .collect();
            sql.push_str(&rendered?.join(", "));
            sql.push(' ');
        }

        let mut body = String::from("SELECT ");
        if self.columns.is_empty() {
            body.push('*');
        } else {
            let rendered: Vec<String> = self
                .columns
                .iter()
                .map(|c| match &c.alias {
                    Some(alias) => sql_format::format_alias(&c.expr, alias),
                    None => dialect.quote_identifier(&c.expr),
                })
                .collect();
            body.push_str(&rendered.join(", "));
        }

        if !self.from.is_empty() {
            body.push_str(" FROM ");
            let tables: Vec<String> = self.from.iter().map(|t| t.render(dialect)).collect();
            body.push_str(&tables.join(", "));
        } else if !self.joins.is_empty() {
            return Err(OrmError::query_failed("JOIN requires a FROM table"));
        }

        for join in &self.joins {
            body.push(' ');
            body.push_str(&join.render(dialect));
        }

        if let Some(where_sql) = self.where_clause.render() {
            body.push_str(" WHERE ");
            body.push_str(&where_sql);
        }

        if !self.group_by.is_empty() {
            body.push_str(" GROUP BY ");
            let exprs: Vec<String> = self
                .group_by
                .iter()
                .map(|e| dialect.quote_identifier(e))
                .collect();
            body.push_str(&exprs.join(", "));
        }

        if let Some(having_sql) = self.having.render() {
            body.push_str(" HAVING ");
            body.push_str(&having_sql);
        }

        let tail = self.render_tail(dialect);

        if self.unions.is_empty() {
            sql.push_str(&body);
            sql.push_str(&tail);
        } else {
            // ORDER BY and LIMIT apply to the whole union.
            sql.push('(');
            sql.push_str(&body);
            sql.push(')');
            for (kind, query) in &self.unions {
                let renames = params.absorb(&query.parameters);
                let member = rewrite_placeholders(&query.sql, &renames);
                sql.push_str(match kind {
                    UnionKind::Distinct => " UNION (",
                    UnionKind::All => " UNION ALL (",
                });
                sql.push_str(&member);
                sql.push(')');
            }
            sql.push_str(&tail);
        }

        Ok(BuiltQuery::new(sql, params))
    }

    fn render_tail(&self, dialect: &dyn SqlDialect) -> String {
        let mut tail = String::new();
        if !self.order_by.is_empty() {
            tail.push_str(" ORDER BY ");
            let terms: Vec<String> = self.order_by.iter().map(|o| o.render(dialect)).collect();
            tail.push_str(&terms.join(", "));
        }
        if let Some(limit) = self.limit {
            tail.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            tail.push_str(&format!(" OFFSET {}", offset));
        }
        tail
    }

    pub fn fetch(
        &self,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
    ) -> Result<RowSet, OrmError> {
        self.to_sql()?.fetch(conn, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::MysqlDialect;

    fn builder() -> SelectBuilder {
        SelectBuilder::new(Arc::new(MysqlDialect))
    }

    #[test]
    fn renders_basic_select() {
        let built = builder()
            .select(&["id", "name"])
            .from("users")
            .to_sql()
            .unwrap();
        assert_eq!(built.sql, "SELECT `id`, `name` FROM `users`");
        assert!(built.parameters.is_empty());
    }

    #[test]
    fn star_and_duplicates_are_preserved() {
        let built = builder()
            .select(&["*", "id", "id"])
            .from("users")
            .to_sql()
            .unwrap();
        assert_eq!(built.sql, "SELECT *, `id`, `id` FROM `users`");
    }

    #[test]
    fn where_markers_bind_positionally() {
        let built = builder()
            .select(&["id"])
            .from("users")
            .and_where("name = ?", vec![Value::Text("A".into())])
            .unwrap()
            .and_where("age > ?", vec![Value::Int(18)])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "SELECT `id` FROM `users` WHERE name = :param1 AND age > :param2"
        );
        assert_eq!(built.parameters.len(), 2);
    }

    #[test]
    fn or_where_uses_or_connector() {
        let built = builder()
            .select(&["id"])
            .from("users")
            .and_where("a = ?", vec![Value::Int(1)])
            .unwrap()
            .or_where("b = ?", vec![Value::Int(2)])
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(built.sql.ends_with("WHERE a = :param1 OR b = :param2"));
    }

    #[test]
    fn join_with_alias_and_params() {
        let built = builder()
            .select(&["u.id", "p.bio"])
            .from_as("users", "u")
            .left_join(
                "profiles",
                Some("p"),
                "p.user_id = u.id AND p.active = ?",
                vec![Value::Bool(true)],
            )
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "SELECT `u`.`id`, `p`.`bio` FROM `users` AS `u` \
             LEFT JOIN `profiles` AS `p` ON p.user_id = u.id AND p.active = :param1"
        );
    }

    #[test]
    fn unknown_alias_fails_at_build_time() {
        let err = builder()
            .select(&["x.id"])
            .from_as("users", "u")
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownAlias(a) if a == "x"));
    }

    #[test]
    fn group_by_having_order_limit() {
        let built = builder()
            .select_as("COUNT(*)", "total")
            .select(&["status"])
            .from("orders")
            .group_by("status")
            .and_having("COUNT(*) > ?", vec![Value::Int(5)])
            .unwrap()
            .add_order_by("status", SortOrder::Desc)
            .limit(10)
            .offset(20)
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "SELECT COUNT(*) AS `total`, `status` FROM `orders` GROUP BY `status` \
             HAVING COUNT(*) > :param1 ORDER BY `status` DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn union_wraps_members_and_applies_tail_to_whole() {
        let other = builder()
            .select(&["id"])
            .from("archived")
            .and_where("id > ?", vec![Value::Int(10)])
            .unwrap()
            .to_sql()
            .unwrap();

        let built = builder()
            .select(&["id"])
            .from("users")
            .and_where("id > ?", vec![Value::Int(1)])
            .unwrap()
            .union(other)
            .add_order_by("id", SortOrder::Asc)
            .limit(5)
            .to_sql()
            .unwrap();

        assert_eq!(
            built.sql,
            "(SELECT `id` FROM `users` WHERE id > :param1) UNION \
             (SELECT `id` FROM `archived` WHERE id > :param2) ORDER BY `id` ASC LIMIT 5"
        );
        assert_eq!(built.parameters.len(), 2);
        assert_eq!(
            built.parameters.get("param2").unwrap().value,
            Value::Int(10)
        );
    }

    #[test]
    fn cte_is_referencable_by_name() {
        let cte = builder()
            .select(&["id"])
            .from("events")
            .and_where("kind = ?", vec![Value::Text("login".into())])
            .unwrap()
            .to_sql()
            .unwrap();

        let built = builder()
            .select(&["recent.id"])
            .from("recent")
            .with_cte("recent", cte)
            .to_sql()
            .unwrap();

        assert_eq!(
            built.sql,
            "WITH `recent` AS (SELECT `id` FROM `events` WHERE kind = :param1) \
             SELECT `recent`.`id` FROM `recent`"
        );
    }

    #[test]
    fn nested_where_groups() {
        let built = builder()
            .select(&["id"])
            .from("users")
            .and_where("active = ?", vec![Value::Bool(true)])
            .unwrap()
            .where_group(Conjunction::And, |g| {
                g.condition(Conjunction::And, "role = ?", vec![Value::Text("a".into())])?;
                g.condition(Conjunction::Or, "role = ?", vec![Value::Text("b".into())])?;
                Ok(())
            })
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(built
            .sql
            .ends_with("WHERE active = :param1 AND (role = :param2 OR role = :param3)"));
    }
}
