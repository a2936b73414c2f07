//! Composable SQL builders.
//!
//! A [`QueryFactory`] dispenses the typed sub-builders (SELECT, INSERT,
//! UPDATE, DELETE) plus a raw-SQL adapter. All of them share the parameter
//! bag and the SQL formatter, and emit [`BuiltQuery`] pairs of SQL and
//! bindings.

mod clauses;
mod delete;
mod insert;
mod raw;
mod select;
mod update;

pub use clauses::{Conjunction, GroupBuilder, JoinKind, SortOrder};
pub use delete::DeleteBuilder;
pub use insert::InsertBuilder;
pub use raw::RawQuery;
pub use select::SelectBuilder;
pub use update::UpdateBuilder;

use crate::dialect::{MysqlDialect, SqlDialect};
use crate::driver::{Connection, Deadline, RowSet};
use crate::{OrmError, ParameterBag, StatementInfo};
use std::sync::Arc;

/// A rendered statement and its parameter bindings.
#[derive(Debug, Clone, Default)]
pub struct BuiltQuery {
    pub sql: String,
    pub parameters: ParameterBag,
}

impl BuiltQuery {
    pub fn new(sql: impl Into<String>, parameters: ParameterBag) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    pub fn statement_info(&self) -> StatementInfo {
        StatementInfo::new(&self.sql).with_parameters(self.parameters.to_vec())
    }

    /// Run as a query and materialise the full result.
    ///
    /// Bindings without a matching placeholder in the SQL fail with
    /// `UnboundParameter` before anything reaches the driver.
    pub fn fetch(
        &self,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
    ) -> Result<RowSet, OrmError> {
        self.parameters.verify_against(&self.sql)?;
        log::debug!("query: {}", self.statement_info());
        let mut cursor = conn.query(&self.sql, &self.parameters, deadline)?;
        RowSet::from_cursor(cursor.as_mut())
    }

    /// Run as a mutation and return the affected row count.
    pub fn execute(
        &self,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
    ) -> Result<u64, OrmError> {
        self.parameters.verify_against(&self.sql)?;
        log::debug!("exec: {}", self.statement_info());
        conn.exec(&self.sql, &self.parameters, deadline)
            .map_err(|e| e.with_statement(self.statement_info()))
    }
}

/// Dispenses sub-builders sharing one dialect.
#[derive(Clone)]
pub struct QueryFactory {
    dialect: Arc<dyn SqlDialect>,
}

impl Default for QueryFactory {
    fn default() -> Self {
        Self {
            dialect: Arc::new(MysqlDialect),
        }
    }
}

impl QueryFactory {
    pub fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    pub fn select(&self) -> SelectBuilder {
        SelectBuilder::new(self.dialect.clone())
    }

    pub fn insert(&self) -> InsertBuilder {
        InsertBuilder::new(self.dialect.clone())
    }

    pub fn update(&self) -> UpdateBuilder {
        UpdateBuilder::new(self.dialect.clone())
    }

    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::new(self.dialect.clone())
    }

    pub fn raw(&self, sql: impl Into<String>) -> RawQuery {
        RawQuery::new(sql)
    }
}

/// Rewrite placeholder names in a SQL string.
///
/// Two-phase (old to temporary token, then token to new) so renames whose
/// old and new namespaces overlap cannot corrupt each other, and
/// longest-first so `:param1` never matches inside `:param10`.
pub(crate) fn rewrite_placeholders(sql: &str, renames: &[(String, String)]) -> String {
    if renames.is_empty() {
        return sql.to_string();
    }

    let mut ordered: Vec<(usize, &(String, String))> = renames.iter().enumerate().collect();
    ordered.sort_by(|a, b| b.1.0.len().cmp(&a.1.0.len()));

    let mut out = sql.to_string();
    for (index, (old, _)) in &ordered {
        out = out.replace(old.as_str(), &format!("\u{1}{}\u{1}", index));
    }
    for (index, (_, new)) in &ordered {
        out = out.replace(&format!("\u{1}{}\u{1}", index), new.as_str());
    }
    out
}
