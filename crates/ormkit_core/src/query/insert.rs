use super::{rewrite_placeholders, BuiltQuery};
use crate::dialect::SqlDialect;
use crate::driver::{Connection, Deadline};
use crate::{OrmError, ParameterBag, Value};
use std::sync::Arc;

/// INSERT builder.
///
/// Accepts either one or more value rows (multi-row inserts render under a
/// single statement) or a columns-plus-sub-select form.
pub struct InsertBuilder {
    dialect: Arc<dyn SqlDialect>,
    table: Option<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    select: Option<BuiltQuery>,
}

impl std::fmt::Debug for InsertBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertBuilder")
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("rows", &self.rows)
            .field("select", &self.select)
            .finish()
    }
}

impl InsertBuilder {
    pub(crate) fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self {
            dialect,
            table: None,
            columns: Vec::new(),
            rows: Vec::new(),
            select: None,
        }
    }

    pub fn into(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Append one value row. The first row fixes the column set; later rows
    /// must supply the same columns in the same order.
    pub fn values(
        mut self,
        pairs: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, OrmError> {
        let (columns, row): (Vec<String>, Vec<Value>) = pairs.into_iter().unzip();
        if self.columns.is_empty() && self.rows.is_empty() {
            self.columns = columns;
        } else if self.columns != columns {
            return Err(OrmError::query_failed(
                "multi-row INSERT requires identical column sets",
            ));
        }
        self.rows.push(row);
        Ok(self)
    }

    /// Set the target columns for the sub-select form.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Use a built SELECT as the row source.
    pub fn from_select(mut self, query: BuiltQuery) -> Self {
        self.select = Some(query);
        self
    }

    pub fn to_sql(&self) -> Result<BuiltQuery, OrmError> {
        let table = self
            .table
            .as_deref()
            .ok_or_else(|| OrmError::query_failed("INSERT requires a target table"))?;
        if self.columns.is_empty() {
            return Err(OrmError::query_failed("INSERT requires at least one column"));
        }

        let dialect = self.dialect.as_ref();
        let mut params = ParameterBag::new();

        let column_list: Vec<String> = self
            .columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect();

        let mut sql = format!(
            "INSERT INTO {} ({})",
            dialect.quote_identifier(table),
            column_list.join(", ")
        );

        match &self.select {
            Some(select) => {
                if !self.rows.is_empty() {
                    return Err(OrmError::query_failed(
                        "INSERT cannot combine VALUES with a sub-select",
                    ));
                }
                let renames = params.absorb(&select.parameters);
                sql.push(' ');
                sql.push_str(&rewrite_placeholders(&select.sql, &renames));
            }
            None => {
                if self.rows.is_empty() {
                    return Err(OrmError::query_failed("INSERT requires at least one row"));
                }
                sql.push_str(" VALUES ");
                let rendered: Vec<String> = self
                    .rows
                    .iter()
                    .map(|row| {
                        let placeholders: Vec<String> =
                            row.iter().map(|v| params.add(v.clone())).collect();
                        format!("({})", placeholders.join(", "))
                    })
                    .collect();
                sql.push_str(&rendered.join(", "));
            }
        }

        Ok(BuiltQuery::new(sql, params))
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

    fn builder() -> InsertBuilder {
        InsertBuilder::new(Arc::new(MysqlDialect))
    }

    #[test]
    fn renders_single_row_insert() {
        let built = builder()
            .into("users")
            .values(vec![
                ("name".to_string(), Value::Text("A".into())),
                ("email".to_string(), Value::Text("a@x".into())),
            ])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `users` (`name`, `email`) VALUES (:param1, :param2)"
        );
        assert_eq!(built.parameters.len(), 2);
    }

    #[test]
    fn renders_multi_row_insert_under_single_statement() {
        let built = builder()
            .into("users")
            .values(vec![("name".to_string(), Value::Text("A".into()))])
            .unwrap()
            .values(vec![("name".to_string(), Value::Text("B".into()))])
            .unwrap()
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `users` (`name`) VALUES (:param1), (:param2)"
        );
    }

    #[test]
    fn rejects_mismatched_row_columns() {
        let err = builder()
            .into("users")
            .values(vec![("name".to_string(), Value::Text("A".into()))])
            .unwrap()
            .values(vec![("email".to_string(), Value::Text("a@x".into()))])
            .unwrap_err();
        assert!(matches!(err, OrmError::QueryFailed { .. }));
    }

    #[test]
    fn renders_insert_from_select() {
        let select = BuiltQuery::new("SELECT `name` FROM `staging`", ParameterBag::new());
        let built = builder()
            .into("users")
            .columns(&["name"])
            .from_select(select)
            .to_sql()
            .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO `users` (`name`) SELECT `name` FROM `staging`"
        );
    }
}
