use serde::{Deserialize, Serialize};

/// Introspected table: columns, indexes and outbound foreign keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Introspected column, in the shape `information_schema.columns` reports.
///
/// `column_type` is the full rendered type (`varchar(255)`,
/// `int unsigned`, `enum('a','b')`); `extra` carries modifiers such as
/// `auto_increment` or `on update current_timestamp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub extra: String,
    pub is_primary_key: bool,
    pub enum_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub constraint_name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: String,
    pub on_update: String,
}

/// Folds per-column index rows (as reported by `SHOW INDEX`) into grouped
/// index entries, preserving column order within each index.
#[derive(Debug, Default)]
pub struct IndexGroupBuilder {
    order: Vec<String>,
    entries: std::collections::HashMap<String, IndexInfo>,
}

impl IndexGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&mut self, index_name: String, column: String, unique: bool) {
        let entry = self
            .entries
            .entry(index_name.clone())
            .or_insert_with(|| {
                self.order.push(index_name.clone());
                IndexInfo {
                    is_primary: index_name == "PRIMARY",
                    name: index_name,
                    columns: Vec::new(),
                    is_unique: unique,
                }
            });
        entry.columns.push(column);
    }

    pub fn build(mut self) -> Vec<IndexInfo> {
        self.order
            .iter()
            .filter_map(|name| self.entries.remove(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_builder_groups_columns_in_order() {
        let mut builder = IndexGroupBuilder::new();
        builder.add_column("PRIMARY".to_string(), "id".to_string(), true);
        builder.add_column("idx_name".to_string(), "last".to_string(), false);
        builder.add_column("idx_name".to_string(), "first".to_string(), false);

        let indexes = builder.build();
        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].is_primary);
        assert_eq!(indexes[1].columns, vec!["last", "first"]);
    }
}
