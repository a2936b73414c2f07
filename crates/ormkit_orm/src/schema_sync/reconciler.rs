use super::desired::{build_desired_schema, ColumnDefinition, TableDefinition};
use super::operations::DdlOperation;
use super::runner::MIGRATION_LOG_TABLE;
use crate::metadata::{MetadataRegistry, ReferentialAction};
use ormkit_core::{ColumnInfo, Connection, ForeignKeyInfo, IndexInfo, OrmError, Value};
use std::collections::{BTreeMap, HashSet};

struct CurrentTable {
    columns: Vec<ColumnInfo>,
    indexes: Vec<IndexInfo>,
    foreign_keys: Vec<ForeignKeyInfo>,
}

/// Computes the ordered DDL that transforms the live schema into the
/// descriptor-derived schema. Applying the result and re-planning yields an
/// empty list.
pub struct SchemaReconciler<'a> {
    registry: &'a MetadataRegistry,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(registry: &'a MetadataRegistry) -> Self {
        Self { registry }
    }

    pub fn plan(&self, conn: &mut dyn Connection) -> Result<Vec<DdlOperation>, OrmError> {
        let desired = build_desired_schema(self.registry)?;

        let mut current: BTreeMap<String, CurrentTable> = BTreeMap::new();
        for table in conn.list_tables()? {
            if table == MIGRATION_LOG_TABLE {
                continue;
            }
            let info = conn.describe_table(&table)?;
            let indexes = conn.list_indexes(&table)?;
            let foreign_keys = conn.list_foreign_keys(&table)?;
            current.insert(
                table,
                CurrentTable {
                    columns: info.columns,
                    indexes,
                    foreign_keys,
                },
            );
        }

        let mut drop_fks = Vec::new();
        let mut drop_indexes = Vec::new();
        let mut drop_columns = Vec::new();
        let mut drop_tables = Vec::new();
        let mut creates = Vec::new();
        let mut add_columns = Vec::new();
        let mut modify_columns = Vec::new();
        let mut create_indexes = Vec::new();
        let mut add_fks = Vec::new();

        for (table_name, cur) in &current {
            let desired_table = desired.get(table_name);

            for fk in &cur.foreign_keys {
                let keep = desired_table.is_some_and(|d| {
                    desired.contains_key(&fk.referenced_table)
                        && d.foreign_keys.iter().any(|df| fk_matches(df, fk))
                });
                if !keep {
                    drop_fks.push(DdlOperation::DropForeignKey {
                        table: table_name.clone(),
                        constraint: fk.constraint_name.clone(),
                    });
                }
            }

            let Some(d) = desired_table else {
                drop_tables.push(DdlOperation::DropTable {
                    table: table_name.clone(),
                });
                continue;
            };

            // MySQL backs each FK with an index named after the
            // constraint; those are managed by the FK phases.
            let fk_index_names: HashSet<&str> = cur
                .foreign_keys
                .iter()
                .map(|fk| fk.constraint_name.as_str())
                .collect();

            for index in &cur.indexes {
                if index.is_primary || fk_index_names.contains(index.name.as_str()) {
                    continue;
                }
                let keep = d
                    .indexes
                    .iter()
                    .any(|di| di.name == index.name && index_matches(di, index));
                if !keep {
                    drop_indexes.push(DdlOperation::DropIndex {
                        table: table_name.clone(),
                        index: index.name.clone(),
                    });
                }
            }

            for di in &d.indexes {
                let exists = cur
                    .indexes
                    .iter()
                    .any(|ci| ci.name == di.name && index_matches(di, ci));
                if !exists {
                    create_indexes.push(DdlOperation::CreateIndex {
                        table: table_name.clone(),
                        index: di.clone(),
                    });
                }
            }

            // Columns diff by name, not position.
            for column in &cur.columns {
                match d.column(&column.name) {
                    None => drop_columns.push(DdlOperation::DropColumn {
                        table: table_name.clone(),
                        column: column.name.clone(),
                    }),
                    Some(dc) => {
                        if column_differs(dc, column) {
                            modify_columns.push(DdlOperation::ModifyColumn {
                                table: table_name.clone(),
                                column: dc.clone(),
                            });
                        }
                    }
                }
            }
            for dc in &d.columns {
                if !cur.columns.iter().any(|c| c.name == dc.name) {
                    add_columns.push(DdlOperation::AddColumn {
                        table: table_name.clone(),
                        column: dc.clone(),
                    });
                }
            }

            for df in &d.foreign_keys {
                let exists = cur.foreign_keys.iter().any(|cf| fk_matches(df, cf));
                if !exists {
                    add_fks.push(DdlOperation::AddForeignKey {
                        table: table_name.clone(),
                        foreign_key: df.clone(),
                    });
                }
            }
        }

        for (name, d) in &desired {
            if current.contains_key(name) {
                continue;
            }
            creates.push(DdlOperation::CreateTable(d.clone()));
            if let Some(seed) = d.auto_increment {
                creates.push(DdlOperation::SetAutoIncrement {
                    table: name.clone(),
                    value: seed,
                });
            }
            for df in &d.foreign_keys {
                add_fks.push(DdlOperation::AddForeignKey {
                    table: name.clone(),
                    foreign_key: df.clone(),
                });
            }
        }

        let mut operations = Vec::new();
        operations.extend(drop_fks);
        operations.extend(drop_indexes);
        operations.extend(drop_columns);
        operations.extend(drop_tables);
        operations.extend(creates);
        operations.extend(add_columns);
        operations.extend(modify_columns);
        operations.extend(create_indexes);
        operations.extend(add_fks);
        Ok(operations)
    }
}

fn index_matches(desired: &super::desired::IndexDefinition, current: &IndexInfo) -> bool {
    desired.columns == current.columns && desired.unique == current.is_unique
}

fn fk_matches(desired: &super::desired::ForeignKeyDefinition, current: &ForeignKeyInfo) -> bool {
    desired.constraint_name == current.constraint_name
        && desired.column == current.column
        && desired.referenced_table == current.referenced_table
        && desired.referenced_column == current.referenced_column
        && desired.on_delete == ReferentialAction::parse(&current.on_delete)
        && desired.on_update == ReferentialAction::parse(&current.on_update)
}

fn column_differs(desired: &ColumnDefinition, current: &ColumnInfo) -> bool {
    if normalize_type(&desired.render_type()) != normalize_type(&current.column_type) {
        return true;
    }
    if desired.nullable != current.nullable {
        return true;
    }
    if normalize_default(desired.default_value.as_ref().map(render_default).as_deref())
        != normalize_default(current.default_value.as_deref())
    {
        return true;
    }
    normalize_extra(desired.extra.as_deref()) != normalize_extra(Some(&current.extra))
}

fn render_default(value: &Value) -> String {
    match value {
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        other => other.as_display_string(),
    }
}

/// Lowercase and strip integer display widths, so `int(11)` compares equal
/// to `int`.
fn normalize_type(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    for base in ["tinyint", "smallint", "mediumint", "bigint", "int"] {
        if let Some(rest) = lower.strip_prefix(base) {
            if let Some(stripped) = strip_width(rest) {
                return format!("{}{}", base, stripped);
            }
        }
    }
    lower
}

fn strip_width(rest: &str) -> Option<String> {
    if !rest.starts_with('(') {
        return Some(rest.to_string());
    }
    let close = rest.find(')')?;
    if rest[1..close].bytes().all(|b| b.is_ascii_digit()) {
        Some(rest[close + 1..].to_string())
    } else {
        None
    }
}

fn normalize_default(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(value.to_ascii_lowercase())
}

fn normalize_extra(raw: Option<&str>) -> String {
    raw.unwrap_or("").trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ColumnType;

    fn desired_column(column_type: ColumnType) -> ColumnDefinition {
        ColumnDefinition {
            name: "c".to_string(),
            column_type,
            length: None,
            scale: None,
            unsigned: false,
            nullable: true,
            default_value: None,
            extra: None,
            choices: Vec::new(),
        }
    }

    fn current_column(column_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: "c".to_string(),
            column_type: column_type.to_string(),
            nullable: true,
            default_value: None,
            extra: String::new(),
            is_primary_key: false,
            enum_values: None,
        }
    }

    #[test]
    fn integer_display_widths_compare_equal() {
        assert!(!column_differs(
            &desired_column(ColumnType::Int),
            &current_column("int(11)")
        ));
        assert!(!column_differs(
            &desired_column(ColumnType::BigInt),
            &current_column("bigint(20)")
        ));
    }

    #[test]
    fn type_change_is_detected() {
        assert!(column_differs(
            &desired_column(ColumnType::BigInt),
            &current_column("int(11)")
        ));
    }

    #[test]
    fn nullability_change_is_detected() {
        let mut desired = desired_column(ColumnType::Int);
        desired.nullable = false;
        assert!(column_differs(&desired, &current_column("int")));
    }

    #[test]
    fn null_default_representations_compare_equal() {
        assert_eq!(normalize_default(None), None);
        assert_eq!(normalize_default(Some("NULL")), None);
        assert_eq!(normalize_default(Some("")), None);
        assert_eq!(normalize_default(Some("0")), Some("0".to_string()));
    }
}
