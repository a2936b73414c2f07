use super::desired::{ColumnDefinition, ForeignKeyDefinition, IndexDefinition, TableDefinition};
use ormkit_core::sql;

/// One DDL step of a migration, renderable as MySQL-compatible SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlOperation {
    CreateTable(TableDefinition),
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    ModifyColumn {
        table: String,
        column: ColumnDefinition,
    },
    DropColumn {
        table: String,
        column: String,
    },
    CreateIndex {
        table: String,
        index: IndexDefinition,
    },
    DropIndex {
        table: String,
        index: String,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDefinition,
    },
    DropForeignKey {
        table: String,
        constraint: String,
    },
    SetAutoIncrement {
        table: String,
        value: u64,
    },
}

impl DdlOperation {
    pub fn to_sql(&self) -> String {
        match self {
            DdlOperation::CreateTable(table) => render_create_table(table),
            DdlOperation::DropTable { table } => {
                format!("DROP TABLE {};", sql::format_identifier(table))
            }
            DdlOperation::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {};",
                sql::format_identifier(table),
                column.render_definition()
            ),
            DdlOperation::ModifyColumn { table, column } => format!(
                "ALTER TABLE {} MODIFY COLUMN {};",
                sql::format_identifier(table),
                column.render_definition()
            ),
            DdlOperation::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {};",
                sql::format_identifier(table),
                sql::format_identifier(column)
            ),
            DdlOperation::CreateIndex { table, index } => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                let columns: Vec<String> = index
                    .columns
                    .iter()
                    .map(|c| sql::format_identifier(c))
                    .collect();
                format!(
                    "CREATE {}INDEX {} ON {} ({});",
                    unique,
                    sql::format_identifier(&index.name),
                    sql::format_identifier(table),
                    columns.join(", ")
                )
            }
            DdlOperation::DropIndex { table, index } => format!(
                "DROP INDEX {} ON {};",
                sql::format_identifier(index),
                sql::format_identifier(table)
            ),
            DdlOperation::AddForeignKey { table, foreign_key } => {
                let mut out = format!(
                    "ALTER TABLE {}\n    ADD CONSTRAINT {}\n    FOREIGN KEY ({})\n    REFERENCES {} ({})",
                    sql::format_identifier(table),
                    sql::format_identifier(&foreign_key.constraint_name),
                    sql::format_identifier(&foreign_key.column),
                    sql::format_identifier(&foreign_key.referenced_table),
                    sql::format_identifier(&foreign_key.referenced_column)
                );
                out.push_str(&format!("\n    ON DELETE {}", foreign_key.on_delete.as_sql()));
                out.push_str(&format!("\n    ON UPDATE {}", foreign_key.on_update.as_sql()));
                out.push(';');
                out
            }
            DdlOperation::DropForeignKey { table, constraint } => format!(
                "ALTER TABLE {} DROP FOREIGN KEY {};",
                sql::format_identifier(table),
                sql::format_identifier(constraint)
            ),
            DdlOperation::SetAutoIncrement { table, value } => format!(
                "ALTER TABLE {} AUTO_INCREMENT = {};",
                sql::format_identifier(table),
                value
            ),
        }
    }

    /// Short human-readable label for status output.
    pub fn describe(&self) -> String {
        match self {
            DdlOperation::CreateTable(table) => format!("create table {}", table.name),
            DdlOperation::DropTable { table } => format!("drop table {}", table),
            DdlOperation::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            DdlOperation::ModifyColumn { table, column } => {
                format!("modify column {}.{}", table, column.name)
            }
            DdlOperation::DropColumn { table, column } => {
                format!("drop column {}.{}", table, column)
            }
            DdlOperation::CreateIndex { table, index } => {
                format!("create index {} on {}", index.name, table)
            }
            DdlOperation::DropIndex { table, index } => {
                format!("drop index {} on {}", index, table)
            }
            DdlOperation::AddForeignKey { table, foreign_key } => {
                format!("add foreign key {} on {}", foreign_key.constraint_name, table)
            }
            DdlOperation::DropForeignKey { table, constraint } => {
                format!("drop foreign key {} on {}", constraint, table)
            }
            DdlOperation::SetAutoIncrement { table, value } => {
                format!("set auto_increment of {} to {}", table, value)
            }
        }
    }
}

/// CREATE TABLE with columns, PRIMARY KEY and inline indexes. Foreign keys
/// are added in their own post-phase so table creation never races
/// constraints.
fn render_create_table(table: &TableDefinition) -> String {
    let mut clauses: Vec<String> = table
        .columns
        .iter()
        .map(|c| c.render_definition())
        .collect();

    if !table.primary_key.is_empty() {
        let columns: Vec<String> = table
            .primary_key
            .iter()
            .map(|c| sql::format_identifier(c))
            .collect();
        clauses.push(format!("PRIMARY KEY ({})", columns.join(", ")));
    }

    for index in &table.indexes {
        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|c| sql::format_identifier(c))
            .collect();
        let kind = if index.unique { "UNIQUE KEY" } else { "KEY" };
        clauses.push(format!(
            "{} {} ({})",
            kind,
            sql::format_identifier(&index.name),
            columns.join(", ")
        ));
    }

    format!(
        "CREATE TABLE {} (\n    {}\n);",
        sql::format_identifier(&table.name),
        clauses.join(",\n    ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnType, ReferentialAction};

    #[test]
    fn renders_create_table() {
        let table = TableDefinition {
            name: "users".to_string(),
            columns: vec![
                ColumnDefinition {
                    name: "id".to_string(),
                    column_type: ColumnType::Int,
                    length: None,
                    scale: None,
                    unsigned: true,
                    nullable: false,
                    default_value: None,
                    extra: Some("auto_increment".to_string()),
                    choices: Vec::new(),
                },
                ColumnDefinition {
                    name: "name".to_string(),
                    column_type: ColumnType::VarChar,
                    length: Some(255),
                    scale: None,
                    unsigned: false,
                    nullable: false,
                    default_value: None,
                    extra: None,
                    choices: Vec::new(),
                },
            ],
            primary_key: vec!["id".to_string()],
            indexes: vec![IndexDefinition {
                name: "uniq_users_name".to_string(),
                columns: vec!["name".to_string()],
                unique: true,
            }],
            foreign_keys: Vec::new(),
            auto_increment: None,
        };

        assert_eq!(
            DdlOperation::CreateTable(table).to_sql(),
            "CREATE TABLE `users` (\n    \
             `id` int unsigned NOT NULL auto_increment,\n    \
             `name` varchar(255) NOT NULL,\n    \
             PRIMARY KEY (`id`),\n    \
             UNIQUE KEY `uniq_users_name` (`name`)\n);"
        );
    }

    #[test]
    fn renders_add_foreign_key() {
        let op = DdlOperation::AddForeignKey {
            table: "posts".to_string(),
            foreign_key: ForeignKeyDefinition {
                constraint_name: "fk_posts_category_id_categories".to_string(),
                column: "category_id".to_string(),
                referenced_table: "categories".to_string(),
                referenced_column: "id".to_string(),
                on_delete: ReferentialAction::Restrict,
                on_update: ReferentialAction::NoAction,
            },
        };
        assert_eq!(
            op.to_sql(),
            "ALTER TABLE `posts`\n    \
             ADD CONSTRAINT `fk_posts_category_id_categories`\n    \
             FOREIGN KEY (`category_id`)\n    \
             REFERENCES `categories` (`id`)\n    \
             ON DELETE RESTRICT\n    \
             ON UPDATE NO ACTION;"
        );
    }

    #[test]
    fn renders_auto_increment_adjustment() {
        let op = DdlOperation::SetAutoIncrement {
            table: "users".to_string(),
            value: 1000,
        };
        assert_eq!(op.to_sql(), "ALTER TABLE `users` AUTO_INCREMENT = 1000;");
    }
}
