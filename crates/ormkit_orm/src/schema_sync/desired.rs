use crate::metadata::{
    ColumnDescriptor, ColumnType, EntityDescriptor, ForeignKeyDescriptor, KeyRole,
    MetadataRegistry, ReferentialAction, Relation,
};
use ormkit_core::{sql, OrmError, Value};
use std::collections::BTreeMap;

/// A column as the descriptors imply it should exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub scale: Option<u32>,
    pub unsigned: bool,
    pub nullable: bool,
    pub default_value: Option<Value>,
    pub extra: Option<String>,
    pub choices: Vec<String>,
}

impl ColumnDefinition {
    pub fn from_column(column: &ColumnDescriptor) -> Self {
        Self {
            name: column.name.clone(),
            column_type: column.column_type,
            length: column.length,
            scale: column.scale,
            unsigned: column.unsigned,
            nullable: column.nullable,
            default_value: column.default_value.clone(),
            extra: column.extra.clone(),
            choices: column.choices.clone(),
        }
    }

    pub fn from_foreign_key(fk: &ForeignKeyDescriptor) -> Self {
        Self {
            name: fk.column.clone(),
            column_type: fk.column_type,
            length: None,
            scale: None,
            unsigned: fk.unsigned,
            nullable: fk.nullable,
            default_value: None,
            extra: None,
            choices: Vec::new(),
        }
    }

    /// Rendered SQL type: `varchar(255)`, `decimal(10,2) unsigned`,
    /// `enum('a','b')`.
    pub fn render_type(&self) -> String {
        let mut out = String::from(self.column_type.sql_name());

        match self.column_type {
            ColumnType::Enum | ColumnType::Set => {
                let members: Vec<String> =
                    self.choices.iter().map(|c| sql::quote_string(c)).collect();
                out.push('(');
                out.push_str(&members.join(","));
                out.push(')');
            }
            ColumnType::Decimal => {
                if let Some(length) = self.length {
                    out.push_str(&format!("({},{})", length, self.scale.unwrap_or(0)));
                }
            }
            _ => {
                if !self.column_type.is_integer() {
                    if let Some(length) = self.length.or(self.column_type.default_length()) {
                        out.push_str(&format!("({})", length));
                    }
                }
            }
        }

        if self.unsigned {
            out.push_str(" unsigned");
        }
        out
    }

    /// Full column clause for CREATE/ALTER statements.
    pub fn render_definition(&self) -> String {
        let mut out = format!("{} {}", sql::format_identifier(&self.name), self.render_type());
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            out.push_str(&format!(" DEFAULT {}", sql::format_value(default)));
        }
        if let Some(extra) = &self.extra {
            out.push(' ');
            out.push_str(extra);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    pub constraint_name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeyDefinition {
    pub fn from_descriptor(fk: &ForeignKeyDescriptor) -> Self {
        Self {
            constraint_name: fk.constraint_name.clone(),
            column: fk.column.clone(),
            referenced_table: fk.referenced_table.clone(),
            referenced_column: fk.referenced_column.clone(),
            on_delete: fk.on_delete,
            on_update: fk.on_update,
        }
    }
}

/// A table as the descriptors imply it should exist.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub auto_increment: Option<u64>,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// The descriptor-derived schema: every entity table plus the join tables
/// implied by owning many-to-many relations.
pub fn build_desired_schema(
    registry: &MetadataRegistry,
) -> Result<BTreeMap<String, TableDefinition>, OrmError> {
    let mut tables = BTreeMap::new();

    for descriptor in registry.all_descriptors()? {
        let table = table_for_descriptor(&descriptor);
        tables.insert(table.name.clone(), table);

        for (_, relation) in &descriptor.relations {
            if let Relation::ManyToMany {
                mapped_by: None,
                join_table,
                join_column,
                inverse_join_column,
                common,
            } = relation
            {
                let target = registry.descriptor(&common.target)?;
                let join = join_table_definition(
                    join_table,
                    join_column,
                    inverse_join_column,
                    &descriptor,
                    &target,
                );
                tables.insert(join.name.clone(), join);
            }
        }
    }

    Ok(tables)
}

fn table_for_descriptor(descriptor: &EntityDescriptor) -> TableDefinition {
    let mut columns = Vec::new();
    let mut indexes = Vec::new();
    let mut primary_key = Vec::new();

    for column in descriptor.columns.values() {
        columns.push(ColumnDefinition::from_column(column));
        match column.key {
            KeyRole::Primary => primary_key.push(column.name.clone()),
            KeyRole::Unique => indexes.push(IndexDefinition {
                name: format!("uniq_{}_{}", descriptor.table_name, column.name),
                columns: vec![column.name.clone()],
                unique: true,
            }),
            KeyRole::Multiple => indexes.push(IndexDefinition {
                name: format!("idx_{}_{}", descriptor.table_name, column.name),
                columns: vec![column.name.clone()],
                unique: false,
            }),
            KeyRole::None => {}
        }
    }

    let mut foreign_keys = Vec::new();
    for (_, _, fk) in descriptor.owning_relations() {
        columns.push(ColumnDefinition::from_foreign_key(fk));
        foreign_keys.push(ForeignKeyDefinition::from_descriptor(fk));
    }

    TableDefinition {
        name: descriptor.table_name.clone(),
        columns,
        primary_key,
        indexes,
        foreign_keys,
        auto_increment: descriptor.auto_increment_seed,
    }
}

fn join_table_definition(
    join_table: &str,
    join_column: &str,
    inverse_join_column: &str,
    owner: &EntityDescriptor,
    target: &EntityDescriptor,
) -> TableDefinition {
    let owner_pk = owner.primary_column();
    let target_pk = target.primary_column();

    let key_column = |name: &str, source: &ColumnDescriptor| ColumnDefinition {
        name: name.to_string(),
        column_type: source.column_type,
        length: None,
        scale: None,
        unsigned: source.unsigned,
        nullable: false,
        default_value: None,
        extra: None,
        choices: Vec::new(),
    };

    let fk = |column: &str, table: &str, referenced: &str| ForeignKeyDefinition {
        constraint_name: format!("fk_{}_{}_{}", join_table, column, table).to_lowercase(),
        column: column.to_string(),
        referenced_table: table.to_string(),
        referenced_column: referenced.to_string(),
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    };

    TableDefinition {
        name: join_table.to_string(),
        columns: vec![
            key_column(join_column, owner_pk),
            key_column(inverse_join_column, target_pk),
        ],
        primary_key: vec![join_column.to_string(), inverse_join_column.to_string()],
        indexes: Vec::new(),
        foreign_keys: vec![
            fk(join_column, &owner.table_name, &owner_pk.name),
            fk(inverse_join_column, &target.table_name, &target_pk.name),
        ],
        auto_increment: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(column_type: ColumnType) -> ColumnDefinition {
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

    #[test]
    fn renders_common_types() {
        assert_eq!(column(ColumnType::Int).render_type(), "int");
        assert_eq!(column(ColumnType::VarChar).render_type(), "varchar(255)");

        let mut decimal = column(ColumnType::Decimal);
        decimal.length = Some(10);
        decimal.scale = Some(2);
        assert_eq!(decimal.render_type(), "decimal(10,2)");

        let mut unsigned = column(ColumnType::BigInt);
        unsigned.unsigned = true;
        assert_eq!(unsigned.render_type(), "bigint unsigned");

        let mut status = column(ColumnType::Enum);
        status.choices = vec!["on".to_string(), "off".to_string()];
        assert_eq!(status.render_type(), "enum('on','off')");
    }

    #[test]
    fn renders_column_definition_with_modifiers() {
        let mut c = column(ColumnType::VarChar);
        c.name = "email".to_string();
        c.nullable = false;
        c.default_value = Some(Value::Text("none".to_string()));
        assert_eq!(
            c.render_definition(),
            "`email` varchar(255) NOT NULL DEFAULT 'none'"
        );
    }
}
