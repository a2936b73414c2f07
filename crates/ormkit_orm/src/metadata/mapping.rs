//! Declarative entity mappings.
//!
//! The builder surface below is the programmatic equivalent of entity
//! annotations: each mapping names the table binding, the columns with
//! their SQL types, and the relations with their cascade and foreign-key
//! settings. The registry compiles mappings into immutable descriptors.

use super::types::{ColumnType, KeyRole, ReferentialAction};
use ormkit_core::Value;

#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub property: String,
    /// Database column name; defaults to the property name verbatim.
    pub name: Option<String>,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub scale: Option<u32>,
    pub unsigned: bool,
    pub nullable: bool,
    pub default_value: Option<Value>,
    pub extra: Option<String>,
    pub key: KeyRole,
    pub choices: Vec<String>,
}

impl ColumnMapping {
    pub fn new(property: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            property: property.into(),
            name: None,
            column_type,
            length: None,
            scale: None,
            unsigned: false,
            nullable: true,
            default_value: None,
            extra: None,
            key: KeyRole::None,
            choices: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.key = KeyRole::Primary;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.key = KeyRole::Unique;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.key = KeyRole::Multiple;
        self
    }

    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.choices = choices.iter().map(|c| (*c).to_string()).collect();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKeyMapping {
    pub name: Option<String>,
    pub referenced_column: Option<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub nullable: bool,
}

impl Default for ForeignKeyMapping {
    fn default() -> Self {
        Self {
            name: None,
            referenced_column: None,
            on_delete: ReferentialAction::default(),
            on_update: ReferentialAction::default(),
            nullable: true,
        }
    }
}

impl ForeignKeyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_referenced_column(mut self, column: impl Into<String>) -> Self {
        self.referenced_column = Some(column.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone)]
pub enum RelationKindMapping {
    OneToOne,
    OneToMany { mapped_by: String },
    ManyToOne,
    ManyToMany { mapped_by: Option<String> },
}

#[derive(Debug, Clone)]
pub struct RelationMapping {
    pub property: String,
    pub target: String,
    pub kind: RelationKindMapping,
    pub cascade_persist: bool,
    pub cascade_remove: bool,
    /// Owning-side foreign key column override; defaults to
    /// `<property>_id`.
    pub column: Option<String>,
    pub foreign_key: Option<ForeignKeyMapping>,
    pub join_table: Option<String>,
    pub join_column: Option<String>,
    pub inverse_join_column: Option<String>,
}

impl RelationMapping {
    fn new(property: impl Into<String>, target: impl Into<String>, kind: RelationKindMapping) -> Self {
        Self {
            property: property.into(),
            target: target.into(),
            kind,
            cascade_persist: false,
            cascade_remove: false,
            column: None,
            foreign_key: None,
            join_table: None,
            join_column: None,
            inverse_join_column: None,
        }
    }

    pub fn one_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, target, RelationKindMapping::OneToOne)
    }

    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, target, RelationKindMapping::ManyToOne)
    }

    pub fn one_to_many(
        property: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::new(
            property,
            target,
            RelationKindMapping::OneToMany {
                mapped_by: mapped_by.into(),
            },
        )
    }

    pub fn many_to_many(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            property,
            target,
            RelationKindMapping::ManyToMany { mapped_by: None },
        )
    }

    pub fn many_to_many_mapped_by(
        property: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::new(
            property,
            target,
            RelationKindMapping::ManyToMany {
                mapped_by: Some(mapped_by.into()),
            },
        )
    }

    pub fn cascade_persist(mut self) -> Self {
        self.cascade_persist = true;
        self
    }

    pub fn cascade_remove(mut self) -> Self {
        self.cascade_remove = true;
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKeyMapping) -> Self {
        self.foreign_key = Some(fk);
        self
    }

    pub fn with_join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    pub fn with_join_columns(
        mut self,
        join_column: impl Into<String>,
        inverse_join_column: impl Into<String>,
    ) -> Self {
        self.join_column = Some(join_column.into());
        self.inverse_join_column = Some(inverse_join_column.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum PropertyMapping {
    Column(ColumnMapping),
    Relation(RelationMapping),
}

impl PropertyMapping {
    pub fn property(&self) -> &str {
        match self {
            PropertyMapping::Column(c) => &c.property,
            PropertyMapping::Relation(r) => &r.property,
        }
    }
}

/// Declarative mapping for one entity type, in declaration order.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub entity_name: String,
    pub table: Option<String>,
    pub repository: Option<String>,
    pub auto_increment: Option<u64>,
    pub properties: Vec<PropertyMapping>,
}

impl EntityMapping {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            table: None,
            repository: None,
            auto_increment: None,
            properties: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_auto_increment(mut self, seed: u64) -> Self {
        self.auto_increment = Some(seed);
        self
    }

    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.properties.push(PropertyMapping::Column(column));
        self
    }

    pub fn relation(mut self, relation: RelationMapping) -> Self {
        self.properties.push(PropertyMapping::Relation(relation));
        self
    }

    /// The mapping's primary column, if declared.
    pub fn primary_column(&self) -> Option<&ColumnMapping> {
        self.properties.iter().find_map(|p| match p {
            PropertyMapping::Column(c) if c.key == KeyRole::Primary => Some(c),
            _ => None,
        })
    }
}
