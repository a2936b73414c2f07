use ormkit_core::Value;
use serde::{Deserialize, Serialize};

/// Logical column types, MySQL-flavoured.
///
/// `NUMERIC` and `REAL` parse as synonyms of `Decimal` and `Double`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    MediumInt,
    Int,
    BigInt,
    Decimal,
    Float,
    Double,
    Char,
    VarChar,
    TinyText,
    Text,
    MediumText,
    LongText,
    Binary,
    VarBinary,
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Boolean,
    Enum,
    Set,
    Json,
    Geometry,
    Point,
    LineString,
    Polygon,
}

impl ColumnType {
    /// SQL keyword for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::TinyInt => "tinyint",
            ColumnType::SmallInt => "smallint",
            ColumnType::MediumInt => "mediumint",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Decimal => "decimal",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Char => "char",
            ColumnType::VarChar => "varchar",
            ColumnType::TinyText => "tinytext",
            ColumnType::Text => "text",
            ColumnType::MediumText => "mediumtext",
            ColumnType::LongText => "longtext",
            ColumnType::Binary => "binary",
            ColumnType::VarBinary => "varbinary",
            ColumnType::TinyBlob => "tinyblob",
            ColumnType::Blob => "blob",
            ColumnType::MediumBlob => "mediumblob",
            ColumnType::LongBlob => "longblob",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Time => "time",
            ColumnType::Year => "year",
            ColumnType::Boolean => "tinyint",
            ColumnType::Enum => "enum",
            ColumnType::Set => "set",
            ColumnType::Json => "json",
            ColumnType::Geometry => "geometry",
            ColumnType::Point => "point",
            ColumnType::LineString => "linestring",
            ColumnType::Polygon => "polygon",
        }
    }

    /// Parse a SQL type keyword, folding synonyms.
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        let base = lower
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or("");
        Some(match base {
            "tinyint" => ColumnType::TinyInt,
            "smallint" => ColumnType::SmallInt,
            "mediumint" => ColumnType::MediumInt,
            "int" | "integer" => ColumnType::Int,
            "bigint" => ColumnType::BigInt,
            "decimal" | "numeric" => ColumnType::Decimal,
            "float" => ColumnType::Float,
            "double" | "real" => ColumnType::Double,
            "char" => ColumnType::Char,
            "varchar" => ColumnType::VarChar,
            "tinytext" => ColumnType::TinyText,
            "text" => ColumnType::Text,
            "mediumtext" => ColumnType::MediumText,
            "longtext" => ColumnType::LongText,
            "binary" => ColumnType::Binary,
            "varbinary" => ColumnType::VarBinary,
            "tinyblob" => ColumnType::TinyBlob,
            "blob" => ColumnType::Blob,
            "mediumblob" => ColumnType::MediumBlob,
            "longblob" => ColumnType::LongBlob,
            "date" => ColumnType::Date,
            "datetime" => ColumnType::DateTime,
            "timestamp" => ColumnType::Timestamp,
            "time" => ColumnType::Time,
            "year" => ColumnType::Year,
            "boolean" | "bool" => ColumnType::Boolean,
            "enum" => ColumnType::Enum,
            "set" => ColumnType::Set,
            "json" => ColumnType::Json,
            "geometry" => ColumnType::Geometry,
            "point" => ColumnType::Point,
            "linestring" => ColumnType::LineString,
            "polygon" => ColumnType::Polygon,
            _ => return None,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ColumnType::TinyInt
                | ColumnType::SmallInt
                | ColumnType::MediumInt
                | ColumnType::Int
                | ColumnType::BigInt
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, ColumnType::Float | ColumnType::Double)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date
                | ColumnType::DateTime
                | ColumnType::Timestamp
                | ColumnType::Time
                | ColumnType::Year
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            ColumnType::Binary
                | ColumnType::VarBinary
                | ColumnType::TinyBlob
                | ColumnType::Blob
                | ColumnType::MediumBlob
                | ColumnType::LongBlob
        )
    }

    /// Length the type renders with when none is declared.
    pub fn default_length(&self) -> Option<u32> {
        match self {
            ColumnType::VarChar => Some(255),
            ColumnType::Char => Some(1),
            ColumnType::Boolean => Some(1),
            _ => None,
        }
    }
}

/// Key role of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyRole {
    #[default]
    None,
    Primary,
    Unique,
    Multiple,
}

/// Referential action on a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    #[default]
    NoAction,
    Restrict,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CASCADE" => ReferentialAction::Cascade,
            "SET NULL" => ReferentialAction::SetNull,
            "RESTRICT" => ReferentialAction::Restrict,
            "SET DEFAULT" => ReferentialAction::SetDefault,
            _ => ReferentialAction::NoAction,
        }
    }

    /// Whether this rule blocks deleting the referenced row while a
    /// referrer exists.
    pub fn blocks_referenced_delete(&self) -> bool {
        matches!(self, ReferentialAction::Restrict | ReferentialAction::NoAction)
    }
}

/// Resolved column metadata for one mapped property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Property this column is mapped from.
    pub property: String,
    /// Database column name.
    pub name: String,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub scale: Option<u32>,
    pub unsigned: bool,
    pub nullable: bool,
    pub default_value: Option<Value>,
    /// Modifier such as `auto_increment` or `on update current_timestamp`.
    pub extra: Option<String>,
    pub key: KeyRole,
    /// Members for enum/set types.
    pub choices: Vec<String>,
}

impl ColumnDescriptor {
    pub fn is_auto_increment(&self) -> bool {
        self.extra
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("auto_increment"))
    }
}

/// Resolved foreign key carried by an owning-side relation property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint name; derived as `fk_<table>_<column>_<referenced-table>`
    /// when not declared.
    pub constraint_name: String,
    /// Database column holding the key.
    pub column: String,
    pub column_type: ColumnType,
    pub unsigned: bool,
    pub nullable: bool,
    pub referenced_entity: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// Fields shared by every relation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationCommon {
    pub target: String,
    pub cascade_persist: bool,
    pub cascade_remove: bool,
}

/// Tagged relation variant; kind-specific fields live in the arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Relation {
    OneToOne {
        common: RelationCommon,
        /// Whether this side carries the foreign key.
        owning: bool,
    },
    OneToMany {
        common: RelationCommon,
        /// Property on the target that owns the relation.
        mapped_by: String,
    },
    ManyToOne {
        common: RelationCommon,
    },
    ManyToMany {
        common: RelationCommon,
        mapped_by: Option<String>,
        join_table: String,
        join_column: String,
        inverse_join_column: String,
    },
}

impl Relation {
    pub fn common(&self) -> &RelationCommon {
        match self {
            Relation::OneToOne { common, .. }
            | Relation::OneToMany { common, .. }
            | Relation::ManyToOne { common }
            | Relation::ManyToMany { common, .. } => common,
        }
    }

    pub fn target(&self) -> &str {
        &self.common().target
    }

    /// Whether this side carries the foreign key column.
    pub fn is_owning(&self) -> bool {
        match self {
            Relation::OneToOne { owning, .. } => *owning,
            Relation::ManyToOne { .. } => true,
            Relation::OneToMany { .. } => false,
            Relation::ManyToMany { mapped_by, .. } => mapped_by.is_none(),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Relation::OneToMany { .. } | Relation::ManyToMany { .. })
    }
}

/// Immutable, fully resolved metadata for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Fully qualified entity name, unique across the registry.
    pub entity_name: String,
    pub table_name: String,
    /// Custom repository type name, if declared.
    pub repository: Option<String>,
    pub auto_increment_seed: Option<u64>,
    /// Property name to column, in declaration order.
    pub columns: indexmap::IndexMap<String, ColumnDescriptor>,
    /// Property name to foreign key, for owning-side relation properties.
    pub foreign_keys: indexmap::IndexMap<String, ForeignKeyDescriptor>,
    /// Property name to relation, in declaration order.
    pub relations: indexmap::IndexMap<String, Relation>,
    /// Property holding the primary key column.
    pub primary_property: String,
}

impl EntityDescriptor {
    pub fn primary_column(&self) -> &ColumnDescriptor {
        &self.columns[&self.primary_property]
    }

    pub fn column_for_property(&self, property: &str) -> Option<&ColumnDescriptor> {
        self.columns.get(property)
    }

    pub fn property_for_column(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, c)| c.name == column)
            .map(|(p, _)| p.as_str())
    }

    /// Owning-side relation properties, with their foreign keys.
    pub fn owning_relations(&self) -> impl Iterator<Item = (&str, &Relation, &ForeignKeyDescriptor)> {
        self.relations.iter().filter_map(|(property, relation)| {
            let fk = self.foreign_keys.get(property)?;
            Some((property.as_str(), relation, fk))
        })
    }
}
