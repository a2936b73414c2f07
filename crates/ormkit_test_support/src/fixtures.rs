//! Canned entities covering every relation kind, plus helpers for building
//! scripted result sets and introspection snapshots.

use ormkit_core::{ColumnMeta, ColumnInfo, ForeignKeyInfo, IndexInfo, OrmError, RowSet, TableInfo, Value};
use ormkit_orm::metadata::{
    ColumnMapping, ColumnType, EntityMapping, ForeignKeyMapping, MetadataRegistry,
    ReferentialAction, RelationMapping,
};
use ormkit_orm::schema_sync::TableDefinition;
use ormkit_orm::session::Session;
use ormkit_orm::{Entity, EntityRef, PersistentEntity};
use std::any::Any;
use std::sync::Arc;

use crate::fake_driver::FakeDriver;

fn opt_int(value: &Option<i64>) -> Value {
    value.map(Value::Int).unwrap_or(Value::Null)
}

fn as_opt_int(value: Value) -> Result<Option<i64>, OrmError> {
    match value {
        Value::Null => Ok(None),
        Value::Int(i) => Ok(Some(i)),
        other => Err(OrmError::query_failed(format!(
            "expected integer value, got {:?}",
            other
        ))),
    }
}

fn as_text(value: Value) -> Result<String, OrmError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Text(s) => Ok(s),
        other => Err(OrmError::query_failed(format!(
            "expected text value, got {:?}",
            other
        ))),
    }
}

fn as_int(value: Value) -> Result<i64, OrmError> {
    match value {
        Value::Int(i) => Ok(i),
        Value::Null => Ok(0),
        other => Err(OrmError::query_failed(format!(
            "expected integer value, got {:?}",
            other
        ))),
    }
}

#[derive(Debug, Default, Clone)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    pub login_count: i64,
    pub profile: EntityRef,
}

impl PersistentEntity for User {
    fn entity_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_column(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(opt_int(&self.id)),
            "name" => Some(Value::Text(self.name.clone())),
            "email" => Some(Value::Text(self.email.clone())),
            "loginCount" => Some(Value::Int(self.login_count)),
            _ => None,
        }
    }

    fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError> {
        match property {
            "id" => self.id = as_opt_int(value)?,
            "name" => self.name = as_text(value)?,
            "email" => self.email = as_text(value)?,
            "loginCount" => self.login_count = as_int(value)?,
            _ => return Err(OrmError::UnknownColumn(property.to_string())),
        }
        Ok(())
    }

    fn get_reference(&self, property: &str) -> Option<EntityRef> {
        match property {
            "profile" => Some(self.profile.clone()),
            _ => None,
        }
    }

    fn set_reference(&mut self, property: &str, reference: EntityRef) -> Result<(), OrmError> {
        match property {
            "profile" => {
                self.profile = reference;
                Ok(())
            }
            _ => Err(OrmError::UnknownColumn(property.to_string())),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Entity for User {
    const NAME: &'static str = "User";

    fn mapping() -> EntityMapping {
        EntityMapping::new(Self::NAME)
            .with_table("users")
            .column(
                ColumnMapping::new("id", ColumnType::Int)
                    .unsigned()
                    .primary()
                    .with_extra("auto_increment"),
            )
            .column(
                ColumnMapping::new("name", ColumnType::VarChar)
                    .with_length(255)
                    .not_null(),
            )
            .column(
                ColumnMapping::new("email", ColumnType::VarChar)
                    .with_length(255)
                    .not_null()
                    .unique(),
            )
            .column(
                ColumnMapping::new("loginCount", ColumnType::Int)
                    .with_name("login_count")
                    .not_null()
                    .with_default(0),
            )
            .relation(
                RelationMapping::one_to_one("profile", "Profile")
                    .cascade_persist()
                    .with_foreign_key(
                        ForeignKeyMapping::new().on_delete(ReferentialAction::SetNull),
                    ),
            )
    }
}

#[derive(Debug, Default, Clone)]
pub struct Profile {
    pub id: Option<i64>,
    pub bio: String,
    pub user: EntityRef,
}

impl PersistentEntity for Profile {
    fn entity_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_column(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(opt_int(&self.id)),
            "bio" => Some(Value::Text(self.bio.clone())),
            _ => None,
        }
    }

    fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError> {
        match property {
            "id" => self.id = as_opt_int(value)?,
            "bio" => self.bio = as_text(value)?,
            _ => return Err(OrmError::UnknownColumn(property.to_string())),
        }
        Ok(())
    }

    fn get_reference(&self, property: &str) -> Option<EntityRef> {
        match property {
            "user" => Some(self.user.clone()),
            _ => None,
        }
    }

    fn set_reference(&mut self, property: &str, reference: EntityRef) -> Result<(), OrmError> {
        match property {
            "user" => {
                self.user = reference;
                Ok(())
            }
            _ => Err(OrmError::UnknownColumn(property.to_string())),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Entity for Profile {
    const NAME: &'static str = "Profile";

    fn mapping() -> EntityMapping {
        EntityMapping::new(Self::NAME)
            .with_table("profiles")
            .column(
                ColumnMapping::new("id", ColumnType::Int)
                    .unsigned()
                    .primary()
                    .with_extra("auto_increment"),
            )
            .column(ColumnMapping::new("bio", ColumnType::Text))
            .relation(
                RelationMapping::one_to_one("user", "User").with_foreign_key(
                    ForeignKeyMapping::new()
                        .not_null()
                        .on_delete(ReferentialAction::Cascade),
                ),
            )
    }
}

#[derive(Debug, Default, Clone)]
pub struct Category {
    pub id: Option<i64>,
    pub title: String,
    pub posts: Vec<EntityRef>,
}

impl PersistentEntity for Category {
    fn entity_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_column(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(opt_int(&self.id)),
            "title" => Some(Value::Text(self.title.clone())),
            _ => None,
        }
    }

    fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError> {
        match property {
            "id" => self.id = as_opt_int(value)?,
            "title" => self.title = as_text(value)?,
            _ => return Err(OrmError::UnknownColumn(property.to_string())),
        }
        Ok(())
    }

    fn get_collection(&self, property: &str) -> Option<Vec<EntityRef>> {
        match property {
            "posts" => Some(self.posts.clone()),
            _ => None,
        }
    }

    fn set_collection(
        &mut self,
        property: &str,
        references: Vec<EntityRef>,
    ) -> Result<(), OrmError> {
        match property {
            "posts" => {
                self.posts = references;
                Ok(())
            }
            _ => Err(OrmError::UnknownColumn(property.to_string())),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Entity for Category {
    const NAME: &'static str = "Category";

    fn mapping() -> EntityMapping {
        EntityMapping::new(Self::NAME)
            .with_table("categories")
            .column(
                ColumnMapping::new("id", ColumnType::Int)
                    .unsigned()
                    .primary()
                    .with_extra("auto_increment"),
            )
            .column(
                ColumnMapping::new("title", ColumnType::VarChar)
                    .with_length(255)
                    .not_null(),
            )
            .relation(
                RelationMapping::one_to_many("posts", "Post", "category").cascade_remove(),
            )
    }
}

#[derive(Debug, Default, Clone)]
pub struct Post {
    pub id: Option<i64>,
    pub title: String,
    pub category: EntityRef,
    pub tags: Vec<EntityRef>,
}

impl PersistentEntity for Post {
    fn entity_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_column(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(opt_int(&self.id)),
            "title" => Some(Value::Text(self.title.clone())),
            _ => None,
        }
    }

    fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError> {
        match property {
            "id" => self.id = as_opt_int(value)?,
            "title" => self.title = as_text(value)?,
            _ => return Err(OrmError::UnknownColumn(property.to_string())),
        }
        Ok(())
    }

    fn get_reference(&self, property: &str) -> Option<EntityRef> {
        match property {
            "category" => Some(self.category.clone()),
            _ => None,
        }
    }

    fn set_reference(&mut self, property: &str, reference: EntityRef) -> Result<(), OrmError> {
        match property {
            "category" => {
                self.category = reference;
                Ok(())
            }
            _ => Err(OrmError::UnknownColumn(property.to_string())),
        }
    }

    fn get_collection(&self, property: &str) -> Option<Vec<EntityRef>> {
        match property {
            "tags" => Some(self.tags.clone()),
            _ => None,
        }
    }

    fn set_collection(
        &mut self,
        property: &str,
        references: Vec<EntityRef>,
    ) -> Result<(), OrmError> {
        match property {
            "tags" => {
                self.tags = references;
                Ok(())
            }
            _ => Err(OrmError::UnknownColumn(property.to_string())),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Entity for Post {
    const NAME: &'static str = "Post";

    fn mapping() -> EntityMapping {
        EntityMapping::new(Self::NAME)
            .with_table("posts")
            .column(
                ColumnMapping::new("id", ColumnType::Int)
                    .unsigned()
                    .primary()
                    .with_extra("auto_increment"),
            )
            .column(
                ColumnMapping::new("title", ColumnType::VarChar)
                    .with_length(255)
                    .not_null(),
            )
            .relation(
                RelationMapping::many_to_one("category", "Category").with_foreign_key(
                    ForeignKeyMapping::new()
                        .not_null()
                        .on_delete(ReferentialAction::Restrict),
                ),
            )
            .relation(RelationMapping::many_to_many("tags", "Tag"))
    }
}

#[derive(Debug, Default, Clone)]
pub struct Tag {
    pub id: Option<i64>,
    pub label: String,
}

impl PersistentEntity for Tag {
    fn entity_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_column(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(opt_int(&self.id)),
            "label" => Some(Value::Text(self.label.clone())),
            _ => None,
        }
    }

    fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError> {
        match property {
            "id" => self.id = as_opt_int(value)?,
            "label" => self.label = as_text(value)?,
            _ => return Err(OrmError::UnknownColumn(property.to_string())),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Entity for Tag {
    const NAME: &'static str = "Tag";

    fn mapping() -> EntityMapping {
        EntityMapping::new(Self::NAME)
            .with_table("tags")
            .column(
                ColumnMapping::new("id", ColumnType::Int)
                    .unsigned()
                    .primary()
                    .with_extra("auto_increment"),
            )
            .column(
                ColumnMapping::new("label", ColumnType::VarChar)
                    .with_length(64)
                    .not_null()
                    .unique(),
            )
    }
}

/// Registry with every fixture entity registered.
pub fn registry() -> Arc<MetadataRegistry> {
    let registry = MetadataRegistry::new();
    registry.register::<User>();
    registry.register::<Profile>();
    registry.register::<Category>();
    registry.register::<Post>();
    registry.register::<Tag>();
    Arc::new(registry)
}

/// Session over a fake connection sharing the fixture registry.
pub fn session(driver: &FakeDriver) -> Session {
    Session::new(registry(), Box::new(driver.connection()))
}

fn text_column(name: &str) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        type_name: "varchar".to_string(),
        nullable: true,
    }
}

fn int_column(name: &str) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        type_name: "int".to_string(),
        nullable: true,
    }
}

/// Result set shaped like a `users` SELECT.
pub fn user_row(
    id: i64,
    name: &str,
    email: &str,
    login_count: i64,
    profile_id: Option<i64>,
) -> RowSet {
    RowSet {
        columns: vec![
            int_column("id"),
            text_column("name"),
            text_column("email"),
            int_column("login_count"),
            int_column("profile_id"),
        ],
        rows: vec![vec![
            Value::Int(id),
            Value::Text(name.to_string()),
            Value::Text(email.to_string()),
            Value::Int(login_count),
            profile_id.map(Value::Int).unwrap_or(Value::Null),
        ]],
    }
}

/// Result set shaped like a `posts` SELECT.
pub fn post_rows(rows: &[(i64, &str, i64)]) -> RowSet {
    RowSet {
        columns: vec![
            int_column("id"),
            text_column("title"),
            int_column("category_id"),
        ],
        rows: rows
            .iter()
            .map(|(id, title, category_id)| {
                vec![
                    Value::Int(*id),
                    Value::Text((*title).to_string()),
                    Value::Int(*category_id),
                ]
            })
            .collect(),
    }
}

/// Result set shaped like a `categories` SELECT.
pub fn category_row(id: i64, title: &str) -> RowSet {
    RowSet {
        columns: vec![int_column("id"), text_column("title")],
        rows: vec![vec![Value::Int(id), Value::Text(title.to_string())]],
    }
}

/// Convert a desired table into the shape the introspection surface would
/// report once that table exists, for reconciler idempotence scenarios.
pub fn table_info_from_definition(definition: &TableDefinition) -> TableInfo {
    let columns = definition
        .columns
        .iter()
        .map(|c| ColumnInfo {
            name: c.name.clone(),
            column_type: c.render_type(),
            nullable: c.nullable,
            default_value: c.default_value.as_ref().map(|v| match v {
                Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
                other => other.as_display_string(),
            }),
            extra: c.extra.clone().unwrap_or_default(),
            is_primary_key: definition.primary_key.contains(&c.name),
            enum_values: if c.choices.is_empty() {
                None
            } else {
                Some(c.choices.clone())
            },
        })
        .collect();

    let mut indexes: Vec<IndexInfo> = Vec::new();
    if !definition.primary_key.is_empty() {
        indexes.push(IndexInfo {
            name: "PRIMARY".to_string(),
            columns: definition.primary_key.clone(),
            is_unique: true,
            is_primary: true,
        });
    }
    for index in &definition.indexes {
        indexes.push(IndexInfo {
            name: index.name.clone(),
            columns: index.columns.clone(),
            is_unique: index.unique,
            is_primary: false,
        });
    }

    let foreign_keys = definition
        .foreign_keys
        .iter()
        .map(|fk| ForeignKeyInfo {
            constraint_name: fk.constraint_name.clone(),
            column: fk.column.clone(),
            referenced_table: fk.referenced_table.clone(),
            referenced_column: fk.referenced_column.clone(),
            on_delete: fk.on_delete.as_sql().to_string(),
            on_update: fk.on_update.as_sql().to_string(),
        })
        .collect();

    TableInfo {
        name: definition.name.clone(),
        columns,
        indexes,
        foreign_keys,
    }
}
