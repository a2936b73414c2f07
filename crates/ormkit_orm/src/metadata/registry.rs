use super::mapping::{
    ColumnMapping, EntityMapping, PropertyMapping, RelationKindMapping, RelationMapping,
};
use super::types::{
    ColumnDescriptor, EntityDescriptor, ForeignKeyDescriptor, KeyRole, Relation, RelationCommon,
};
use crate::entity::{Entity, PersistentEntity};
use indexmap::IndexMap;
use ormkit_core::cache::MetadataCache;
use ormkit_core::OrmError;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// One registered entity type: its name, mapping source and blank-instance
/// factory (used for accessor validation and hydration).
pub struct EntityRegistration {
    pub entity_name: &'static str,
    pub mapping: fn() -> EntityMapping,
    pub create: fn() -> Box<dyn PersistentEntity>,
}

impl EntityRegistration {
    pub fn of<E: Entity>() -> Self {
        Self {
            entity_name: E::NAME,
            mapping: E::mapping,
            create: || Box::new(E::default()),
        }
    }
}

/// Compiles entity mappings into immutable descriptors and caches them.
///
/// Safe for concurrent read access across sessions; registration and the
/// descriptor cache serialise writes internally. Broken descriptors are not
/// cached: a failed build is retried freshly on the next access.
pub struct MetadataRegistry {
    registrations: RwLock<BTreeMap<String, EntityRegistration>>,
    cache: MetadataCache<Arc<EntityDescriptor>>,
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(BTreeMap::new()),
            cache: MetadataCache::new(1024),
        }
    }

    /// Register one entity type. Returns whether it was newly added.
    pub fn register<E: Entity>(&self) -> bool {
        self.add_registration(EntityRegistration::of::<E>())
    }

    /// Register a batch of entity types; returns how many were new.
    pub fn register_all(&self, registrations: Vec<EntityRegistration>) -> usize {
        registrations
            .into_iter()
            .map(|r| self.add_registration(r))
            .filter(|added| *added)
            .count()
    }

    fn add_registration(&self, registration: EntityRegistration) -> bool {
        let mut registrations = write_lock(&self.registrations);
        if registrations.contains_key(registration.entity_name) {
            return false;
        }
        registrations.insert(registration.entity_name.to_string(), registration);
        true
    }

    pub fn is_registered(&self, entity: &str) -> bool {
        read_lock(&self.registrations).contains_key(entity)
    }

    /// Blank instance of a registered entity, for hydration.
    pub fn create_instance(&self, entity: &str) -> Result<Box<dyn PersistentEntity>, OrmError> {
        let registrations = read_lock(&self.registrations);
        let registration = registrations
            .get(entity)
            .ok_or_else(|| OrmError::unknown_entity(entity))?;
        Ok((registration.create)())
    }

    /// The descriptor for an entity; built on first request, served from
    /// the metadata cache afterwards.
    pub fn descriptor(&self, entity: &str) -> Result<Arc<EntityDescriptor>, OrmError> {
        if let Some(descriptor) = self.cache.get_entity_metadata(entity) {
            return Ok(descriptor);
        }

        let descriptor = Arc::new(self.build_descriptor(entity)?);
        self.cache.set_entity_metadata(entity, descriptor.clone());
        Ok(descriptor)
    }

    pub fn descriptor_of<E: Entity>(&self) -> Result<Arc<EntityDescriptor>, OrmError> {
        self.descriptor(E::NAME)
    }

    /// All known descriptors in deterministic entity-name order.
    pub fn all_descriptors(&self) -> Result<Vec<Arc<EntityDescriptor>>, OrmError> {
        let names: Vec<String> = read_lock(&self.registrations).keys().cloned().collect();
        names.iter().map(|name| self.descriptor(name)).collect()
    }

    /// Resolve the owning side of an inverse relation.
    ///
    /// For OneToMany and inverse ManyToMany, finds the property on the
    /// target entity that owns the relation. Unresolved at first use is a
    /// mapping error.
    pub fn resolve_owning_side(
        &self,
        descriptor: &EntityDescriptor,
        property: &str,
    ) -> Result<(Arc<EntityDescriptor>, String), OrmError> {
        let relation = descriptor.relations.get(property).ok_or_else(|| {
            OrmError::mapping(format!(
                "{}.{} is not a relation property",
                descriptor.entity_name, property
            ))
        })?;

        let (target, mapped_by) = match relation {
            Relation::OneToMany { common, mapped_by } => (common.target.clone(), mapped_by.clone()),
            Relation::ManyToMany {
                common,
                mapped_by: Some(mapped_by),
                ..
            } => (common.target.clone(), mapped_by.clone()),
            _ => {
                return Err(OrmError::mapping(format!(
                    "{}.{} is not an inverse-side relation",
                    descriptor.entity_name, property
                )));
            }
        };

        let target_descriptor = self.descriptor(&target)?;
        if !target_descriptor.relations.contains_key(&mapped_by) {
            return Err(OrmError::mapping(format!(
                "inverse relation {}.{} maps to missing property {}.{}",
                descriptor.entity_name, property, target, mapped_by
            )));
        }
        Ok((target_descriptor, mapped_by))
    }

    fn build_descriptor(&self, entity: &str) -> Result<EntityDescriptor, OrmError> {
        let registrations = read_lock(&self.registrations);
        let registration = registrations
            .get(entity)
            .ok_or_else(|| OrmError::unknown_entity(entity))?;

        let mapping = (registration.mapping)();
        let probe = (registration.create)();

        let table_name = mapping
            .table
            .clone()
            .unwrap_or_else(|| snake_case(short_name(&mapping.entity_name)));

        let mut columns: IndexMap<String, ColumnDescriptor> = IndexMap::new();
        let mut foreign_keys: IndexMap<String, ForeignKeyDescriptor> = IndexMap::new();
        let mut relations: IndexMap<String, Relation> = IndexMap::new();
        let mut primary_property: Option<String> = None;
        let mut seen_properties: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for property in &mapping.properties {
            if !seen_properties.insert(property.property()) {
                return Err(OrmError::mapping(format!(
                    "{}: property {} is mapped twice",
                    entity,
                    property.property()
                )));
            }

            match property {
                PropertyMapping::Column(column) => {
                    let descriptor = build_column(column);
                    if probe.get_column(&column.property).is_none() {
                        return Err(OrmError::mapping(format!(
                            "{}: column property {} has no accessor",
                            entity, column.property
                        )));
                    }
                    if columns.values().any(|c| c.name == descriptor.name) {
                        return Err(OrmError::mapping(format!(
                            "{}: two properties map to column {}",
                            entity, descriptor.name
                        )));
                    }
                    if descriptor.key == KeyRole::Primary {
                        if primary_property.is_some() {
                            return Err(OrmError::mapping(format!(
                                "{}: more than one primary key column",
                                entity
                            )));
                        }
                        primary_property = Some(column.property.clone());
                    }
                    columns.insert(column.property.clone(), descriptor);
                }
                PropertyMapping::Relation(relation) => {
                    if !registrations.contains_key(&relation.target) {
                        return Err(OrmError::mapping(format!(
                            "{}.{} references unmapped target {}",
                            entity, relation.property, relation.target
                        )));
                    }

                    let built = build_relation(entity, relation)?;

                    let accessor_ok = if built.is_collection() {
                        probe.get_collection(&relation.property).is_some()
                    } else {
                        probe.get_reference(&relation.property).is_some()
                    };
                    if !accessor_ok {
                        return Err(OrmError::mapping(format!(
                            "{}: relation property {} has no accessor",
                            entity, relation.property
                        )));
                    }

                    if built.is_owning() && !built.is_collection() {
                        let target_registration = registrations.get(&relation.target).ok_or_else(
                            || OrmError::unknown_entity(relation.target.clone()),
                        )?;
                        let fk = build_foreign_key(
                            entity,
                            &table_name,
                            relation,
                            target_registration,
                            &columns,
                        )?;
                        foreign_keys.insert(relation.property.clone(), fk);
                    }

                    relations.insert(relation.property.clone(), built);
                }
            }
        }

        let primary_property = primary_property
            .ok_or_else(|| OrmError::mapping(format!("{}: no primary key column", entity)))?;

        Ok(EntityDescriptor {
            entity_name: mapping.entity_name,
            table_name,
            repository: mapping.repository,
            auto_increment_seed: mapping.auto_increment,
            columns,
            foreign_keys,
            relations,
            primary_property,
        })
    }
}

fn build_column(column: &ColumnMapping) -> ColumnDescriptor {
    ColumnDescriptor {
        property: column.property.clone(),
        name: column
            .name
            .clone()
            .unwrap_or_else(|| column.property.clone()),
        column_type: column.column_type,
        length: column.length.or_else(|| column.column_type.default_length()),
        scale: column.scale,
        unsigned: column.unsigned,
        nullable: column.nullable,
        default_value: column.default_value.clone(),
        extra: column.extra.clone(),
        key: column.key,
        choices: column.choices.clone(),
    }
}

fn build_relation(entity: &str, relation: &RelationMapping) -> Result<Relation, OrmError> {
    let common = RelationCommon {
        target: relation.target.clone(),
        cascade_persist: relation.cascade_persist,
        cascade_remove: relation.cascade_remove,
    };

    Ok(match &relation.kind {
        RelationKindMapping::OneToOne => Relation::OneToOne {
            common,
            owning: true,
        },
        RelationKindMapping::ManyToOne => Relation::ManyToOne { common },
        RelationKindMapping::OneToMany { mapped_by } => Relation::OneToMany {
            common,
            mapped_by: mapped_by.clone(),
        },
        RelationKindMapping::ManyToMany { mapped_by } => {
            if mapped_by.is_some() && (relation.cascade_persist || relation.cascade_remove) {
                // Cascade flags belong to the owning side.
                return Err(OrmError::mapping(format!(
                    "{}.{}: cascade flags are only valid on the owning side",
                    entity, relation.property
                )));
            }
            let table = snake_case(short_name(entity));
            let target_table = snake_case(short_name(&relation.target));
            Relation::ManyToMany {
                common,
                mapped_by: mapped_by.clone(),
                join_table: relation
                    .join_table
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", table, target_table)),
                join_column: relation
                    .join_column
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", table)),
                inverse_join_column: relation
                    .inverse_join_column
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", target_table)),
            }
        }
    })
}

fn build_foreign_key(
    entity: &str,
    table_name: &str,
    relation: &RelationMapping,
    target: &EntityRegistration,
    columns: &IndexMap<String, ColumnDescriptor>,
) -> Result<ForeignKeyDescriptor, OrmError> {
    let target_mapping = (target.mapping)();
    let target_primary = target_mapping.primary_column().ok_or_else(|| {
        OrmError::mapping(format!(
            "{}.{}: target {} has no primary key column",
            entity, relation.property, relation.target
        ))
    })?;
    let target_table = target_mapping
        .table
        .clone()
        .unwrap_or_else(|| snake_case(short_name(&target_mapping.entity_name)));
    let referenced_column = target_primary
        .name
        .clone()
        .unwrap_or_else(|| target_primary.property.clone());

    // The FK column defaults to `<propertyName>_id` for owning to-one
    // relations without an explicit column.
    let column = relation
        .column
        .clone()
        .unwrap_or_else(|| format!("{}_id", relation.property));

    if columns.values().any(|c| c.name == column) {
        return Err(OrmError::mapping(format!(
            "{}: foreign key column {} collides with a mapped column",
            entity, column
        )));
    }

    let fk = relation.foreign_key.clone().unwrap_or_default();
    let referenced_column = fk.referenced_column.unwrap_or(referenced_column);
    let constraint_name = fk.name.unwrap_or_else(|| {
        format!("fk_{}_{}_{}", table_name, column, target_table).to_lowercase()
    });

    Ok(ForeignKeyDescriptor {
        constraint_name,
        column,
        column_type: target_primary.column_type,
        unsigned: target_primary.unsigned,
        nullable: fk.nullable,
        referenced_entity: relation.target.clone(),
        referenced_table: target_table,
        referenced_column,
        on_delete: fk.on_delete,
        on_update: fk.on_update,
    })
}

/// Short type name: the segment after the last `::` or `.`.
fn short_name(entity: &str) -> &str {
    entity
        .rsplit("::")
        .next()
        .and_then(|s| s.rsplit('.').next())
        .unwrap_or(entity)
}

/// `UserProfile` to `user_profile`; consecutive capitals collapse into one
/// word boundary (`HTTPServer` to `http_server`).
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (index, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = index > 0
                && (chars[index - 1].is_ascii_lowercase() || chars[index - 1].is_ascii_digit());
            let next_lower = chars
                .get(index + 1)
                .is_some_and(|n| n.is_ascii_lowercase());
            if index > 0 && (prev_lower || (chars[index - 1].is_ascii_uppercase() && next_lower)) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_conversion() {
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("UserProfile"), "user_profile");
        assert_eq!(snake_case("HTTPServer"), "http_server");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn short_name_strips_path() {
        assert_eq!(short_name("app::model::User"), "User");
        assert_eq!(short_name("User"), "User");
    }
}
