use crate::entity::{EntityHandle, EntityRef};
use crate::metadata::{EntityDescriptor, MetadataRegistry, Relation};
use crate::session::identity_map::{EntityState, IdentityMap};
use crate::session::snapshot::values_equal;
use ormkit_core::{OrmError, Value};

/// A column whose current value differs from the snapshot.
#[derive(Debug, Clone)]
pub struct DirtyField {
    pub property: String,
    pub column: String,
    pub old: Value,
    pub new: Value,
}

/// Where a foreign-key value comes from at execution time.
#[derive(Debug, Clone, PartialEq)]
pub enum RefTarget {
    Null,
    /// Key already known.
    Key(Value),
    /// Key assigned when the referenced insert completes.
    Pending(EntityHandle),
}

/// A foreign-key column change on a managed entity.
#[derive(Debug, Clone)]
pub struct FkChange {
    pub property: String,
    pub column: String,
    pub target: RefTarget,
}

#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub handle: EntityHandle,
    pub dirty: Vec<DirtyField>,
    pub fk_changes: Vec<FkChange>,
}

/// One join-table row to insert or delete.
#[derive(Debug, Clone)]
pub struct LinkOperation {
    pub join_table: String,
    pub left_column: String,
    pub right_column: String,
    pub left: RefTarget,
    pub right: RefTarget,
}

/// Pending state transitions, categorised per flush.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub inserts: Vec<EntityHandle>,
    pub updates: Vec<UpdateRecord>,
    pub deletes: Vec<EntityHandle>,
    pub links: Vec<LinkOperation>,
    pub unlinks: Vec<LinkOperation>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.links.is_empty()
            && self.unlinks.is_empty()
    }
}

/// Resolve a relation reference into an execution-time target.
pub(crate) fn resolve_ref(map: &IdentityMap, reference: &EntityRef) -> RefTarget {
    match reference {
        EntityRef::Unset => RefTarget::Null,
        EntityRef::Key(value) => RefTarget::Key(value.clone()),
        EntityRef::Handle(handle) => match map.get(*handle) {
            Some(slot) => match &slot.key {
                Some(key) => RefTarget::Key(key.to_value()),
                None => RefTarget::Pending(*handle),
            },
            None => RefTarget::Null,
        },
    }
}

/// Categorise every attached entity into insert/update/delete and
/// link/unlink groups. Managed entities are dirty-compared against their
/// snapshots; collection deltas come from the collection snapshots.
pub fn compute_change_set(
    map: &IdentityMap,
    registry: &MetadataRegistry,
) -> Result<ChangeSet, OrmError> {
    let mut change_set = ChangeSet::default();

    for handle in map.handles() {
        let slot = map.get(handle).expect("handle from map");
        let descriptor = registry.descriptor(handle.entity)?;

        match slot.state {
            EntityState::Detached => {}
            EntityState::New => {
                change_set.inserts.push(handle);
                collect_link_deltas(map, &descriptor, handle, &mut change_set);
            }
            EntityState::Removed => {
                change_set.deletes.push(handle);
            }
            EntityState::Managed => {
                let record = compute_dirty(map, &descriptor, handle)?;
                if !record.dirty.is_empty() || !record.fk_changes.is_empty() {
                    change_set.updates.push(record);
                }
                collect_link_deltas(map, &descriptor, handle, &mut change_set);
            }
        }
    }

    Ok(change_set)
}

fn compute_dirty(
    map: &IdentityMap,
    descriptor: &EntityDescriptor,
    handle: EntityHandle,
) -> Result<UpdateRecord, OrmError> {
    let slot = map.get(handle).expect("handle from map");
    let mut record = UpdateRecord {
        handle,
        dirty: Vec::new(),
        fk_changes: Vec::new(),
    };

    for (property, column) in &descriptor.columns {
        let Some(current) = slot.entity.get_column(property) else {
            continue;
        };
        let old = slot
            .snapshot
            .columns
            .get(property)
            .cloned()
            .unwrap_or(Value::Null);
        if !values_equal(column.column_type, &old, &current) {
            record.dirty.push(DirtyField {
                property: property.clone(),
                column: column.name.clone(),
                old,
                new: current,
            });
        }
    }

    for (property, _, fk) in descriptor.owning_relations() {
        let Some(current) = slot.entity.get_reference(property) else {
            continue;
        };
        let old = slot
            .snapshot
            .references
            .get(property)
            .cloned()
            .unwrap_or_default();

        let current_target = resolve_ref(map, &current);
        let old_target = resolve_ref(map, &old);
        // Related entities compare by identity-map identity, not deep
        // equality.
        if current_target != old_target {
            record.fk_changes.push(FkChange {
                property: property.to_string(),
                column: fk.column.clone(),
                target: current_target,
            });
        }
    }

    Ok(record)
}

/// Link/unlink deltas for owning many-to-many collections.
fn collect_link_deltas(
    map: &IdentityMap,
    descriptor: &EntityDescriptor,
    handle: EntityHandle,
    change_set: &mut ChangeSet,
) {
    let slot = map.get(handle).expect("handle from map");

    for (property, relation) in &descriptor.relations {
        let Relation::ManyToMany {
            mapped_by: None,
            join_table,
            join_column,
            inverse_join_column,
            ..
        } = relation
        else {
            continue;
        };
        let Some(current) = slot.entity.get_collection(property) else {
            continue;
        };
        // A new entity has no persisted links yet; its attach-time snapshot
        // must not mask them.
        let previous = match slot.state {
            EntityState::New => Vec::new(),
            _ => slot
                .snapshot
                .collections
                .get(property)
                .cloned()
                .unwrap_or_default(),
        };

        let current_targets: Vec<RefTarget> =
            current.iter().map(|r| resolve_ref(map, r)).collect();
        let previous_targets: Vec<RefTarget> =
            previous.iter().map(|r| resolve_ref(map, r)).collect();

        let left = match slot.state {
            EntityState::New => RefTarget::Pending(handle),
            _ => match &slot.key {
                Some(key) => RefTarget::Key(key.to_value()),
                None => RefTarget::Pending(handle),
            },
        };

        for target in &current_targets {
            if *target == RefTarget::Null {
                continue;
            }
            if !previous_targets.contains(target) {
                change_set.links.push(LinkOperation {
                    join_table: join_table.clone(),
                    left_column: join_column.clone(),
                    right_column: inverse_join_column.clone(),
                    left: left.clone(),
                    right: target.clone(),
                });
            }
        }

        for target in &previous_targets {
            if *target == RefTarget::Null {
                continue;
            }
            if !current_targets.contains(target) {
                change_set.unlinks.push(LinkOperation {
                    join_table: join_table.clone(),
                    left_column: join_column.clone(),
                    right_column: inverse_join_column.clone(),
                    left: left.clone(),
                    right: target.clone(),
                });
            }
        }
    }
}
