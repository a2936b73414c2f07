use crate::entity::{EntityHandle, EntityKey, PersistentEntity};
use crate::session::snapshot::Snapshot;
use ormkit_core::{EntityPointer, OrmError};
use std::collections::HashMap;

/// Lifecycle state of a managed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Attached but not scheduled for anything; ignored by flush.
    Detached,
    /// Scheduled for insert; key may still be transient.
    New,
    /// Loaded or inserted; dirty-checked at flush.
    Managed,
    /// Scheduled for delete.
    Removed,
}

/// One entity owned by the identity map.
pub struct ManagedSlot {
    pub handle: EntityHandle,
    pub state: EntityState,
    pub key: Option<EntityKey>,
    pub entity: Box<dyn PersistentEntity>,
    pub snapshot: Snapshot,
}

/// Per-session two-level index: entity-type, then primary-key, to the
/// managed instance. The map owns the instances; everything else holds
/// handles.
#[derive(Default)]
pub struct IdentityMap {
    slots: HashMap<u64, ManagedSlot>,
    by_key: HashMap<String, HashMap<EntityKey, u64>>,
    next_slot: u64,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an instance. A keyed entity may appear only once per key.
    pub fn attach(
        &mut self,
        entity: Box<dyn PersistentEntity>,
        state: EntityState,
        key: Option<EntityKey>,
        snapshot: Snapshot,
    ) -> Result<EntityHandle, OrmError> {
        let name = entity.entity_name();
        if let Some(key) = &key {
            if self.lookup(name, key).is_some() {
                return Err(OrmError::illegal_transition(
                    "entity with this key is already managed",
                    EntityPointer::new(name).with_key(key.to_value()),
                ));
            }
        }

        self.next_slot += 1;
        let handle = EntityHandle {
            entity: name,
            slot: self.next_slot,
        };
        if let Some(key) = &key {
            self.by_key
                .entry(name.to_string())
                .or_default()
                .insert(key.clone(), handle.slot);
        }
        self.slots.insert(
            handle.slot,
            ManagedSlot {
                handle,
                state,
                key,
                entity,
                snapshot,
            },
        );
        Ok(handle)
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&ManagedSlot> {
        self.slots.get(&handle.slot)
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut ManagedSlot> {
        self.slots.get_mut(&handle.slot)
    }

    pub fn find_by_key(&self, entity: &str, key: &EntityKey) -> Option<EntityHandle> {
        let slot = self.lookup(entity, key)?;
        self.slots.get(&slot).map(|s| s.handle)
    }

    fn lookup(&self, entity: &str, key: &EntityKey) -> Option<u64> {
        self.by_key.get(entity)?.get(key).copied()
    }

    /// Move the map entry for a slot to a new key atomically.
    pub fn assign_key(&mut self, handle: EntityHandle, key: EntityKey) -> Result<(), OrmError> {
        if let Some(existing) = self.lookup(handle.entity, &key) {
            if existing != handle.slot {
                return Err(OrmError::illegal_transition(
                    "another entity already holds this key",
                    EntityPointer::new(handle.entity).with_key(key.to_value()),
                ));
            }
            return Ok(());
        }

        let slot = self.slots.get_mut(&handle.slot).ok_or_else(|| {
            OrmError::illegal_transition("handle is not attached", EntityPointer::new(handle.entity))
        })?;

        let keys = self.by_key.entry(handle.entity.to_string()).or_default();
        if let Some(old_key) = slot.key.take() {
            keys.remove(&old_key);
        }
        slot.key = Some(key.clone());
        keys.insert(key, handle.slot);
        Ok(())
    }

    pub fn set_state(&mut self, handle: EntityHandle, state: EntityState) {
        if let Some(slot) = self.slots.get_mut(&handle.slot) {
            slot.state = state;
        }
    }

    /// Detach a slot entirely, dropping the owned instance.
    pub fn remove_slot(&mut self, handle: EntityHandle) -> Option<ManagedSlot> {
        let slot = self.slots.remove(&handle.slot)?;
        if let Some(key) = &slot.key {
            if let Some(keys) = self.by_key.get_mut(handle.entity) {
                keys.remove(key);
            }
        }
        Some(slot)
    }

    /// Detach everything.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_key.clear();
    }

    /// All attached handles in attach order.
    pub fn handles(&self) -> Vec<EntityHandle> {
        let mut handles: Vec<EntityHandle> = self.slots.values().map(|s| s.handle).collect();
        handles.sort_by_key(|h| h.slot);
        handles
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
