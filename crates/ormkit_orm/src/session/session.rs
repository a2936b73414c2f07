use crate::entity::{Entity, EntityHandle, EntityKey, EntityRef, TypedHandle};
use crate::metadata::{EntityDescriptor, MetadataRegistry};
use crate::session::identity_map::{EntityState, IdentityMap};
use crate::session::snapshot::Snapshot;
use crate::session::unit_of_work::{FlushOptions, FlushReport, UnitOfWork};
use ormkit_core::query::QueryFactory;
use ormkit_core::{
    Connection, Deadline, EntityPointer, OrmError, ParameterBag, RowSet, Value,
};
use std::sync::Arc;

/// Session facade over one connection: identity map, unit of work and the
/// query surface.
///
/// A session is single-threaded; it owns its connection exclusively and
/// enforces one active transaction and one identity map.
pub struct Session {
    registry: Arc<MetadataRegistry>,
    conn: Box<dyn Connection>,
    map: IdentityMap,
    factory: QueryFactory,
    flush_options: FlushOptions,
    deadline: Option<Deadline>,
    tx_active: bool,
}

impl Session {
    pub fn new(registry: Arc<MetadataRegistry>, conn: Box<dyn Connection>) -> Self {
        Self {
            registry,
            conn,
            map: IdentityMap::new(),
            factory: QueryFactory::default(),
            flush_options: FlushOptions::default(),
            deadline: None,
            tx_active: false,
        }
    }

    pub fn with_flush_options(mut self, options: FlushOptions) -> Self {
        self.flush_options = options;
        self
    }

    /// Deadline applied to every subsequent database operation.
    pub fn set_deadline(&mut self, deadline: Option<Deadline>) {
        self.deadline = deadline;
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn query_factory(&self) -> &QueryFactory {
        &self.factory
    }

    /// Borrow the managed instance behind a handle.
    pub fn get<E: Entity>(&self, handle: TypedHandle<E>) -> Option<&E> {
        self.map
            .get(handle.raw())
            .and_then(|slot| slot.entity.as_any().downcast_ref::<E>())
    }

    /// Mutably borrow the managed instance behind a handle. Mutations are
    /// observed at the next flush by re-reading the accessors.
    pub fn get_mut<E: Entity>(&mut self, handle: TypedHandle<E>) -> Option<&mut E> {
        self.map
            .get_mut(handle.raw())
            .and_then(|slot| slot.entity.as_any_mut().downcast_mut::<E>())
    }

    pub fn state_of(&self, handle: EntityHandle) -> Option<EntityState> {
        self.map.get(handle).map(|slot| slot.state)
    }

    pub fn key_of(&self, handle: EntityHandle) -> Option<Value> {
        self.map
            .get(handle)
            .and_then(|slot| slot.key.as_ref())
            .map(|k| k.to_value())
    }

    /// Attach an instance without scheduling it; `persist` promotes it.
    pub fn attach<E: Entity>(&mut self, entity: E) -> Result<TypedHandle<E>, OrmError> {
        let descriptor = self.registry.descriptor_of::<E>()?;
        let key = read_key(&descriptor, &entity)?;
        let snapshot = Snapshot::take(&descriptor, &entity);
        let handle = self
            .map
            .attach(Box::new(entity), EntityState::Detached, key, snapshot)?;
        Ok(TypedHandle::new(handle))
    }

    /// Attach and schedule an instance for insert, cascading to related
    /// instances whose relation declares cascade-persist.
    pub fn persist<E: Entity>(&mut self, entity: E) -> Result<TypedHandle<E>, OrmError> {
        let handle = self.attach(entity)?;
        self.persist_handle(handle.raw())?;
        Ok(handle)
    }

    /// Schedule an attached instance for insert.
    pub fn persist_handle(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let state = self.map.get(handle).map(|slot| slot.state).ok_or_else(|| {
            OrmError::illegal_transition("handle is not attached", EntityPointer::new(handle.entity))
        })?;

        match state {
            EntityState::New | EntityState::Managed => Ok(()),
            EntityState::Removed => Err(OrmError::illegal_transition(
                "cannot persist a removed entity",
                self.pointer(handle),
            )),
            EntityState::Detached => {
                self.map.set_state(handle, EntityState::New);
                self.cascade_persist(handle)
            }
        }
    }

    fn cascade_persist(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let descriptor = self.registry.descriptor(handle.entity)?;
        let mut targets: Vec<EntityHandle> = Vec::new();
        {
            let slot = self.map.get(handle).expect("handle attached");
            for (property, relation) in &descriptor.relations {
                if !relation.common().cascade_persist {
                    continue;
                }
                if relation.is_collection() {
                    if let Some(refs) = slot.entity.get_collection(property) {
                        targets.extend(refs.iter().filter_map(|r| match r {
                            EntityRef::Handle(h) => Some(*h),
                            _ => None,
                        }));
                    }
                } else if let Some(EntityRef::Handle(h)) = slot.entity.get_reference(property) {
                    targets.push(h);
                }
            }
        }

        for target in targets {
            if self.map.get(target).map(|slot| slot.state) == Some(EntityState::Detached) {
                self.map.set_state(target, EntityState::New);
                self.cascade_persist(target)?;
            }
        }
        Ok(())
    }

    /// Schedule a managed instance for delete, cascading to related managed
    /// instances whose relation declares cascade-remove.
    pub fn remove(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let state = self.map.get(handle).map(|slot| slot.state).ok_or_else(|| {
            OrmError::illegal_transition("handle is not attached", EntityPointer::new(handle.entity))
        })?;

        if state != EntityState::Managed {
            return Err(OrmError::illegal_transition(
                "only managed entities may be removed",
                self.pointer(handle),
            ));
        }

        self.map.set_state(handle, EntityState::Removed);
        self.cascade_remove(handle)
    }

    fn cascade_remove(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let descriptor = self.registry.descriptor(handle.entity)?;
        let mut targets: Vec<EntityHandle> = Vec::new();
        {
            let slot = self.map.get(handle).expect("handle attached");
            for (property, relation) in &descriptor.relations {
                if !relation.common().cascade_remove {
                    continue;
                }
                if relation.is_collection() {
                    if let Some(refs) = slot.entity.get_collection(property) {
                        targets.extend(refs.iter().filter_map(|r| match r {
                            EntityRef::Handle(h) => Some(*h),
                            _ => None,
                        }));
                    }
                } else if let Some(EntityRef::Handle(h)) = slot.entity.get_reference(property) {
                    targets.push(h);
                }
            }
        }

        for target in targets {
            if self.map.get(target).map(|slot| slot.state) == Some(EntityState::Managed) {
                self.map.set_state(target, EntityState::Removed);
                self.cascade_remove(target)?;
            }
        }
        Ok(())
    }

    /// Load by primary key: identity-map first, then a SELECT.
    pub fn find<E: Entity>(
        &mut self,
        key: impl Into<Value>,
    ) -> Result<Option<TypedHandle<E>>, OrmError> {
        let descriptor = self.registry.descriptor_of::<E>()?;
        let key_value = key.into();
        let entity_key = EntityKey::from_value(&key_value)?;

        if let Some(handle) = self.map.find_by_key(E::NAME, &entity_key) {
            return Ok(Some(TypedHandle::new(handle)));
        }

        let columns = select_columns(&descriptor);
        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        let pk_column = self
            .factory
            .dialect()
            .quote_identifier(&descriptor.primary_column().name);

        let rows = self
            .factory
            .select()
            .select(&column_refs)
            .from(&descriptor.table_name)
            .and_where(&format!("{} = ?", pk_column), vec![key_value])?
            .limit(1)
            .fetch(self.conn.as_mut(), self.deadline)?;

        if rows.rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.hydrate_row::<E>(&descriptor, &rows, 0)?))
    }

    /// Register a loaded row in the identity map, returning the existing
    /// handle when the key is already managed.
    pub(crate) fn hydrate_row<E: Entity>(
        &mut self,
        descriptor: &EntityDescriptor,
        rows: &RowSet,
        row_index: usize,
    ) -> Result<TypedHandle<E>, OrmError> {
        let row = &rows.rows[row_index];
        let pk_column = &descriptor.primary_column().name;
        let pk_index = rows.column_index(pk_column).ok_or_else(|| {
            OrmError::query_failed(format!("result set is missing key column {}", pk_column))
        })?;
        let key_value = row[pk_index].clone();
        let entity_key = EntityKey::from_value(&key_value)?;

        if let Some(existing) = self.map.find_by_key(E::NAME, &entity_key) {
            return Ok(TypedHandle::new(existing));
        }

        let mut entity = E::default();
        for (property, column) in &descriptor.columns {
            if let Some(index) = rows.column_index(&column.name) {
                entity.set_column(property, row[index].clone())?;
            }
        }
        for (property, _, fk) in descriptor.owning_relations() {
            if let Some(index) = rows.column_index(&fk.column) {
                let value = row[index].clone();
                let reference = if value.is_null() {
                    EntityRef::Unset
                } else {
                    EntityRef::Key(value)
                };
                entity.set_reference(property, reference)?;
            }
        }

        let snapshot = Snapshot::take(descriptor, &entity);
        let handle =
            self.map
                .attach(Box::new(entity), EntityState::Managed, Some(entity_key), snapshot)?;
        Ok(TypedHandle::new(handle))
    }

    /// Re-attach a detached instance, copying its state over the managed
    /// copy (loading it first if needed).
    pub fn merge<E: Entity>(&mut self, entity: E) -> Result<TypedHandle<E>, OrmError> {
        let descriptor = self.registry.descriptor_of::<E>()?;
        let key = read_key(&descriptor, &entity)?;

        let Some(key) = key else {
            // No identity yet: behaves like persist.
            return self.persist(entity);
        };

        let existing = match self.map.find_by_key(E::NAME, &key) {
            Some(handle) => Some(TypedHandle::new(handle)),
            None => self.find::<E>(key.to_value())?,
        };

        match existing {
            Some(handle) => {
                let incoming = entity;
                let managed = self.map.get_mut(handle.raw()).expect("handle attached");
                for property in descriptor.columns.keys() {
                    if let Some(value) = incoming.get_column(property) {
                        managed.entity.set_column(property, value)?;
                    }
                }
                for (property, relation) in &descriptor.relations {
                    if relation.is_collection() {
                        if let Some(refs) = incoming.get_collection(property) {
                            managed.entity.set_collection(property, refs)?;
                        }
                    } else if let Some(reference) = incoming.get_reference(property) {
                        managed.entity.set_reference(property, reference)?;
                    }
                }
                Ok(handle)
            }
            None => {
                let handle = self.attach(entity)?;
                self.map.set_state(handle.raw(), EntityState::New);
                Ok(handle)
            }
        }
    }

    /// Commit all pending state transitions in a single transaction.
    pub fn flush(&mut self) -> Result<FlushReport, OrmError> {
        let uow = UnitOfWork::new(&self.registry, &self.factory)
            .with_options(self.flush_options.clone());
        let result = uow.flush(
            &mut self.map,
            self.conn.as_mut(),
            self.deadline,
            self.tx_active,
        );
        if result.is_err() && self.tx_active {
            // The unit of work already rolled the transaction back.
            self.tx_active = false;
        }
        result
    }

    /// Detach everything; the identity map empties and owned instances are
    /// dropped.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn begin_transaction(&mut self) -> Result<(), OrmError> {
        if self.tx_active {
            return Err(OrmError::Transaction(
                "a transaction is already active on this session".to_string(),
            ));
        }
        self.conn.begin()?;
        self.tx_active = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), OrmError> {
        if !self.tx_active {
            return Err(OrmError::Transaction("no active transaction".to_string()));
        }
        self.conn.commit()?;
        self.tx_active = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), OrmError> {
        if !self.tx_active {
            return Err(OrmError::Transaction("no active transaction".to_string()));
        }
        self.conn.rollback()?;
        self.tx_active = false;
        Ok(())
    }

    /// Execute raw SQL with bound parameters.
    pub fn execute_raw(&mut self, sql: &str, params: ParameterBag) -> Result<u64, OrmError> {
        params.verify_against(sql)?;
        self.conn.exec(sql, &params, self.deadline)
    }

    /// Query raw SQL with bound parameters.
    pub fn query_raw(&mut self, sql: &str, params: ParameterBag) -> Result<RowSet, OrmError> {
        params.verify_against(sql)?;
        let mut cursor = self.conn.query(sql, &params, self.deadline)?;
        RowSet::from_cursor(cursor.as_mut())
    }

    pub(crate) fn connection(&mut self) -> &mut dyn Connection {
        self.conn.as_mut()
    }

    pub(crate) fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    fn pointer(&self, handle: EntityHandle) -> EntityPointer {
        let mut pointer = EntityPointer::new(handle.entity);
        if let Some(key) = self.key_of(handle) {
            pointer = pointer.with_key(key);
        }
        pointer
    }
}

fn read_key<E: Entity>(
    descriptor: &EntityDescriptor,
    entity: &E,
) -> Result<Option<EntityKey>, OrmError> {
    let value = entity
        .get_column(&descriptor.primary_property)
        .unwrap_or(Value::Null);
    if value.is_null() {
        Ok(None)
    } else {
        EntityKey::from_value(&value).map(Some)
    }
}

/// All mapped column names plus owning-side FK columns, for hydrating
/// SELECTs.
pub(crate) fn select_columns(descriptor: &EntityDescriptor) -> Vec<String> {
    let mut columns: Vec<String> = descriptor.columns.values().map(|c| c.name.clone()).collect();
    for (_, _, fk) in descriptor.owning_relations() {
        columns.push(fk.column.clone());
    }
    columns
}
