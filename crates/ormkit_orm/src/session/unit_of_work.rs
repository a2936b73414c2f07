use crate::entity::{EntityHandle, EntityKey};
use crate::metadata::MetadataRegistry;
use crate::session::change_set::{
    compute_change_set, ChangeSet, LinkOperation, RefTarget,
};
use crate::session::identity_map::{EntityState, IdentityMap};
use crate::session::snapshot::Snapshot;
use ormkit_core::query::QueryFactory;
use ormkit_core::{
    Connection, Deadline, DriverCapabilities, EntityPointer, OrmError, Value,
};
use std::collections::HashMap;

/// Flush tuning knobs.
#[derive(Debug, Clone)]
pub struct FlushOptions {
    /// Cap on bound parameters per batched statement; multi-row inserts are
    /// sized so `rows * columns` stays below it.
    pub max_batch_parameters: usize,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self {
            max_batch_parameters: 1000,
        }
    }
}

/// Statement counts of a completed flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub inserts: u64,
    pub deferred_updates: u64,
    pub updates: u64,
    pub unlinks: u64,
    pub links: u64,
    pub deletes: u64,
}

/// A foreign key left NULL at insert to break a cycle, completed by an
/// UPDATE once its target is inserted.
#[derive(Debug, Clone)]
struct DeferredFk {
    handle: EntityHandle,
    column: String,
    target: EntityHandle,
}

#[derive(Debug, Clone)]
enum RowValue {
    Const(Value),
    Ref(RefTarget),
}

#[derive(Debug, Clone)]
struct InsertRow {
    handle: EntityHandle,
    table: String,
    columns: Vec<String>,
    values: Vec<RowValue>,
    auto_key: bool,
    explicit_key: Option<Value>,
}

/// Turns the pending change set into an ordered SQL programme executed
/// inside one transaction.
pub struct UnitOfWork<'a> {
    registry: &'a MetadataRegistry,
    factory: &'a QueryFactory,
    options: FlushOptions,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(registry: &'a MetadataRegistry, factory: &'a QueryFactory) -> Self {
        Self {
            registry,
            factory,
            options: FlushOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FlushOptions) -> Self {
        self.options = options;
        self
    }

    /// Flush all pending changes.
    ///
    /// `in_transaction` reports whether the caller already opened a
    /// transaction; otherwise one is opened (and committed) here. Any error
    /// rolls the transaction back and leaves in-memory state untouched.
    pub fn flush(
        &self,
        map: &mut IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        in_transaction: bool,
    ) -> Result<FlushReport, OrmError> {
        let change_set = compute_change_set(map, self.registry)?;
        if change_set.is_empty() {
            return Ok(FlushReport::default());
        }

        let (insert_order, deferred) = self.plan_insert_order(map, &change_set.inserts)?;
        let delete_order = self.plan_delete_order(&change_set.deletes)?;
        let insert_rows = self.build_insert_rows(map, &insert_order, &deferred)?;

        let own_tx = !in_transaction;
        if own_tx {
            conn.begin()?;
        }
        let use_savepoints = conn.capabilities().contains(DriverCapabilities::SAVEPOINTS);

        let mut assigned: HashMap<u64, Value> = HashMap::new();
        let mut report = FlushReport::default();

        let outcome = self.run_phases(
            map,
            conn,
            deadline,
            use_savepoints,
            &change_set,
            insert_rows,
            &deferred,
            &delete_order,
            &mut assigned,
            &mut report,
        );

        if let Err(error) = outcome {
            let _ = conn.rollback();
            return Err(error);
        }

        if own_tx {
            if let Err(error) = conn.commit() {
                let _ = conn.rollback();
                return Err(error);
            }
        }

        self.write_back(map, &change_set, &assigned)?;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phases(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        use_savepoints: bool,
        change_set: &ChangeSet,
        insert_rows: Vec<InsertRow>,
        deferred: &[DeferredFk],
        delete_order: &[EntityHandle],
        assigned: &mut HashMap<u64, Value>,
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        if !insert_rows.is_empty() {
            run_phase(conn, use_savepoints, "flush_insert", |conn| {
                self.execute_inserts(map, conn, deadline, insert_rows, assigned, report)
            })?;
        }

        if !deferred.is_empty() {
            run_phase(conn, use_savepoints, "flush_fk_complete", |conn| {
                self.execute_deferred_updates(map, conn, deadline, deferred, assigned, report)
            })?;
        }

        if !change_set.updates.is_empty() {
            run_phase(conn, use_savepoints, "flush_update", |conn| {
                self.execute_updates(map, conn, deadline, change_set, assigned, report)
            })?;
        }

        if !change_set.unlinks.is_empty() {
            run_phase(conn, use_savepoints, "flush_unlink", |conn| {
                self.execute_unlinks(map, conn, deadline, &change_set.unlinks, assigned, report)
            })?;
        }

        if !change_set.links.is_empty() {
            run_phase(conn, use_savepoints, "flush_link", |conn| {
                self.execute_links(map, conn, deadline, &change_set.links, assigned, report)
            })?;
        }

        if !delete_order.is_empty() {
            run_phase(conn, use_savepoints, "flush_delete", |conn| {
                self.execute_deletes(map, conn, deadline, delete_order, report)
            })?;
        }

        Ok(())
    }

    /// Topologically order inserts. A cycle is broken by deferring one
    /// nullable foreign key inside it; a cycle with no nullable edge is
    /// unresolvable.
    fn plan_insert_order(
        &self,
        map: &IdentityMap,
        inserts: &[EntityHandle],
    ) -> Result<(Vec<EntityHandle>, Vec<DeferredFk>), OrmError> {
        struct Edge {
            target: usize,
            dependent: usize,
            nullable: bool,
            column: String,
        }

        let index_of: HashMap<u64, usize> = inserts
            .iter()
            .enumerate()
            .map(|(i, h)| (h.slot, i))
            .collect();

        let mut edges: Vec<Edge> = Vec::new();
        for (dependent_index, handle) in inserts.iter().enumerate() {
            let slot = map.get(*handle).expect("insert handle attached");
            let descriptor = self.registry.descriptor(handle.entity)?;
            for (property, _, fk) in descriptor.owning_relations() {
                let Some(reference) = slot.entity.get_reference(property) else {
                    continue;
                };
                if let RefTarget::Pending(target) = super::change_set::resolve_ref(map, &reference)
                {
                    if let Some(&target_index) = index_of.get(&target.slot) {
                        edges.push(Edge {
                            target: target_index,
                            dependent: dependent_index,
                            nullable: fk.nullable,
                            column: fk.column.clone(),
                        });
                    }
                }
            }
        }

        let mut in_degree = vec![0usize; inserts.len()];
        let mut edge_alive = vec![true; edges.len()];
        for edge in &edges {
            in_degree[edge.dependent] += 1;
        }

        let mut order: Vec<EntityHandle> = Vec::with_capacity(inserts.len());
        let mut deferred: Vec<DeferredFk> = Vec::new();
        let mut placed = vec![false; inserts.len()];

        while order.len() < inserts.len() {
            let mut progressed = false;
            for index in 0..inserts.len() {
                if placed[index] || in_degree[index] != 0 {
                    continue;
                }
                placed[index] = true;
                progressed = true;
                order.push(inserts[index]);
                for (edge_index, edge) in edges.iter().enumerate() {
                    if edge_alive[edge_index] && edge.target == index {
                        edge_alive[edge_index] = false;
                        in_degree[edge.dependent] -= 1;
                    }
                }
            }
            if progressed {
                continue;
            }

            // Cycle: defer one nullable FK among the remaining edges.
            let breakable = edges.iter().enumerate().find(|(edge_index, edge)| {
                edge_alive[*edge_index]
                    && edge.nullable
                    && !placed[edge.dependent]
                    && !placed[edge.target]
            });
            match breakable {
                Some((edge_index, edge)) => {
                    deferred.push(DeferredFk {
                        handle: inserts[edge.dependent],
                        column: edge.column.clone(),
                        target: inserts[edge.target],
                    });
                    edge_alive[edge_index] = false;
                    in_degree[edge.dependent] -= 1;
                }
                None => {
                    let remaining: Vec<&str> = inserts
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !placed[*i])
                        .map(|(_, h)| h.entity)
                        .collect();
                    return Err(OrmError::UnresolvableInsertCycle(format!(
                        "no nullable foreign key breaks the cycle among: {}",
                        remaining.join(", ")
                    )));
                }
            }
        }

        Ok((order, deferred))
    }

    /// Order deletes so referrers with RESTRICT/NO ACTION keys go first.
    fn plan_delete_order(&self, deletes: &[EntityHandle]) -> Result<Vec<EntityHandle>, OrmError> {
        // Type-level ordering: entity B before entity A when B carries a
        // blocking FK to A.
        let mut types: Vec<&'static str> = Vec::new();
        for handle in deletes {
            if !types.contains(&handle.entity) {
                types.push(handle.entity);
            }
        }

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (referrer_index, referrer) in types.iter().enumerate() {
            let descriptor = self.registry.descriptor(referrer)?;
            for (_, _, fk) in descriptor.owning_relations() {
                if !fk.on_delete.blocks_referenced_delete() {
                    continue;
                }
                if let Some(referenced_index) =
                    types.iter().position(|t| *t == fk.referenced_entity)
                {
                    if referenced_index != referrer_index {
                        edges.push((referrer_index, referenced_index));
                    }
                }
            }
        }

        let mut in_degree = vec![0usize; types.len()];
        for (_, to) in &edges {
            in_degree[*to] += 1;
        }

        let mut type_order: Vec<usize> = Vec::with_capacity(types.len());
        let mut placed = vec![false; types.len()];
        while type_order.len() < types.len() {
            let next = (0..types.len()).find(|i| !placed[*i] && in_degree[*i] == 0);
            let Some(index) = next else {
                return Err(OrmError::query_failed(
                    "circular RESTRICT delete dependency between entity types",
                ));
            };
            placed[index] = true;
            type_order.push(index);
            for (from, to) in &edges {
                if *from == index {
                    in_degree[*to] -= 1;
                }
            }
        }

        let mut ordered = Vec::with_capacity(deletes.len());
        for index in type_order {
            for handle in deletes {
                if handle.entity == types[index] {
                    ordered.push(*handle);
                }
            }
        }
        Ok(ordered)
    }

    fn build_insert_rows(
        &self,
        map: &IdentityMap,
        order: &[EntityHandle],
        deferred: &[DeferredFk],
    ) -> Result<Vec<InsertRow>, OrmError> {
        let mut rows = Vec::with_capacity(order.len());

        for handle in order {
            let slot = map.get(*handle).expect("insert handle attached");
            let descriptor = self.registry.descriptor(handle.entity)?;

            let mut columns = Vec::new();
            let mut values = Vec::new();
            let mut auto_key = false;
            let mut explicit_key = None;

            for (property, column) in &descriptor.columns {
                let value = slot.entity.get_column(property).unwrap_or(Value::Null);
                if property == &descriptor.primary_property {
                    if value.is_null() && column.is_auto_increment() {
                        auto_key = true;
                        continue;
                    }
                    explicit_key = Some(value.clone());
                }
                columns.push(column.name.clone());
                values.push(RowValue::Const(value));
            }

            for (property, _, fk) in descriptor.owning_relations() {
                let is_deferred = deferred
                    .iter()
                    .any(|d| d.handle.slot == handle.slot && d.column == fk.column);
                let reference = slot.entity.get_reference(property).unwrap_or_default();
                let target = if is_deferred {
                    RefTarget::Null
                } else {
                    super::change_set::resolve_ref(map, &reference)
                };
                columns.push(fk.column.clone());
                values.push(RowValue::Ref(target));
            }

            rows.push(InsertRow {
                handle: *handle,
                table: descriptor.table_name.clone(),
                columns,
                values,
                auto_key,
                explicit_key,
            });
        }

        Ok(rows)
    }

    fn execute_inserts(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        rows: Vec<InsertRow>,
        assigned: &mut HashMap<u64, Value>,
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        let mut index = 0;
        while index < rows.len() {
            let first = &rows[index];
            let per_row = first.columns.len().max(1);
            let max_rows = (self.options.max_batch_parameters / per_row).max(1);

            // Coalesce consecutive inserts into the same table with the
            // same column set.
            let mut batch_end = index + 1;
            while batch_end < rows.len()
                && batch_end - index < max_rows
                && rows[batch_end].table == first.table
                && rows[batch_end].columns == first.columns
                && rows[batch_end].auto_key == first.auto_key
            {
                batch_end += 1;
            }

            let batch = &rows[index..batch_end];
            let mut builder = self.factory.insert().into(&first.table);
            for row in batch {
                let pairs: Result<Vec<(String, Value)>, OrmError> = row
                    .columns
                    .iter()
                    .zip(row.values.iter())
                    .map(|(column, value)| {
                        Ok((column.clone(), self.materialise(map, assigned, value)?))
                    })
                    .collect();
                builder = builder.values(pairs?)?;
            }

            let built = builder.to_sql()?;
            built
                .execute(conn, deadline)
                .map_err(|e| e.with_entity(pointer_for(map, batch[0].handle)))?;
            report.inserts += 1;

            if first.auto_key {
                let first_id = conn.last_insert_id()?.ok_or_else(|| {
                    OrmError::query_failed("driver returned no generated key for insert")
                })?;
                for (offset, row) in batch.iter().enumerate() {
                    assigned.insert(row.handle.slot, Value::Int(first_id as i64 + offset as i64));
                }
            } else {
                for row in batch {
                    if let Some(key) = &row.explicit_key {
                        assigned.insert(row.handle.slot, key.clone());
                    }
                }
            }

            index = batch_end;
        }
        Ok(())
    }

    fn execute_deferred_updates(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        deferred: &[DeferredFk],
        assigned: &mut HashMap<u64, Value>,
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        for fk in deferred {
            let descriptor = self.registry.descriptor(fk.handle.entity)?;
            let own_key = self.key_for(map, assigned, fk.handle)?;
            let target_key = self.key_for(map, assigned, fk.target)?;

            let built = self
                .factory
                .update()
                .table(&descriptor.table_name)
                .set(&fk.column, target_key)
                .and_where(
                    &format!("{} = ?", quoted(self.factory, &descriptor.primary_column().name)),
                    vec![own_key],
                )?
                .to_sql()?;
            built
                .execute(conn, deadline)
                .map_err(|e| e.with_entity(pointer_for(map, fk.handle)))?;
            report.deferred_updates += 1;
        }
        Ok(())
    }

    fn execute_updates(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        change_set: &ChangeSet,
        assigned: &mut HashMap<u64, Value>,
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        for record in &change_set.updates {
            let descriptor = self.registry.descriptor(record.handle.entity)?;
            let mut builder = self.factory.update().table(&descriptor.table_name);

            for field in &record.dirty {
                builder = builder.set(&field.column, field.new.clone());
            }
            for change in &record.fk_changes {
                let value = self.materialise(map, assigned, &RowValue::Ref(change.target.clone()))?;
                builder = builder.set(&change.column, value);
            }

            let key = self.key_for(map, assigned, record.handle)?;
            let built = builder
                .and_where(
                    &format!("{} = ?", quoted(self.factory, &descriptor.primary_column().name)),
                    vec![key],
                )?
                .to_sql()?;
            built
                .execute(conn, deadline)
                .map_err(|e| e.with_entity(pointer_for(map, record.handle)))?;
            report.updates += 1;
        }
        Ok(())
    }

    fn execute_unlinks(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        unlinks: &[LinkOperation],
        assigned: &mut HashMap<u64, Value>,
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        for op in unlinks {
            let left = self.materialise(map, assigned, &RowValue::Ref(op.left.clone()))?;
            let right = self.materialise(map, assigned, &RowValue::Ref(op.right.clone()))?;
            let built = self
                .factory
                .delete()
                .from(&op.join_table)
                .and_where(
                    &format!(
                        "{} = ? AND {} = ?",
                        quoted(self.factory, &op.left_column),
                        quoted(self.factory, &op.right_column)
                    ),
                    vec![left, right],
                )?
                .to_sql()?;
            built.execute(conn, deadline)?;
            report.unlinks += 1;
        }
        Ok(())
    }

    fn execute_links(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        links: &[LinkOperation],
        assigned: &mut HashMap<u64, Value>,
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        let mut index = 0;
        while index < links.len() {
            let first = &links[index];
            let max_rows = (self.options.max_batch_parameters / 2).max(1);
            let mut batch_end = index + 1;
            while batch_end < links.len()
                && batch_end - index < max_rows
                && links[batch_end].join_table == first.join_table
                && links[batch_end].left_column == first.left_column
                && links[batch_end].right_column == first.right_column
            {
                batch_end += 1;
            }

            let mut builder = self.factory.insert().into(&first.join_table);
            for op in &links[index..batch_end] {
                let left = self.materialise(map, assigned, &RowValue::Ref(op.left.clone()))?;
                let right = self.materialise(map, assigned, &RowValue::Ref(op.right.clone()))?;
                builder = builder.values(vec![
                    (op.left_column.clone(), left),
                    (op.right_column.clone(), right),
                ])?;
            }

            builder.to_sql()?.execute(conn, deadline)?;
            report.links += 1;
            index = batch_end;
        }
        Ok(())
    }

    fn execute_deletes(
        &self,
        map: &IdentityMap,
        conn: &mut dyn Connection,
        deadline: Option<Deadline>,
        order: &[EntityHandle],
        report: &mut FlushReport,
    ) -> Result<(), OrmError> {
        let mut index = 0;
        while index < order.len() {
            let entity = order[index].entity;
            let mut batch_end = index + 1;
            while batch_end < order.len()
                && order[batch_end].entity == entity
                && batch_end - index < self.options.max_batch_parameters
            {
                batch_end += 1;
            }

            let descriptor = self.registry.descriptor(entity)?;
            let keys: Result<Vec<Value>, OrmError> = order[index..batch_end]
                .iter()
                .map(|handle| {
                    let slot = map.get(*handle).expect("delete handle attached");
                    slot.key
                        .as_ref()
                        .map(|k| k.to_value())
                        .ok_or_else(|| {
                            OrmError::illegal_transition(
                                "cannot delete an entity without a key",
                                EntityPointer::new(entity),
                            )
                        })
                })
                .collect();
            let keys = keys?;

            let markers = vec!["?"; keys.len()].join(", ");
            let built = self
                .factory
                .delete()
                .from(&descriptor.table_name)
                .and_where(
                    &format!(
                        "{} IN ({})",
                        quoted(self.factory, &descriptor.primary_column().name),
                        markers
                    ),
                    keys,
                )?
                .to_sql()?;
            built
                .execute(conn, deadline)
                .map_err(|e| e.with_entity(pointer_for(map, order[index])))?;
            report.deletes += 1;

            index = batch_end;
        }
        Ok(())
    }

    fn materialise(
        &self,
        map: &IdentityMap,
        assigned: &HashMap<u64, Value>,
        value: &RowValue,
    ) -> Result<Value, OrmError> {
        match value {
            RowValue::Const(v) => Ok(v.clone()),
            RowValue::Ref(RefTarget::Null) => Ok(Value::Null),
            RowValue::Ref(RefTarget::Key(v)) => Ok(v.clone()),
            RowValue::Ref(RefTarget::Pending(handle)) => self.key_for(map, assigned, *handle),
        }
    }

    fn key_for(
        &self,
        map: &IdentityMap,
        assigned: &HashMap<u64, Value>,
        handle: EntityHandle,
    ) -> Result<Value, OrmError> {
        if let Some(value) = assigned.get(&handle.slot) {
            return Ok(value.clone());
        }
        map.get(handle)
            .and_then(|slot| slot.key.as_ref())
            .map(|k| k.to_value())
            .ok_or_else(|| {
                OrmError::query_failed(format!(
                    "no key available for {} during flush",
                    handle.entity
                ))
            })
    }

    /// Apply post-commit transitions: key write-back, snapshot refresh,
    /// identity-map cleanup.
    fn write_back(
        &self,
        map: &mut IdentityMap,
        change_set: &ChangeSet,
        assigned: &HashMap<u64, Value>,
    ) -> Result<(), OrmError> {
        for handle in &change_set.inserts {
            if let Some(value) = assigned.get(&handle.slot) {
                let descriptor = self.registry.descriptor(handle.entity)?;
                let primary_property = descriptor.primary_property.clone();
                if let Some(slot) = map.get_mut(*handle) {
                    slot.entity.set_column(&primary_property, value.clone())?;
                }
                map.assign_key(*handle, EntityKey::from_value(value)?)?;
            }
            map.set_state(*handle, EntityState::Managed);
        }

        for handle in &change_set.deletes {
            map.remove_slot(*handle);
        }

        for handle in map.handles() {
            let descriptor = self.registry.descriptor(handle.entity)?;
            if let Some(slot) = map.get_mut(handle) {
                if slot.state == EntityState::Managed {
                    slot.snapshot = Snapshot::take(&descriptor, slot.entity.as_ref());
                }
            }
        }

        Ok(())
    }
}

fn run_phase(
    conn: &mut dyn Connection,
    use_savepoints: bool,
    name: &str,
    phase: impl FnOnce(&mut dyn Connection) -> Result<(), OrmError>,
) -> Result<(), OrmError> {
    if use_savepoints {
        conn.savepoint(name)?;
    }
    match phase(conn) {
        Ok(()) => {
            if use_savepoints {
                conn.release_savepoint(name)?;
            }
            Ok(())
        }
        Err(error) => {
            if use_savepoints {
                // Reported with the offending statement; the outer rollback
                // still unwinds the whole flush.
                let _ = conn.rollback_to_savepoint(name);
            }
            Err(error)
        }
    }
}

fn quoted(factory: &QueryFactory, identifier: &str) -> String {
    factory.dialect().quote_identifier(identifier)
}

fn pointer_for(map: &IdentityMap, handle: EntityHandle) -> EntityPointer {
    let mut pointer = EntityPointer::new(handle.entity);
    if let Some(key) = map.get(handle).and_then(|slot| slot.key.as_ref()) {
        pointer = pointer.with_key(key.to_value());
    }
    pointer
}
