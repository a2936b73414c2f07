use crate::entity::{Entity, TypedHandle};
use crate::session::session::{select_columns, Session};
use ormkit_core::query::SelectBuilder;
use ormkit_core::{OrmError, Value};

/// Typed query surface for one entity type, bound to a session.
///
/// Custom repository types named in the entity metadata wrap this.
pub struct Repository<'s, E: Entity> {
    session: &'s mut Session,
    _marker: std::marker::PhantomData<fn() -> E>,
}

impl<'s, E: Entity> Repository<'s, E> {
    pub(crate) fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn find(&mut self, key: impl Into<Value>) -> Result<Option<TypedHandle<E>>, OrmError> {
        self.session.find::<E>(key)
    }

    pub fn find_all(&mut self) -> Result<Vec<TypedHandle<E>>, OrmError> {
        self.fetch_where(None)
    }

    /// Load every row where `property = value`.
    pub fn find_by(
        &mut self,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<TypedHandle<E>>, OrmError> {
        let descriptor = self.session.registry().descriptor_of::<E>()?;
        let column = descriptor
            .column_for_property(property)
            .map(|c| c.name.clone())
            .ok_or_else(|| OrmError::UnknownColumn(format!("{}.{}", E::NAME, property)))?;
        self.fetch_where(Some((column, value.into())))
    }

    /// A SELECT builder preconfigured for this entity's table.
    pub fn query(&mut self) -> Result<SelectBuilder, OrmError> {
        let descriptor = self.session.registry().descriptor_of::<E>()?;
        let columns = select_columns(&descriptor);
        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        Ok(self
            .session
            .query_factory()
            .select()
            .select(&column_refs)
            .from(&descriptor.table_name))
    }

    fn fetch_where(
        &mut self,
        filter: Option<(String, Value)>,
    ) -> Result<Vec<TypedHandle<E>>, OrmError> {
        let descriptor = self.session.registry().descriptor_of::<E>()?;
        let mut builder = self.query()?;
        if let Some((column, value)) = filter {
            let quoted = self
                .session
                .query_factory()
                .dialect()
                .quote_identifier(&column);
            builder = builder.and_where(&format!("{} = ?", quoted), vec![value])?;
        }
        let built = builder.to_sql()?;
        let deadline = self.session.deadline();
        let rows = built.fetch(self.session.connection(), deadline)?;

        let mut handles = Vec::with_capacity(rows.rows.len());
        for index in 0..rows.rows.len() {
            handles.push(self.session.hydrate_row::<E>(&descriptor, &rows, index)?);
        }
        Ok(handles)
    }
}

impl Session {
    /// The repository for an entity type.
    pub fn repository<E: Entity>(&mut self) -> Repository<'_, E> {
        Repository::new(self)
    }
}
