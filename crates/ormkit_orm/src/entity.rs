use crate::metadata::EntityMapping;
use ormkit_core::{OrmError, Value};
use std::any::Any;

/// Handle to an entity owned by a session's identity map.
///
/// Handles are small, copyable and non-owning; the identity map owns the
/// instances. Relation properties store handles (or raw keys not yet
/// resolved), never the related instance itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub(crate) entity: &'static str,
    pub(crate) slot: u64,
}

impl EntityHandle {
    pub fn entity_name(&self) -> &'static str {
        self.entity
    }
}

/// Typed wrapper over [`EntityHandle`].
pub struct TypedHandle<E> {
    raw: EntityHandle,
    _marker: std::marker::PhantomData<fn() -> E>,
}

impl<E> TypedHandle<E> {
    pub(crate) fn new(raw: EntityHandle) -> Self {
        Self {
            raw,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn raw(&self) -> EntityHandle {
        self.raw
    }
}

impl<E> Clone for TypedHandle<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for TypedHandle<E> {}

impl<E> std::fmt::Debug for TypedHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedHandle({:?})", self.raw)
    }
}

/// A relation property value: either a resolved in-session handle or a
/// `(type, key)` pair yet to be resolved. References are non-owning.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EntityRef {
    #[default]
    Unset,
    /// Known primary key, target not loaded in this session.
    Key(Value),
    /// Resolved handle into the identity map.
    Handle(EntityHandle),
}

impl EntityRef {
    pub fn key(value: impl Into<Value>) -> Self {
        EntityRef::Key(value.into())
    }

    pub fn handle<E>(handle: TypedHandle<E>) -> Self {
        EntityRef::Handle(handle.raw())
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, EntityRef::Unset)
    }
}

/// Hashable primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl EntityKey {
    pub fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Int(i) => Ok(EntityKey::Int(*i)),
            Value::Text(s) => Ok(EntityKey::Str(s.clone())),
            Value::Bytes(b) => Ok(EntityKey::Bytes(b.clone())),
            other => Err(OrmError::mapping(format!(
                "value {:?} is not usable as a primary key",
                other
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityKey::Int(i) => Value::Int(*i),
            EntityKey::Str(s) => Value::Text(s.clone()),
            EntityKey::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Int(i) => write!(f, "{}", i),
            EntityKey::Str(s) => write!(f, "{}", s),
            EntityKey::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Object-safe accessor surface for mapped instances.
///
/// The per-property `get_*`/`set_*` dispatch stands in for reflective
/// accessor discovery: it is resolved once per type (in the vtable), not per
/// flush. A mapped property without an accessor arm surfaces as a mapping
/// error at registration.
pub trait PersistentEntity: Any {
    fn entity_name(&self) -> &'static str;

    /// Read a column property. `None` means the property has no accessor.
    fn get_column(&self, property: &str) -> Option<Value>;

    /// Write a column property.
    fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError>;

    /// Read a to-one relation property.
    fn get_reference(&self, _property: &str) -> Option<EntityRef> {
        None
    }

    /// Write a to-one relation property.
    fn set_reference(&mut self, property: &str, _reference: EntityRef) -> Result<(), OrmError> {
        Err(OrmError::UnknownColumn(property.to_string()))
    }

    /// Read a collection relation property.
    fn get_collection(&self, _property: &str) -> Option<Vec<EntityRef>> {
        None
    }

    /// Write a collection relation property.
    fn set_collection(
        &mut self,
        property: &str,
        _references: Vec<EntityRef>,
    ) -> Result<(), OrmError> {
        Err(OrmError::UnknownColumn(property.to_string()))
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A persistable entity type with a static mapping.
///
/// `Default` supplies the blank instance used for hydration.
pub trait Entity: PersistentEntity + Default + Sized + 'static {
    /// Unique entity name; conventionally the type path.
    const NAME: &'static str;

    /// The declarative mapping compiled into a descriptor by the registry.
    fn mapping() -> EntityMapping;
}
