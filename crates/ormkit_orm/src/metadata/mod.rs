//! Entity metadata: declarative mappings, resolved descriptors and the
//! registry that compiles one into the other.

mod mapping;
mod registry;
mod types;

pub use mapping::{
    ColumnMapping, EntityMapping, ForeignKeyMapping, PropertyMapping, RelationKindMapping,
    RelationMapping,
};
pub use registry::{EntityRegistration, MetadataRegistry};
pub use types::{
    ColumnDescriptor, ColumnType, EntityDescriptor, ForeignKeyDescriptor, KeyRole, Relation,
    RelationCommon, ReferentialAction,
};
