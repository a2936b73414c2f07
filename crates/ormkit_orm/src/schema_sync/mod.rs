//! Schema reconciliation: the descriptor-derived desired schema, the diff
//! against the live database, and the migration runner.

mod desired;
mod operations;
mod reconciler;
mod runner;

pub use desired::{
    build_desired_schema, ColumnDefinition, ForeignKeyDefinition, IndexDefinition,
    TableDefinition,
};
pub use operations::DdlOperation;
pub use reconciler::SchemaReconciler;
pub use runner::{
    AppliedMigration, MigrationRunner, MigrationStatus, MIGRATION_LOG_TABLE,
};
