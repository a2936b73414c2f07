//! Umbrella crate: the full public surface re-exported under one roof.
//!
//! ```no_run
//! use ormkit::{ConnectionConfig, Driver, MysqlDriver, Session};
//! use ormkit::metadata::MetadataRegistry;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), ormkit::OrmError> {
//! let registry = Arc::new(MetadataRegistry::new());
//! let config = ConnectionConfig::new("localhost")
//!     .with_user("app")
//!     .with_database("app_db");
//! let conn = MysqlDriver.open(&config)?;
//! let mut session = Session::new(registry, conn);
//! session.flush()?;
//! # Ok(())
//! # }
//! ```

pub use ormkit_core::{
    cache, query, sql, ColumnMeta, Connection, ConnectionConfig, Deadline, Driver,
    DriverCapabilities, EntityPointer, MysqlDialect, OrmError, ParamType, ParameterBag,
    ResultCursor, Row, RowSet, SqlDialect, Statement, StatementInfo, Value,
};

pub use ormkit_orm::{
    metadata, schema_sync, Entity, EntityHandle, EntityKey, EntityRef, PersistentEntity,
    TypedHandle,
};

pub use ormkit_orm::session::{
    FlushOptions, FlushReport, Repository, Session, UnitOfWork,
};

pub use ormkit_driver_mysql::MysqlDriver;

pub use ormkit_cli as cli;
