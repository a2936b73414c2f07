#![allow(clippy::result_large_err)]

mod dialect;
mod driver;
mod error;
mod params;
mod schema;
mod sql_format;
mod value;

pub mod cache;
pub mod query;

pub use dialect::{MysqlDialect, SqlDialect};
pub use driver::{
    ColumnMeta, Connection, ConnectionConfig, Deadline, Driver, DriverCapabilities, ResultCursor,
    Row, RowSet, Statement,
};
pub use error::{EntityPointer, OrmError, StatementInfo};
pub use params::{collect_placeholders, BoundParam, ParameterBag};
pub use schema::{ColumnInfo, ForeignKeyInfo, IndexGroupBuilder, IndexInfo, TableInfo};
pub use value::{ParamType, Value};

pub mod sql {
    //! Pure SQL formatting helpers.
    pub use crate::sql_format::{
        format_alias, format_identifier, format_value, is_expression, quote_string,
    };
}

pub use chrono;
