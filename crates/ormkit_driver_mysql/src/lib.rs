//! MySQL driver for the core driver traits, built on the synchronous
//! `mysql` crate: named-parameter statements, savepoint-capable
//! transactions, generated-key retrieval, KILL QUERY cancellation and
//! information_schema introspection.

mod driver;

pub use driver::{MysqlConnection, MysqlDriver};
