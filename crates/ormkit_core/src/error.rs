use crate::Value;
use thiserror::Error;

/// SQL statement attached to an error for diagnostics.
///
/// Carries the originating SQL and its bound parameters so callers can log
/// or display the exact statement the database rejected.
#[derive(Debug, Clone, Default)]
pub struct StatementInfo {
    pub sql: String,
    pub parameters: Vec<(String, Value)>,
}

impl StatementInfo {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<(String, Value)>) -> Self {
        self.parameters = parameters;
        self
    }
}

impl std::fmt::Display for StatementInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.parameters.is_empty() {
            let rendered: Vec<String> = self
                .parameters
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            write!(f, " [{}]", rendered.join(", "))?;
        }
        Ok(())
    }
}

/// Pointer to the entity an error originated from.
#[derive(Debug, Clone)]
pub struct EntityPointer {
    pub entity: String,
    pub key: Option<Value>,
}

impl EntityPointer {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }
}

impl std::fmt::Display for EntityPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}#{}", self.entity, key),
            None => write!(f, "{}", self.entity),
        }
    }
}

/// Object-mapper errors.
///
/// All builder, session, driver and reconciler operations return this type.
/// Variants that surface SQL carry the offending statement; variants that
/// point at an entity carry its type and key.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Declared metadata is inconsistent with itself or with reality.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Requested type has no descriptor in the registry.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// A persist/remove call on an entity whose state forbids it.
    #[error("Illegal state transition for {entity}: {message}")]
    IllegalStateTransition {
        message: String,
        entity: EntityPointer,
    },

    /// A bound placeholder does not appear in the SQL.
    #[error("Unbound parameter: {0}")]
    UnboundParameter(String),

    /// Query references an alias not introduced in FROM/JOIN.
    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    /// Query references a column not known to the builder.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// WHERE-less UPDATE/DELETE without explicit opt-in.
    #[error("Unsafe mutation: {0}")]
    UnsafeMutation(String),

    /// The database rejected a statement on a constraint.
    #[error("Integrity violation: {message}")]
    IntegrityViolation {
        message: String,
        statement: Option<StatementInfo>,
        entity: Option<EntityPointer>,
    },

    /// No nullable foreign key breaks a cycle in the insert graph.
    #[error("Unresolvable insert cycle: {0}")]
    UnresolvableInsertCycle(String),

    /// Driver-level I/O failure.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A statement or deadline timed out.
    #[error("Operation timed out")]
    Timeout,

    /// A statement was cancelled through the driver primitive.
    #[error("Operation cancelled")]
    Cancelled,

    /// Schema drifted between planning and applying a migration.
    #[error("Migration conflict: {0}")]
    MigrationConflict(String),

    /// General statement failure.
    #[error("Query failed: {message}")]
    QueryFailed {
        message: String,
        statement: Option<StatementInfo>,
    },

    /// Transaction state does not permit the operation.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Operation not supported by this driver.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Connection configuration is malformed or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrmError {
    pub fn mapping(msg: impl Into<String>) -> Self {
        Self::Mapping(msg.into())
    }

    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity(name.into())
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: msg.into(),
            statement: None,
        }
    }

    pub fn query_failed_with(msg: impl Into<String>, statement: StatementInfo) -> Self {
        Self::QueryFailed {
            message: msg.into(),
            statement: Some(statement),
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: msg.into(),
            statement: None,
            entity: None,
        }
    }

    pub fn illegal_transition(msg: impl Into<String>, entity: EntityPointer) -> Self {
        Self::IllegalStateTransition {
            message: msg.into(),
            entity,
        }
    }

    /// Attach statement context to errors that can carry it.
    pub fn with_statement(self, statement: StatementInfo) -> Self {
        match self {
            Self::QueryFailed { message, .. } => Self::QueryFailed {
                message,
                statement: Some(statement),
            },
            Self::IntegrityViolation {
                message, entity, ..
            } => Self::IntegrityViolation {
                message,
                statement: Some(statement),
                entity,
            },
            other => other,
        }
    }

    /// Attach an entity pointer to errors that can carry it.
    pub fn with_entity(self, pointer: EntityPointer) -> Self {
        match self {
            Self::IntegrityViolation {
                message, statement, ..
            } => Self::IntegrityViolation {
                message,
                statement,
                entity: Some(pointer),
            },
            other => other,
        }
    }

    /// The statement attached to this error, if any.
    pub fn statement(&self) -> Option<&StatementInfo> {
        match self {
            Self::QueryFailed { statement, .. } | Self::IntegrityViolation { statement, .. } => {
                statement.as_ref()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_info_renders_parameters() {
        let info = StatementInfo::new("SELECT * FROM users WHERE id = :param1")
            .with_parameters(vec![("param1".to_string(), Value::Int(42))]);
        assert_eq!(
            info.to_string(),
            "SELECT * FROM users WHERE id = :param1 [param1=42]"
        );
    }

    #[test]
    fn with_statement_attaches_context() {
        let err = OrmError::integrity("duplicate entry")
            .with_statement(StatementInfo::new("INSERT INTO users"));
        assert!(err.statement().is_some());
    }

    #[test]
    fn entity_pointer_display_includes_key() {
        let ptr = EntityPointer::new("User").with_key(Value::Int(1));
        assert_eq!(ptr.to_string(), "User#1");
    }
}
