use super::operations::DdlOperation;
use super::reconciler::SchemaReconciler;
use crate::metadata::MetadataRegistry;
use chrono::Utc;
use ormkit_core::query::QueryFactory;
use ormkit_core::{Connection, OrmError, ParameterBag, Value};
use sha2::{Digest, Sha256};

/// Table recording applied migrations; excluded from reconciliation.
pub const MIGRATION_LOG_TABLE: &str = "_ormkit_migrations";

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub id: i64,
    pub checksum: String,
    pub statement_count: i64,
    pub applied_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Rendered SQL of operations not yet applied.
    pub pending: Vec<String>,
    pub applied: Vec<AppliedMigration>,
}

/// Plans and applies reconciliation migrations, recording each run in the
/// migration log.
pub struct MigrationRunner<'a> {
    registry: &'a MetadataRegistry,
    factory: QueryFactory,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(registry: &'a MetadataRegistry) -> Self {
        Self {
            registry,
            factory: QueryFactory::default(),
        }
    }

    pub fn plan(&self, conn: &mut dyn Connection) -> Result<Vec<DdlOperation>, OrmError> {
        SchemaReconciler::new(self.registry).plan(conn)
    }

    /// Plan and apply in one step.
    pub fn apply(&self, conn: &mut dyn Connection) -> Result<usize, OrmError> {
        let plan = self.plan(conn)?;
        self.execute_plan(conn, &plan)
    }

    /// Apply a previously computed plan.
    ///
    /// The schema is re-planned first; if the result no longer matches the
    /// expected plan, the schema drifted in between and nothing is applied.
    pub fn apply_plan(
        &self,
        conn: &mut dyn Connection,
        expected: &[DdlOperation],
    ) -> Result<usize, OrmError> {
        let fresh = self.plan(conn)?;
        if fresh != expected {
            return Err(OrmError::MigrationConflict(format!(
                "schema changed between planning and applying ({} operations planned, {} now)",
                expected.len(),
                fresh.len()
            )));
        }
        self.execute_plan(conn, &fresh)
    }

    fn execute_plan(
        &self,
        conn: &mut dyn Connection,
        plan: &[DdlOperation],
    ) -> Result<usize, OrmError> {
        if plan.is_empty() {
            return Ok(0);
        }

        self.ensure_log_table(conn)?;

        conn.begin()?;
        let result = self.execute_statements(conn, plan);
        match result {
            Ok(()) => {
                conn.commit()?;
                Ok(plan.len())
            }
            Err(error) => {
                let _ = conn.rollback();
                Err(error)
            }
        }
    }

    fn execute_statements(
        &self,
        conn: &mut dyn Connection,
        plan: &[DdlOperation],
    ) -> Result<(), OrmError> {
        let empty = ParameterBag::new();
        for operation in plan {
            let sql = operation.to_sql();
            log::debug!("migrate: {}", operation.describe());
            conn.exec(&sql, &empty, None)?;
        }

        let joined: String = plan
            .iter()
            .map(|op| op.to_sql())
            .collect::<Vec<_>>()
            .join("\n");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        let checksum = hex::encode(hasher.finalize());

        self.factory
            .insert()
            .into(MIGRATION_LOG_TABLE)
            .values(vec![
                ("checksum".to_string(), Value::Text(checksum)),
                ("statement_count".to_string(), Value::Int(plan.len() as i64)),
                (
                    "applied_at".to_string(),
                    Value::Text(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
                ),
            ])?
            .to_sql()?
            .execute(conn, None)?;
        Ok(())
    }

    /// Pending operations against applied migration-log rows.
    pub fn status(&self, conn: &mut dyn Connection) -> Result<MigrationStatus, OrmError> {
        let pending = self
            .plan(conn)?
            .iter()
            .map(|op| op.to_sql())
            .collect();

        let mut applied = Vec::new();
        if conn
            .list_tables()?
            .iter()
            .any(|t| t == MIGRATION_LOG_TABLE)
        {
            let rows = self
                .factory
                .select()
                .select(&["id", "checksum", "statement_count", "applied_at"])
                .from(MIGRATION_LOG_TABLE)
                .add_order_by("id", ormkit_core::query::SortOrder::Asc)
                .fetch(conn, None)?;

            for row in &rows.rows {
                applied.push(AppliedMigration {
                    id: row.first().and_then(Value::as_int).unwrap_or_default(),
                    checksum: row.get(1).map(Value::as_display_string).unwrap_or_default(),
                    statement_count: row.get(2).and_then(Value::as_int).unwrap_or_default(),
                    applied_at: row.get(3).map(Value::as_display_string).unwrap_or_default(),
                });
            }
        }

        Ok(MigrationStatus { pending, applied })
    }

    fn ensure_log_table(&self, conn: &mut dyn Connection) -> Result<(), OrmError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS `{}` (\n    \
             `id` bigint unsigned NOT NULL auto_increment,\n    \
             `checksum` varchar(64) NOT NULL,\n    \
             `statement_count` int NOT NULL,\n    \
             `applied_at` datetime NOT NULL,\n    \
             PRIMARY KEY (`id`)\n);",
            MIGRATION_LOG_TABLE
        );
        conn.exec(&sql, &ParameterBag::new(), None)?;
        Ok(())
    }
}
