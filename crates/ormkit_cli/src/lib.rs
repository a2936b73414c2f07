//! Operator command surface for schema migrations.
//!
//! The command tree is embeddable: the host binary owns the entity
//! registrations and the connection, parses its argv into [`MigrateCli`]
//! and hands both to [`run`].
//!
//! Exit codes: 0 success, 1 user error, 2 database error, 3 mapping
//! inconsistency.

use clap::{Parser, Subcommand};
use ormkit_core::{Connection, OrmError};
use ormkit_orm::metadata::MetadataRegistry;
use ormkit_orm::schema_sync::MigrationRunner;
use std::io::Write;

pub const EXIT_OK: i32 = 0;
pub const EXIT_USER_ERROR: i32 = 1;
pub const EXIT_DATABASE_ERROR: i32 = 2;
pub const EXIT_MAPPING_ERROR: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "migrate", about = "Reconcile the database schema with the entity metadata")]
pub struct MigrateCli {
    #[command(subcommand)]
    pub command: MigrateCommand,
}

#[derive(Debug, Subcommand)]
pub enum MigrateCommand {
    /// Compute and print the pending schema operations
    Diff,
    /// Execute the pending operations, recording a migration-log row
    Apply,
    /// Print pending operations and applied migrations
    Status,
}

/// Initialise logging for a host binary; safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Run one migrate command and return the process exit code.
pub fn run(
    cli: &MigrateCli,
    registry: &MetadataRegistry,
    conn: &mut dyn Connection,
    out: &mut dyn Write,
) -> i32 {
    match execute(cli, registry, conn, out) {
        Ok(()) => EXIT_OK,
        Err(error) => {
            let _ = writeln!(out, "error: {}", error);
            exit_code_for(&error)
        }
    }
}

fn execute(
    cli: &MigrateCli,
    registry: &MetadataRegistry,
    conn: &mut dyn Connection,
    out: &mut dyn Write,
) -> Result<(), OrmError> {
    let runner = MigrationRunner::new(registry);

    match cli.command {
        MigrateCommand::Diff => {
            let plan = runner.plan(conn)?;
            if plan.is_empty() {
                writeln!(out, "schema is up to date")?;
            } else {
                writeln!(out, "{} pending operations:", plan.len())?;
                for operation in &plan {
                    writeln!(out, "-- {}", operation.describe())?;
                    writeln!(out, "{}", operation.to_sql())?;
                }
            }
        }
        MigrateCommand::Apply => {
            let plan = runner.plan(conn)?;
            if plan.is_empty() {
                writeln!(out, "schema is up to date")?;
            } else {
                let applied = runner.apply_plan(conn, &plan)?;
                writeln!(out, "applied {} operations", applied)?;
            }
        }
        MigrateCommand::Status => {
            let status = runner.status(conn)?;
            writeln!(out, "pending: {}", status.pending.len())?;
            for sql in &status.pending {
                writeln!(out, "  {}", sql.lines().next().unwrap_or(sql.as_str()))?;
            }
            writeln!(out, "applied: {}", status.applied.len())?;
            for migration in &status.applied {
                writeln!(
                    out,
                    "  #{} {} ({} statements)",
                    migration.id, migration.applied_at, migration.statement_count
                )?;
            }
        }
    }
    Ok(())
}

/// Map an error kind onto the documented exit codes.
pub fn exit_code_for(error: &OrmError) -> i32 {
    match error {
        OrmError::Mapping(_) | OrmError::UnknownEntity(_) => EXIT_MAPPING_ERROR,
        OrmError::InvalidConfig(_)
        | OrmError::UnknownAlias(_)
        | OrmError::UnknownColumn(_)
        | OrmError::UnsafeMutation(_)
        | OrmError::UnboundParameter(_)
        | OrmError::IllegalStateTransition { .. }
        | OrmError::Io(_) => EXIT_USER_ERROR,
        _ => EXIT_DATABASE_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormkit_test_support::fixtures;
    use ormkit_test_support::FakeDriver;

    fn run_command(driver: &FakeDriver, command: MigrateCommand) -> (i32, String) {
        let registry = fixtures::registry();
        let mut conn = driver.connection();
        let mut out = Vec::new();
        let code = run(
            &MigrateCli { command },
            &registry,
            &mut conn,
            &mut out,
        );
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn diff_prints_pending_operations_for_empty_database() {
        let driver = FakeDriver::new();
        let (code, output) = run_command(&driver, MigrateCommand::Diff);
        assert_eq!(code, EXIT_OK);
        assert!(output.contains("pending operations"));
        assert!(output.contains("CREATE TABLE `users`"));
    }

    #[test]
    fn apply_executes_and_records_migration() {
        let driver = FakeDriver::new();
        let (code, output) = run_command(&driver, MigrateCommand::Apply);
        assert_eq!(code, EXIT_OK);
        assert!(output.contains("applied"));

        let sql = driver.executed_sql();
        assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE `users`")));
        assert!(sql
            .iter()
            .any(|s| s.contains("INSERT INTO `_ormkit_migrations`")));
    }

    #[test]
    fn status_reports_pending_counts() {
        let driver = FakeDriver::new();
        let (code, output) = run_command(&driver, MigrateCommand::Status);
        assert_eq!(code, EXIT_OK);
        assert!(output.contains("pending:"));
        assert!(output.contains("applied: 0"));
    }

    #[test]
    fn exit_codes_follow_error_taxonomy() {
        assert_eq!(exit_code_for(&OrmError::mapping("bad")), EXIT_MAPPING_ERROR);
        assert_eq!(
            exit_code_for(&OrmError::unknown_entity("X")),
            EXIT_MAPPING_ERROR
        );
        assert_eq!(
            exit_code_for(&OrmError::InvalidConfig("x".into())),
            EXIT_USER_ERROR
        );
        assert_eq!(exit_code_for(&OrmError::Timeout), EXIT_DATABASE_ERROR);
        assert_eq!(
            exit_code_for(&OrmError::integrity("dup")),
            EXIT_DATABASE_ERROR
        );
    }
}
