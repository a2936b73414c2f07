//! Reconciler scenarios: initial creation, additive diffs, drops behind
//! constraint phases, idempotence and migration-runner drift detection.

use ormkit_core::{ColumnInfo, ForeignKeyInfo, OrmError, RowSet, TableInfo, Value};
use ormkit_orm::schema_sync::{
    build_desired_schema, DdlOperation, MigrationRunner, SchemaReconciler,
};
use ormkit_test_support::fixtures::{self, table_info_from_definition};
use ormkit_test_support::FakeDriver;

/// Seed the fake introspection surface with exactly the desired schema.
fn seed_with_desired(driver: &FakeDriver) {
    let registry = fixtures::registry();
    let desired = build_desired_schema(&registry).unwrap();
    for definition in desired.values() {
        driver.set_table(table_info_from_definition(definition));
    }
}

#[test]
fn empty_database_plans_creates_then_foreign_keys() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    let mut conn = driver.connection();

    let plan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();

    let create_positions: Vec<usize> = plan
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, DdlOperation::CreateTable(_)))
        .map(|(i, _)| i)
        .collect();
    let fk_positions: Vec<usize> = plan
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, DdlOperation::AddForeignKey { .. }))
        .map(|(i, _)| i)
        .collect();

    // Every entity table plus the many-to-many join table.
    assert_eq!(create_positions.len(), 6);
    // users→profiles, profiles→users, posts→categories, two on the join
    // table.
    assert_eq!(fk_positions.len(), 5);
    assert!(create_positions.iter().max() < fk_positions.iter().min());
}

#[test]
fn up_to_date_schema_plans_nothing() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    seed_with_desired(&driver);
    let mut conn = driver.connection();

    let plan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();
    assert!(plan.is_empty(), "unexpected operations: {:?}", plan);
}

#[test]
fn added_descriptor_column_emits_exactly_one_add_column() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    seed_with_desired(&driver);

    // Live schema predates the email column.
    let desired = build_desired_schema(&registry).unwrap();
    let mut users = table_info_from_definition(&desired["users"]);
    users.columns.retain(|c| c.name != "email");
    users.indexes.retain(|i| i.name != "uniq_users_email");
    driver.set_table(users);

    let mut conn = driver.connection();
    let plan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();

    let adds: Vec<&DdlOperation> = plan
        .iter()
        .filter(|op| matches!(op, DdlOperation::AddColumn { .. }))
        .collect();
    assert_eq!(adds.len(), 1);
    match adds[0] {
        DdlOperation::AddColumn { table, column } => {
            assert_eq!(table, "users");
            assert_eq!(column.name, "email");
            assert_eq!(
                adds[0].to_sql(),
                "ALTER TABLE `users` ADD COLUMN `email` varchar(255) NOT NULL;"
            );
        }
        _ => unreachable!(),
    }

    // The dropped unique index comes back too, after the column.
    assert!(plan.iter().any(
        |op| matches!(op, DdlOperation::CreateIndex { index, .. } if index.name == "uniq_users_email")
    ));

    // Applying the plan and re-running yields no operations.
    seed_with_desired(&driver);
    let mut conn = driver.connection();
    let replan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();
    assert!(replan.is_empty());
}

#[test]
fn type_change_emits_modify_column() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    seed_with_desired(&driver);

    let desired = build_desired_schema(&registry).unwrap();
    let mut users = table_info_from_definition(&desired["users"]);
    for column in &mut users.columns {
        if column.name == "login_count" {
            column.column_type = "smallint".to_string();
        }
    }
    driver.set_table(users);

    let mut conn = driver.connection();
    let plan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();

    assert!(plan.iter().any(|op| matches!(
        op,
        DdlOperation::ModifyColumn { table, column } if table == "users" && column.name == "login_count"
    )));
}

#[test]
fn stray_table_is_dropped_after_its_inbound_foreign_keys() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    seed_with_desired(&driver);

    // A leftover table referencing users.
    driver.set_table(TableInfo {
        name: "sessions_old".to_string(),
        columns: vec![
            ColumnInfo {
                name: "id".to_string(),
                column_type: "int".to_string(),
                nullable: false,
                default_value: None,
                extra: String::new(),
                is_primary_key: true,
                enum_values: None,
            },
            ColumnInfo {
                name: "user_id".to_string(),
                column_type: "int unsigned".to_string(),
                nullable: true,
                default_value: None,
                extra: String::new(),
                is_primary_key: false,
                enum_values: None,
            },
        ],
        indexes: Vec::new(),
        foreign_keys: vec![ForeignKeyInfo {
            constraint_name: "fk_sessions_old_user_id_users".to_string(),
            column: "user_id".to_string(),
            referenced_table: "users".to_string(),
            referenced_column: "id".to_string(),
            on_delete: "CASCADE".to_string(),
            on_update: "NO ACTION".to_string(),
        }],
    });

    let mut conn = driver.connection();
    let plan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();

    let fk_drop = plan
        .iter()
        .position(|op| matches!(op, DdlOperation::DropForeignKey { .. }))
        .expect("fk drop");
    let table_drop = plan
        .iter()
        .position(
            |op| matches!(op, DdlOperation::DropTable { table } if table == "sessions_old"),
        )
        .expect("table drop");
    assert!(fk_drop < table_drop);
}

#[test]
fn auto_increment_seed_is_applied_on_creation() {
    use ormkit_orm::metadata::{ColumnMapping, ColumnType, EntityMapping, MetadataRegistry};
    use ormkit_orm::{Entity, PersistentEntity};
    use std::any::Any;

    #[derive(Debug, Default)]
    struct Ticket {
        id: Option<i64>,
    }

    impl PersistentEntity for Ticket {
        fn entity_name(&self) -> &'static str {
            Self::NAME
        }

        fn get_column(&self, property: &str) -> Option<Value> {
            match property {
                "id" => Some(self.id.map(Value::Int).unwrap_or(Value::Null)),
                _ => None,
            }
        }

        fn set_column(&mut self, property: &str, value: Value) -> Result<(), OrmError> {
            match property {
                "id" => {
                    self.id = value.as_int();
                    Ok(())
                }
                _ => Err(OrmError::UnknownColumn(property.to_string())),
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    impl Entity for Ticket {
        const NAME: &'static str = "Ticket";

        fn mapping() -> EntityMapping {
            EntityMapping::new(Self::NAME)
                .with_auto_increment(5000)
                .column(
                    ColumnMapping::new("id", ColumnType::BigInt)
                        .unsigned()
                        .primary()
                        .with_extra("auto_increment"),
                )
        }
    }

    let registry = MetadataRegistry::new();
    registry.register::<Ticket>();

    let driver = FakeDriver::new();
    let mut conn = driver.connection();
    let plan = SchemaReconciler::new(&registry).plan(&mut conn).unwrap();

    let create = plan
        .iter()
        .position(|op| matches!(op, DdlOperation::CreateTable(_)))
        .unwrap();
    let seed = plan
        .iter()
        .position(|op| {
            matches!(op, DdlOperation::SetAutoIncrement { table, value } if table == "ticket" && *value == 5000)
        })
        .expect("auto increment adjustment");
    assert!(create < seed);
    assert_eq!(
        plan[seed].to_sql(),
        "ALTER TABLE `ticket` AUTO_INCREMENT = 5000;"
    );
}

#[test]
fn migration_runner_applies_and_records_the_plan() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    let mut conn = driver.connection();

    let runner = MigrationRunner::new(&registry);
    let applied = runner.apply(&mut conn).unwrap();
    assert!(applied > 0);

    let sql = driver.executed_sql();
    assert!(sql.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS `_ormkit_migrations`")));
    assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE `users`")));
    assert!(sql.iter().any(|s| s.contains("INSERT INTO `_ormkit_migrations`")));

    let begin = sql.iter().position(|s| s == "BEGIN").unwrap();
    let commit = sql.iter().position(|s| s == "COMMIT").unwrap();
    assert!(begin < commit);
}

#[test]
fn apply_plan_detects_schema_drift() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    let mut conn = driver.connection();

    let runner = MigrationRunner::new(&registry);
    let plan = runner.plan(&mut conn).unwrap();
    assert!(!plan.is_empty());

    // Someone else created part of the schema in between.
    seed_with_desired(&driver);

    let error = runner.apply_plan(&mut conn, &plan).unwrap_err();
    assert!(matches!(error, OrmError::MigrationConflict(_)));
}

#[test]
fn status_reports_applied_rows_from_the_log_table() {
    let registry = fixtures::registry();
    let driver = FakeDriver::new();
    seed_with_desired(&driver);

    // Pretend a previous run recorded one migration.
    driver.set_table(TableInfo {
        name: "_ormkit_migrations".to_string(),
        ..TableInfo::default()
    });
    driver.set_outcome(
        "SELECT `id`, `checksum`, `statement_count`, `applied_at` \
         FROM `_ormkit_migrations` ORDER BY `id` ASC",
        ormkit_test_support::FakeOutcome::Rows(RowSet {
            columns: vec![],
            rows: vec![vec![
                Value::Int(1),
                Value::Text("abc".to_string()),
                Value::Int(12),
                Value::Text("2026-07-01 10:00:00".to_string()),
            ]],
        }),
    );

    let mut conn = driver.connection();
    let runner = MigrationRunner::new(&registry);
    let status = runner.status(&mut conn).unwrap();

    assert!(status.pending.is_empty());
    assert_eq!(status.applied.len(), 1);
    assert_eq!(status.applied[0].statement_count, 12);
}
