//! End-to-end session scenarios against the fake driver: insert with
//! generated keys, cyclic inserts, dirty updates, cascade deletes,
//! many-to-many link maintenance and failure rollback.

use ormkit_core::{DriverCapabilities, OrmError, ParameterBag, Value};
use ormkit_orm::metadata::{
    ColumnMapping, ColumnType, EntityMapping, ForeignKeyMapping, RelationMapping,
};
use ormkit_orm::session::EntityState;
use ormkit_orm::{Entity, EntityRef, PersistentEntity};
use ormkit_test_support::fixtures::{self, Category, Post, Profile, Tag, User};
use ormkit_test_support::FakeDriver;
use std::any::Any;

fn new_user(name: &str, email: &str) -> User {
    User {
        id: None,
        name: name.to_string(),
        email: email.to_string(),
        login_count: 0,
        profile: EntityRef::Unset,
    }
}

#[test]
fn insert_with_auto_increment_assigns_key_and_registers_identity() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    let handle = session.persist(new_user("A", "a@x")).unwrap();
    session.flush().unwrap();

    assert_eq!(session.get(handle).unwrap().id, Some(1));
    assert_eq!(session.state_of(handle.raw()), Some(EntityState::Managed));

    let sql = driver.executed_sql();
    assert!(sql.iter().any(|s| {
        s == "INSERT INTO `users` (`name`, `email`, `login_count`, `profile_id`) \
              VALUES (:param1, :param2, :param3, :param4)"
    }));

    // find() after flush resolves from the identity map, same instance.
    let found = session.find::<User>(1i64).unwrap().unwrap();
    assert_eq!(found.raw(), handle.raw());
}

#[test]
fn single_entity_without_fks_produces_exactly_one_insert() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    session
        .persist(Tag {
            id: None,
            label: "rust".to_string(),
        })
        .unwrap();
    session.flush().unwrap();

    let inserts: Vec<String> = driver
        .executed_sql()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .collect();
    assert_eq!(
        inserts,
        vec!["INSERT INTO `tags` (`label`) VALUES (:param1)".to_string()]
    );
}

#[test]
fn cyclic_insert_defers_the_nullable_foreign_key() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    let user = session.persist(new_user("A", "a@x")).unwrap();
    let profile = session
        .persist(Profile {
            id: None,
            bio: "hi".to_string(),
            user: EntityRef::Unset,
        })
        .unwrap();

    session.get_mut(user).unwrap().profile = EntityRef::handle(profile);
    session.get_mut(profile).unwrap().user = EntityRef::handle(user);

    session.flush().unwrap();

    let sql = driver.executed_sql();
    let user_insert = sql
        .iter()
        .position(|s| s.starts_with("INSERT INTO `users`"))
        .expect("user insert");
    let profile_insert = sql
        .iter()
        .position(|s| s.starts_with("INSERT INTO `profiles`"))
        .expect("profile insert");
    let fk_completion = sql
        .iter()
        .position(|s| s.starts_with("UPDATE `users` SET `profile_id`"))
        .expect("deferred fk update");

    assert!(user_insert < profile_insert);
    assert!(profile_insert < fk_completion);

    // The user insert carried NULL for the deferred column.
    let log = driver.statement_log();
    let insert = &log[user_insert];
    assert!(insert
        .params
        .iter()
        .any(|(_, value)| value.is_null()));

    // Both keys assigned and both sides resolvable.
    assert_eq!(session.get(user).unwrap().id, Some(1));
    assert_eq!(session.get(profile).unwrap().id, Some(2));
}

#[test]
fn unresolvable_cycle_without_nullable_fk_is_an_error() {
    #[derive(Debug, Default)]
    struct Left {
        id: Option<i64>,
        other: EntityRef,
    }

    #[derive(Debug, Default)]
    struct Right {
        id: Option<i64>,
        other: EntityRef,
    }

    macro_rules! key_entity {
        ($ty:ident, $name:literal, $target:literal) => {
            impl PersistentEntity for $ty {
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

                fn get_reference(&self, property: &str) -> Option<EntityRef> {
                    match property {
                        "other" => Some(self.other.clone()),
                        _ => None,
                    }
                }

                fn set_reference(
                    &mut self,
                    property: &str,
                    reference: EntityRef,
                ) -> Result<(), OrmError> {
                    match property {
                        "other" => {
                            self.other = reference;
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

            impl Entity for $ty {
                const NAME: &'static str = $name;

                fn mapping() -> EntityMapping {
                    EntityMapping::new(Self::NAME)
                        .column(
                            ColumnMapping::new("id", ColumnType::Int)
                                .primary()
                                .with_extra("auto_increment"),
                        )
                        .relation(
                            RelationMapping::one_to_one("other", $target)
                                .with_foreign_key(ForeignKeyMapping::new().not_null()),
                        )
                }
            }
        };
    }

    key_entity!(Left, "Left", "Right");
    key_entity!(Right, "Right", "Left");

    let registry = std::sync::Arc::new(ormkit_orm::metadata::MetadataRegistry::new());
    registry.register::<Left>();
    registry.register::<Right>();

    let driver = FakeDriver::new();
    let mut session = ormkit_orm::session::Session::new(registry, Box::new(driver.connection()));

    let left = session.persist(Left::default()).unwrap();
    let right = session.persist(Right::default()).unwrap();
    session.get_mut(left).unwrap().other = EntityRef::handle(right);
    session.get_mut(right).unwrap().other = EntityRef::handle(left);

    let error = session.flush().unwrap_err();
    assert!(matches!(error, OrmError::UnresolvableInsertCycle(_)));
}

#[test]
fn dirty_update_emits_exactly_one_update_with_the_dirty_field() {
    let driver = FakeDriver::new().with_query_rows(
        "SELECT `id`, `name`, `email`, `login_count`, `profile_id` FROM `users` \
         WHERE `id` = :param1 LIMIT 1",
        fixtures::user_row(1, "A", "a@x", 5, None),
    );
    let mut session = fixtures::session(&driver);

    let handle = session.find::<User>(1i64).unwrap().unwrap();
    assert_eq!(session.get(handle).unwrap().login_count, 5);

    driver.clear_log();
    session.get_mut(handle).unwrap().login_count = 6;
    session.flush().unwrap();

    let updates: Vec<_> = driver
        .statement_log()
        .into_iter()
        .filter(|s| s.sql.starts_with("UPDATE"))
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        updates[0].sql,
        "UPDATE `users` SET `login_count` = :param1 WHERE `id` = :param2"
    );
    assert_eq!(updates[0].params[0].1, Value::Int(6));
    assert_eq!(updates[0].params[1].1, Value::Int(1));
}

#[test]
fn clean_entity_produces_no_statements() {
    let driver = FakeDriver::new().with_query_rows(
        "SELECT `id`, `name`, `email`, `login_count`, `profile_id` FROM `users` \
         WHERE `id` = :param1 LIMIT 1",
        fixtures::user_row(1, "A", "a@x", 5, None),
    );
    let mut session = fixtures::session(&driver);

    session.find::<User>(1i64).unwrap().unwrap();
    driver.clear_log();

    let report = session.flush().unwrap();
    assert_eq!(report, Default::default());
    assert!(driver.executed_sql().is_empty());
}

#[test]
fn cascade_delete_removes_children_before_the_parent() {
    let driver = FakeDriver::new()
        .with_query_rows(
            "SELECT `id`, `title` FROM `categories` WHERE `id` = :param1 LIMIT 1",
            fixtures::category_row(1, "news"),
        )
        .with_query_rows(
            "SELECT `id`, `title`, `category_id` FROM `posts`",
            fixtures::post_rows(&[(10, "a", 1), (11, "b", 1), (12, "c", 1)]),
        );
    let mut session = fixtures::session(&driver);

    let category = session.find::<Category>(1i64).unwrap().unwrap();
    let posts = session.repository::<Post>().find_all().unwrap();
    assert_eq!(posts.len(), 3);

    session.get_mut(category).unwrap().posts =
        posts.iter().map(|p| EntityRef::handle(*p)).collect();

    driver.clear_log();
    session.remove(category.raw()).unwrap();
    session.flush().unwrap();

    let sql = driver.executed_sql();
    let posts_delete = sql
        .iter()
        .position(|s| s.starts_with("DELETE FROM `posts`"))
        .expect("posts delete");
    let category_delete = sql
        .iter()
        .position(|s| s.starts_with("DELETE FROM `categories`"))
        .expect("category delete");
    assert!(posts_delete < category_delete);

    // Removed entities left the identity map.
    assert_eq!(session.state_of(category.raw()), None);
    for post in posts {
        assert_eq!(session.state_of(post.raw()), None);
    }
}

#[test]
fn many_to_many_links_are_batched_after_endpoint_inserts() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    let rust = session
        .persist(Tag {
            id: None,
            label: "rust".to_string(),
        })
        .unwrap();
    let sql_tag = session
        .persist(Tag {
            id: None,
            label: "sql".to_string(),
        })
        .unwrap();

    let post = session
        .persist(Post {
            id: None,
            title: "intro".to_string(),
            category: EntityRef::Key(Value::Int(1)),
            tags: vec![EntityRef::handle(rust), EntityRef::handle(sql_tag)],
        })
        .unwrap();
    session.flush().unwrap();

    let sql = driver.executed_sql();
    let post_insert = sql
        .iter()
        .position(|s| s.starts_with("INSERT INTO `posts`"))
        .expect("post insert");
    let link_insert = sql
        .iter()
        .position(|s| s.starts_with("INSERT INTO `post_tag`"))
        .expect("link insert");
    assert!(post_insert < link_insert);
    assert_eq!(
        sql[link_insert],
        "INSERT INTO `post_tag` (`post_id`, `tag_id`) VALUES (:param1, :param2), (:param3, :param4)"
    );

    // Both tags went through one batched insert, so keys run 1..=2 and the
    // post takes the next generated key.
    assert_eq!(session.get(post).unwrap().id, Some(3));
}

#[test]
fn empty_many_to_many_collections_produce_no_link_rows() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    session
        .persist(Post {
            id: None,
            title: "plain".to_string(),
            category: EntityRef::Key(Value::Int(1)),
            tags: Vec::new(),
        })
        .unwrap();
    session.flush().unwrap();

    assert!(!driver
        .executed_sql()
        .iter()
        .any(|s| s.contains("post_tag")));
}

#[test]
fn removing_a_collection_entry_unlinks_the_join_row() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    let tag = session
        .persist(Tag {
            id: None,
            label: "rust".to_string(),
        })
        .unwrap();
    let post = session
        .persist(Post {
            id: None,
            title: "intro".to_string(),
            category: EntityRef::Key(Value::Int(1)),
            tags: vec![EntityRef::handle(tag)],
        })
        .unwrap();
    session.flush().unwrap();

    driver.clear_log();
    session.get_mut(post).unwrap().tags.clear();
    session.flush().unwrap();

    let sql = driver.executed_sql();
    assert!(sql.iter().any(|s| s.starts_with(
        "DELETE FROM `post_tag` WHERE `post_id` = :param1 AND `tag_id` = :param2"
    )));
}

#[test]
fn failed_flush_rolls_back_and_preserves_in_memory_state() {
    let driver = FakeDriver::new().with_error(
        "INSERT INTO `tags` (`label`) VALUES (:param1)",
        "duplicate entry",
    );
    let mut session = fixtures::session(&driver);

    let handle = session
        .persist(Tag {
            id: None,
            label: "rust".to_string(),
        })
        .unwrap();

    let error = session.flush().unwrap_err();
    assert!(matches!(error, OrmError::QueryFailed { .. }));

    // Rolled back, key not assigned, still scheduled for insert.
    assert_eq!(driver.executed_sql().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(session.get(handle).unwrap().id, None);
    assert_eq!(session.state_of(handle.raw()), Some(EntityState::New));
}

#[test]
fn savepoints_wrap_phases_only_when_the_driver_supports_them() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);
    session
        .persist(Tag {
            id: None,
            label: "a".to_string(),
        })
        .unwrap();
    session.flush().unwrap();
    assert!(driver
        .executed_sql()
        .iter()
        .any(|s| s.starts_with("SAVEPOINT flush_insert")));

    let plain = FakeDriver::new()
        .with_capabilities(DriverCapabilities::LAST_INSERT_ID | DriverCapabilities::INTROSPECTION);
    let mut session = fixtures::session(&plain);
    session
        .persist(Tag {
            id: None,
            label: "b".to_string(),
        })
        .unwrap();
    session.flush().unwrap();
    assert!(!plain.executed_sql().iter().any(|s| s.starts_with("SAVEPOINT")));
}

#[test]
fn persist_on_removed_entity_is_an_illegal_transition() {
    let driver = FakeDriver::new().with_query_rows(
        "SELECT `id`, `name`, `email`, `login_count`, `profile_id` FROM `users` \
         WHERE `id` = :param1 LIMIT 1",
        fixtures::user_row(1, "A", "a@x", 0, None),
    );
    let mut session = fixtures::session(&driver);

    let handle = session.find::<User>(1i64).unwrap().unwrap();
    session.remove(handle.raw()).unwrap();

    let error = session.persist_handle(handle.raw()).unwrap_err();
    assert!(matches!(error, OrmError::IllegalStateTransition { .. }));
}

#[test]
fn remove_requires_a_managed_entity() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    let handle = session
        .persist(Tag {
            id: None,
            label: "x".to_string(),
        })
        .unwrap();

    let error = session.remove(handle.raw()).unwrap_err();
    assert!(matches!(error, OrmError::IllegalStateTransition { .. }));
}

#[test]
fn merge_copies_state_over_the_managed_instance() {
    let driver = FakeDriver::new().with_query_rows(
        "SELECT `id`, `name`, `email`, `login_count`, `profile_id` FROM `users` \
         WHERE `id` = :param1 LIMIT 1",
        fixtures::user_row(1, "A", "a@x", 3, None),
    );
    let mut session = fixtures::session(&driver);

    let handle = session.find::<User>(1i64).unwrap().unwrap();

    let mut detached = new_user("A", "a@x");
    detached.id = Some(1);
    detached.login_count = 9;
    let merged = session.merge(detached).unwrap();

    assert_eq!(merged.raw(), handle.raw());
    assert_eq!(session.get(handle).unwrap().login_count, 9);

    driver.clear_log();
    session.flush().unwrap();
    assert!(driver
        .executed_sql()
        .iter()
        .any(|s| s.starts_with("UPDATE `users` SET `login_count`")));
}

#[test]
fn clear_detaches_everything() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    session
        .persist(Tag {
            id: None,
            label: "x".to_string(),
        })
        .unwrap();
    session.clear();

    driver.clear_log();
    session.flush().unwrap();
    assert!(driver.executed_sql().is_empty());
}

#[test]
fn nested_transactions_are_rejected() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    session.begin_transaction().unwrap();
    let error = session.begin_transaction().unwrap_err();
    assert!(matches!(error, OrmError::Transaction(_)));
    session.rollback().unwrap();
}

#[test]
fn unbound_raw_parameter_fails_at_execution() {
    let driver = FakeDriver::new();
    let mut session = fixtures::session(&driver);

    let mut params = ParameterBag::new();
    params.add_named("ghost", Value::Int(1));
    let error = session
        .execute_raw("UPDATE `users` SET `login_count` = 0 WHERE `id` = 1", params)
        .unwrap_err();
    assert!(matches!(error, OrmError::UnboundParameter(_)));
}
