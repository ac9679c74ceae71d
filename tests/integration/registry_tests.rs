//! `UserRegistry` lookup, caching and delete.

use std::sync::Arc;

use userhub::hub::{SpawnOptions, UserKey};
use userhub::models::user::NewUser;
use userhub::persistence::token_repo::TokenRepo;
use userhub::persistence::user_repo::UserRepo;
use userhub::AppError;

use super::test_helpers::{
    spawn_backend, test_db_with_user, test_registry, test_settings, MockFactory, StartBehavior,
};

#[tokio::test]
async fn lookups_share_one_session() {
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Fail);
    let registry = test_registry(&db, test_settings(&db, factory, false));

    let by_name = registry.get("alice").await.expect("by name");
    let by_id = registry.get(user.id).await.expect("by id");
    let by_record = registry.get(UserKey::Record(user.clone())).await.expect("by record");

    assert!(Arc::ptr_eq(&by_name, &by_id));
    assert!(Arc::ptr_eq(&by_name, &by_record));
    assert!(registry.contains(user.id).await);
    assert_eq!(registry.sessions().await.len(), 1);
    assert_eq!(by_name.lock().await.name(), "alice");
}

#[tokio::test]
async fn concurrent_lookups_build_one_session_per_user() {
    let (db, alice) = test_db_with_user("alice").await;
    let bob = UserRepo::new(Arc::clone(&db))
        .create(&NewUser::named("bob"))
        .await
        .expect("create bob");
    let factory = MockFactory::new(&db, StartBehavior::Fail);
    let registry = test_registry(&db, test_settings(&db, factory, false));

    let (by_name, by_id, other) = tokio::join!(
        registry.get("alice"),
        registry.get(alice.id),
        registry.get(bob.id),
    );
    let by_name = by_name.expect("alice by name");
    let by_id = by_id.expect("alice by id");
    let other = other.expect("bob");

    assert!(Arc::ptr_eq(&by_name, &by_id));
    assert!(!Arc::ptr_eq(&by_name, &other));
    assert_eq!(registry.sessions().await.len(), 2);
    assert!(Arc::ptr_eq(
        &registry.get("alice").await.expect("cached"),
        &by_name
    ));
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let (db, _user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Fail);
    let registry = test_registry(&db, test_settings(&db, factory, false));

    assert!(matches!(
        registry.get("mallory").await.err(),
        Some(AppError::NotFound(_))
    ));
    assert!(matches!(
        registry.get(4242_i64).await.err(),
        Some(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_stops_server_and_evicts() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let control = Arc::clone(&factory.control);
    let registry = test_registry(&db, test_settings(&db, factory, false));

    let session = registry.get("alice").await.expect("session");
    session
        .lock()
        .await
        .spawn(SpawnOptions::default())
        .await
        .expect("spawn");

    registry.delete("alice").await.expect("delete");

    assert_eq!(control.stops(), 1);
    assert!(!registry.contains(user.id).await);
    assert!(UserRepo::new(Arc::clone(&db))
        .find_by_id(user.id)
        .await
        .expect("find")
        .is_none());
    assert_eq!(
        TokenRepo::new(Arc::clone(&db))
            .count_for_user(user.id)
            .await
            .expect("count"),
        0
    );
    assert!(matches!(
        registry.get(user.id).await.err(),
        Some(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn idle_user_delete_skips_stop() {
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Fail);
    let control = Arc::clone(&factory.control);
    let registry = test_registry(&db, test_settings(&db, factory, false));

    registry.delete(user.id).await.expect("delete");

    assert_eq!(control.stops(), 0);
    assert!(UserRepo::new(db).list().await.expect("list").is_empty());
}
