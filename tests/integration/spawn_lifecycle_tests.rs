//! Spawn/stop round trips through `UserSession` with a mock backend.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use userhub::hub::SpawnOptions;
use userhub::models::token::hash_token;
use userhub::oauth::OAuthClientStore;
use userhub::persistence::oauth_repo::OAuthClientRepo;
use userhub::persistence::server_repo::ServerRepo;
use userhub::persistence::token_repo::TokenRepo;
use userhub::persistence::user_repo::UserRepo;

use super::test_helpers::{
    spawn_backend, test_db_with_user, test_registry, test_session, test_settings, MockFactory,
    StartBehavior,
};

#[tokio::test]
async fn spawn_then_stop_leaves_nothing_behind() {
    let (addr, backend) = spawn_backend(Vec::new(), Some(userhub::version::HUB_VERSION)).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let control = Arc::clone(&factory.control);
    let mut session = test_session(&db, user.clone(), test_settings(&db, factory, false)).await;

    assert!(!session.running());
    session.spawn(SpawnOptions::default()).await.expect("spawn");

    assert!(session.running());
    assert!(!session.spawn_pending() && !session.waiting_for_response());
    assert_eq!(control.starts(), 1);
    assert_eq!(control.polling_started.load(Ordering::SeqCst), 1);
    assert!(backend.hits.load(Ordering::SeqCst) >= 1);

    let server = session.server().expect("server").clone();
    assert_eq!(server.name, "");
    assert_eq!(server.base_url, "/user/alice/");
    assert_eq!(server.port, addr.port());
    assert_eq!(server.url(), format!("http://127.0.0.1:{}/user/alice/", addr.port()));

    let stored = ServerRepo::new(Arc::clone(&db))
        .list_for_user(user.id)
        .await
        .expect("list");
    assert_eq!(stored, [server]);

    let tokens = TokenRepo::new(Arc::clone(&db));
    assert_eq!(tokens.count_for_user(user.id).await.expect("count"), 1);
    let token = session.spawner().options().api_token.clone();
    assert!(tokens.find(&token).await.expect("find").is_some());

    let client = OAuthClientRepo::new(Arc::clone(&db))
        .fetch_by_client_id("user-alice")
        .await
        .expect("oauth client");
    assert_eq!(client.secret_hash, hash_token(&token));
    assert_eq!(client.redirect_uri, "/user/alice/oauth_callback");
    assert_eq!(session.spawner().options().oauth_client_id, "user-alice");

    let persisted = UserRepo::new(Arc::clone(&db))
        .get_by_id(user.id)
        .await
        .expect("user");
    assert_eq!(persisted.state, json!({ "running": true }));
    assert!(persisted.last_activity >= user.last_activity);

    session.stop().await.expect("stop");

    assert!(!session.running());
    assert!(!session.stop_pending());
    assert!(session.servers().is_empty());
    assert_eq!(control.stops(), 1);
    assert_eq!(control.polling_stopped.load(Ordering::SeqCst), 1);
    assert!(ServerRepo::new(Arc::clone(&db))
        .list_for_user(user.id)
        .await
        .expect("list")
        .is_empty());
    assert_eq!(tokens.count_for_user(user.id).await.expect("count"), 0);
    let persisted = UserRepo::new(Arc::clone(&db))
        .get_by_id(user.id)
        .await
        .expect("user");
    assert_eq!(persisted.state, json!({}));
}

#[tokio::test]
async fn resumed_spawner_keeps_token_and_oauth_client() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr)).resuming();
    let mut session = test_session(&db, user.clone(), test_settings(&db, factory, false)).await;
    let tokens = TokenRepo::new(Arc::clone(&db));
    let clients = OAuthClientRepo::new(Arc::clone(&db));

    session.spawn(SpawnOptions::default()).await.expect("first spawn");
    let first_token = session.spawner().options().api_token.clone();
    session.stop().await.expect("first stop");

    // the resumable token survives the stop
    assert_eq!(tokens.count_for_user(user.id).await.expect("count"), 1);
    assert!(tokens.find(&first_token).await.expect("find").is_some());

    session.spawn(SpawnOptions::default()).await.expect("second spawn");

    assert_eq!(session.spawner().options().api_token, first_token);
    assert_eq!(tokens.count_for_user(user.id).await.expect("count"), 1);
    assert!(tokens.find(&first_token).await.expect("find").is_some());
    let client = clients.fetch("user-alice").await.expect("client");
    assert_eq!(client.secret_hash, hash_token(&first_token));

    session.stop().await.expect("second stop");
    assert_eq!(tokens.count_for_user(user.id).await.expect("count"), 1);
    assert!(session.servers().is_empty());
}

#[tokio::test]
async fn stop_skips_backend_that_already_exited() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let control = Arc::clone(&factory.control);
    let mut session = test_session(&db, user.clone(), test_settings(&db, factory, false)).await;

    session.spawn(SpawnOptions::default()).await.expect("spawn");
    control.exited.store(true, Ordering::SeqCst);
    session.stop().await.expect("stop");

    assert_eq!(control.stops(), 0);
    assert!(session.servers().is_empty());
    assert!(ServerRepo::new(Arc::clone(&db))
        .list_for_user(user.id)
        .await
        .expect("list")
        .is_empty());
    assert_eq!(
        TokenRepo::new(db).count_for_user(user.id).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn legacy_start_uses_stored_address() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Legacy(addr));
    let mut session = test_session(&db, user, test_settings(&db, factory, false)).await;

    session.spawn(SpawnOptions::default()).await.expect("spawn");

    let server = session.server().expect("server");
    assert_eq!(server.ip, "127.0.0.1");
    assert_eq!(server.port, addr.port());
    assert!(session.running());
}

#[tokio::test]
async fn readiness_waits_through_bad_gateway() {
    let (addr, backend) =
        spawn_backend(vec![StatusCode::BAD_GATEWAY, StatusCode::BAD_GATEWAY], None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let mut session = test_session(&db, user, test_settings(&db, factory, false)).await;

    let started = std::time::Instant::now();
    session.spawn(SpawnOptions::default()).await.expect("spawn");

    // probes at 0s, 0.1s and 0.3s
    assert_eq!(backend.hits.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= std::time::Duration::from_millis(300));
    assert!(session.running());
}

#[tokio::test]
async fn concurrent_sessions_keep_their_own_flags() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, _alice) = test_db_with_user("alice").await;
    UserRepo::new(Arc::clone(&db))
        .create(&userhub::models::user::NewUser::named("bob"))
        .await
        .expect("bob");
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let registry = test_registry(&db, test_settings(&db, factory, false));

    let alice = registry.get("alice").await.expect("alice");
    let bob = registry.get("bob").await.expect("bob");

    let spawn_alice = {
        let alice = Arc::clone(&alice);
        tokio::spawn(async move {
            alice
                .lock()
                .await
                .spawn(SpawnOptions::default())
                .await
                .map(|_| ())
        })
    };
    let spawn_bob = {
        let bob = Arc::clone(&bob);
        tokio::spawn(async move {
            bob.lock()
                .await
                .spawn(SpawnOptions::default())
                .await
                .map(|_| ())
        })
    };
    spawn_alice.await.expect("join").expect("spawn alice");
    spawn_bob.await.expect("join").expect("spawn bob");

    assert!(alice.lock().await.running());
    assert!(bob.lock().await.running());

    alice.lock().await.stop().await.expect("stop alice");

    let alice = alice.lock().await;
    let bob = bob.lock().await;
    assert!(!alice.running());
    assert!(bob.running());
    assert!(!bob.spawn_pending() && !bob.stop_pending() && !bob.waiting_for_response());
    assert_eq!(bob.server().map(|s| s.base_url.as_str()), Some("/user/bob/"));
}
