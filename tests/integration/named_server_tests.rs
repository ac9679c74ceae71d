//! Server naming with and without named servers.

use std::sync::Arc;

use userhub::hub::SpawnOptions;
use userhub::models::server::Server;
use userhub::oauth::OAuthClientStore;
use userhub::persistence::oauth_repo::OAuthClientRepo;
use userhub::persistence::server_repo::ServerRepo;

use super::test_helpers::{
    spawn_backend, test_db_with_user, test_session, test_settings, MockFactory, StartBehavior,
};

#[tokio::test]
async fn default_name_fills_lowest_gap() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let servers = ServerRepo::new(Arc::clone(&db));
    for name in ["1", "2", "4"] {
        servers
            .create(&Server::new(user.id, name, format!("/user/alice/{name}/")))
            .await
            .expect("existing server");
    }
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let mut session = test_session(&db, user, test_settings(&db, factory, true)).await;
    assert_eq!(session.servers().len(), 3);

    session.spawn(SpawnOptions::default()).await.expect("spawn");

    let spawned = session.servers().last().expect("server");
    assert_eq!(spawned.name, "3");
    assert_eq!(spawned.base_url, "/user/alice/3/");
    assert_eq!(session.spawner().options().server_name, "3");
    assert_eq!(session.spawner().options().oauth_client_id, "user-alice-3");
    let client = OAuthClientRepo::new(Arc::clone(&db))
        .fetch_by_client_id("user-alice-3")
        .await
        .expect("client");
    assert_eq!(client.redirect_uri, "/user/alice/oauth_callback");
}

#[tokio::test]
async fn requested_name_is_used() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let mut session = test_session(&db, user, test_settings(&db, factory, true)).await;

    session
        .spawn(SpawnOptions::named("lab"))
        .await
        .expect("spawn");

    let server = session.server().expect("server");
    assert_eq!(server.name, "lab");
    assert_eq!(server.base_url, "/user/alice/lab/");
    assert_eq!(session.spawner().options().server_name, "lab");
}

#[tokio::test]
async fn requested_name_ignored_without_named_servers() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("alice").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let mut session = test_session(&db, user, test_settings(&db, factory, false)).await;
    assert!(!session.allow_named_servers());

    let mut options = SpawnOptions::named("lab");
    options
        .user_options
        .insert("profile".into(), serde_json::json!("small"));
    session.spawn(options).await.expect("spawn");

    let server = session.server().expect("server");
    assert_eq!(server.name, "");
    assert_eq!(server.base_url, "/user/alice/");
    assert_eq!(session.spawner().options().oauth_client_id, "user-alice");
    assert_eq!(
        session.spawner().options().user_options.get("profile"),
        Some(&serde_json::json!("small"))
    );
}

#[tokio::test]
async fn names_are_escaped_in_urls() {
    let (addr, _backend) = spawn_backend(Vec::new(), None).await;
    let (db, user) = test_db_with_user("a b@example.org").await;
    let factory = MockFactory::new(&db, StartBehavior::Address(addr));
    let mut session = test_session(&db, user, test_settings(&db, factory, false)).await;

    assert_eq!(session.escaped_name(), "a%20b@example.org");
    assert_eq!(session.base_url(), "/user/a%20b@example.org/");

    session.spawn(SpawnOptions::default()).await.expect("spawn");
    assert_eq!(
        session.spawner().options().oauth_client_id,
        "user-a%20b@example.org"
    );
}
