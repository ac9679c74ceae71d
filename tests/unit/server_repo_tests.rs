//! Unit tests for `ServerRepo`.

use std::sync::Arc;

use userhub::models::server::Server;
use userhub::models::user::NewUser;
use userhub::persistence::db;
use userhub::persistence::server_repo::ServerRepo;
use userhub::persistence::user_repo::UserRepo;
use userhub::AppError;

#[tokio::test]
async fn create_update_and_list() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let user = UserRepo::new(Arc::clone(&db))
        .create(&NewUser::named("alice"))
        .await
        .expect("user");
    let repo = ServerRepo::new(Arc::clone(&db));

    let first = repo
        .create(&Server::new(user.id, "1", "/user/alice/1/"))
        .await
        .expect("create");
    let second = repo
        .create(&Server::new(user.id, "lab", "/user/alice/lab/"))
        .await
        .expect("create");
    assert!(second.id > first.id);
    assert_eq!(first.port, 0);

    repo.update_address(first.id, "10.0.0.5", 8888)
        .await
        .expect("update");
    let stored = repo.get(first.id).await.expect("get");
    assert_eq!(stored.ip, "10.0.0.5");
    assert_eq!(stored.port, 8888);
    assert_eq!(stored.url(), "http://10.0.0.5:8888/user/alice/1/");

    let names: Vec<String> = repo
        .list_for_user(user.id)
        .await
        .expect("list")
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, ["1", "lab"]);

    assert_eq!(repo.delete_for_user(user.id).await.expect("delete"), 2);
    assert!(repo.list_for_user(user.id).await.expect("list").is_empty());
}

#[tokio::test]
async fn duplicate_server_name_rejected() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let user = UserRepo::new(Arc::clone(&db))
        .create(&NewUser::named("alice"))
        .await
        .expect("user");
    let repo = ServerRepo::new(db);

    repo.create(&Server::new(user.id, "", "/user/alice/"))
        .await
        .expect("create");
    let err = repo
        .create(&Server::new(user.id, "", "/user/alice/"))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, AppError::Db(_)));
}

#[tokio::test]
async fn missing_server_is_not_found() {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let err = ServerRepo::new(db).get(42).await.expect_err("missing");
    assert!(matches!(err, AppError::NotFound(_)));
}
