//! Unit tests for `LocalProcessSpawner` against real child processes.

#![cfg(unix)]

use std::time::Duration;

use serde_json::json;

use userhub::config::SpawnerConfig;
use userhub::models::server::Server;
use userhub::spawner::{HubInfo, LocalProcessSpawner, PollStatus, Spawner, SpawnerBinding};

/// A "server" that ignores its arguments and sleeps until signalled.
fn sleeper_config() -> SpawnerConfig {
    SpawnerConfig {
        cmd: vec![
            "sh".into(),
            "-c".into(),
            "exec sleep 30".into(),
            "sh".into(),
        ],
        interrupt_timeout_seconds: 2,
        term_timeout_seconds: 2,
        kill_timeout_seconds: 2,
        poll_interval_seconds: 0,
        ..SpawnerConfig::default()
    }
}

fn configured(config: SpawnerConfig) -> LocalProcessSpawner {
    let mut spawner = LocalProcessSpawner::new(config.clone());
    spawner.configure(&SpawnerBinding {
        user_id: 1,
        user_name: "alice".into(),
        hub: HubInfo {
            api_url: "http://127.0.0.1:8081/hub/api".into(),
            prefix: "/hub/".into(),
        },
        authenticator: None,
        config,
    });
    spawner.options_mut().server = Some(Server::new(1, "", "/user/alice/"));
    spawner.options_mut().api_token = "token".into();
    spawner
}

#[tokio::test]
async fn start_poll_and_stop_child() {
    let mut spawner = configured(sleeper_config());

    let (ip, port) = spawner.start().await.expect("start").expect("address");
    assert_eq!(ip, "127.0.0.1");
    assert!(port > 0);
    assert!(spawner.pid() > 0);
    assert_eq!(spawner.get_state(), json!({ "pid": spawner.pid() }));
    assert_eq!(spawner.poll().await.expect("poll"), PollStatus::Running);

    spawner.stop(false).await.expect("stop");
    assert!(matches!(
        spawner.poll().await.expect("poll"),
        PollStatus::Exited(_)
    ));
    assert_eq!(spawner.pid(), 0);

    // stopping again is harmless
    spawner.stop(true).await.expect("second stop");
}

#[tokio::test]
async fn stop_now_skips_interrupt() {
    let mut config = sleeper_config();
    // a child that ignores SIGINT still dies on SIGTERM
    config.cmd = vec![
        "sh".into(),
        "-c".into(),
        "trap '' INT; sleep 30 & wait".into(),
        "sh".into(),
    ];
    config.interrupt_timeout_seconds = 30;
    let mut spawner = configured(config);
    spawner.start().await.expect("start");

    let started = std::time::Instant::now();
    spawner.stop(true).await.expect("stop");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        spawner.poll().await.expect("poll"),
        PollStatus::Exited(_)
    ));
}

#[tokio::test]
async fn resumed_pid_is_polled_by_signal() {
    let mut external = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn sleep");

    let mut spawner = configured(sleeper_config());
    spawner.load_state(&json!({ "pid": external.id() }));
    assert_eq!(spawner.poll().await.expect("poll"), PollStatus::Running);

    external.kill().expect("kill");
    external.wait().expect("reap");
    assert_eq!(spawner.poll().await.expect("poll"), PollStatus::Exited(0));
    assert_eq!(spawner.get_state(), json!({}));
}

#[tokio::test]
async fn missing_command_is_backend_error() {
    let mut config = sleeper_config();
    config.cmd = vec!["/nonexistent/userhub-singleuser".into()];
    let mut spawner = configured(config);

    let err = spawner.start().await.expect_err("spawn fails");
    assert!(matches!(err, userhub::AppError::Backend(_)));
    assert_eq!(spawner.pid(), 0);
}

/// Mutates process-global env vars; runs serially.
#[tokio::test]
#[serial_test::serial]
async fn env_keeps_only_whitelisted_variables() {
    std::env::set_var("USERHUB_TEST_KEEP", "kept");
    std::env::set_var("USERHUB_TEST_DROP", "dropped");

    let mut config = sleeper_config();
    config.env_keep = vec!["USERHUB_TEST_KEEP".into(), "USERHUB_TEST_UNSET".into()];
    let spawner = configured(config);
    let env = spawner.get_env();

    std::env::remove_var("USERHUB_TEST_KEEP");
    std::env::remove_var("USERHUB_TEST_DROP");

    assert_eq!(env.get("USERHUB_TEST_KEEP").map(String::as_str), Some("kept"));
    assert!(!env.contains_key("USERHUB_TEST_DROP"));
    assert!(!env.contains_key("USERHUB_TEST_UNSET"));
    assert_eq!(env.get("HUB_API_TOKEN").map(String::as_str), Some("token"));
    assert_eq!(env.get("USER").map(String::as_str), Some("alice"));
}

#[tokio::test]
async fn monitor_reports_exit_code() {
    let mut config = sleeper_config();
    config.cmd = vec!["sh".into(), "-c".into(), "exit 3".into(), "sh".into()];
    let mut spawner = configured(config);
    spawner.options_mut().poll_interval = Duration::from_millis(50);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    let on_exit: userhub::spawner::ExitCallback = std::sync::Arc::new(move |code| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    });
    spawner.add_exit_callback(on_exit);

    spawner.start().await.expect("start");
    spawner.start_polling();

    let code = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("exit observed")
        .expect("callback fired");
    assert_eq!(code, 3);
    assert_eq!(spawner.pid(), 0);
    spawner.stop_polling();
}
