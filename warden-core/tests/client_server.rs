//! End-to-end: ExecutionClient against a live execution server.
//!
//! Exercises the error split the runtime contract depends on: transport
//! failures are `Err`, actions that fail inside the sandbox are `Ok` with
//! an error observation.

use tempfile::TempDir;

use warden_core::config::RuntimeConfig;
use warden_core::events::Action;
use warden_core::server::{router, ExecutionClient, ServerState};

async fn spawn_server(dir: &TempDir, api_key: Option<&str>) -> (ServerState, String) {
    let mut config = RuntimeConfig::local(dir.path());
    config.shell = String::from("/bin/bash");
    let state = ServerState::new(&config, api_key.map(String::from));
    state.start().await.expect("server start");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (state, format!("http://{addr}"))
}

#[tokio::test]
async fn actions_execute_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let (state, base_url) = spawn_server(&dir, Some("shh")).await;
    let client = ExecutionClient::new(base_url.as_str(), Some("shh".into())).unwrap();

    let health = client.health().await.expect("health");
    assert_eq!(health["status"], "healthy");

    let written = client
        .execute_action(&Action::write("remote.txt", "over the wire"))
        .await
        .expect("transport ok");
    assert!(written.success(), "{written:?}");

    let read = client
        .execute_action(&Action::read("remote.txt"))
        .await
        .expect("transport ok");
    assert_eq!(read.content(), "over the wire");

    state.shutdown();
}

#[tokio::test]
async fn clean_action_failure_is_ok_with_error_observation() {
    let dir = TempDir::new().unwrap();
    let (state, base_url) = spawn_server(&dir, None).await;
    let client = ExecutionClient::new(base_url.as_str(), None).unwrap();

    let observation = client
        .execute_action(&Action::read("nope.txt"))
        .await
        .expect("a handled failure is not a transport error");
    assert!(!observation.success());

    state.shutdown();
}

#[tokio::test]
async fn transport_failures_are_errors() {
    // Nothing is listening here.
    let client = ExecutionClient::new("http://127.0.0.1:9", None).unwrap();
    let result = client.execute_action(&Action::read("x")).await;
    assert!(result.is_err());

    // Bad auth is also a transport-level failure, not an observation.
    let dir = TempDir::new().unwrap();
    let (state, base_url) = spawn_server(&dir, Some("right")).await;
    let client = ExecutionClient::new(base_url.as_str(), Some("wrong".into())).unwrap();
    let result = client.execute_action(&Action::read("x")).await;
    assert!(result.is_err());

    state.shutdown();
}
