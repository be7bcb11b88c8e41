//! Controller client scenarios against a real relay server and simulated
//! tab agents.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use tabrelay_client::{Controller, POLICY_PROBE_CODE};
use tabrelay_core::{ClientConfig, ConfigTemplates, Error, ServerConfig};
use tabrelay_server::RelayServer;

async fn spawn_relay() -> SocketAddr {
    let server = Arc::new(RelayServer::new(
        &ServerConfig::default(),
        Arc::new(ConfigTemplates::default()),
    ));
    let app = server.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        server_url: format!("http://{}", addr),
        expected_agent_version: "0.1.0".to_string(),
    }
}

/// Connects a tab that reports metadata and answers pushed `execute`
/// payloads via `respond`; returning `None` leaves the request pending.
async fn spawn_tab<F>(addr: SocketAddr, info: Value, respond: F)
where
    F: Fn(&str) -> Option<Value> + Send + 'static,
{
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    tx.send(Message::Text(info.to_string())).await.unwrap();
    tokio::spawn(async move {
        while let Some(Ok(Message::Text(text))) = rx.next().await {
            let msg: Value = serde_json::from_str(&text).unwrap();
            if msg["type"] != json!("execute") {
                continue;
            }
            let code = msg["code"].as_str().unwrap();
            if let Some(result) = respond(code) {
                let reply = json!({
                    "type": "result",
                    "request_id": msg["request_id"],
                    "ok": true,
                    "result": result,
                    "url": "https://x.test",
                    "title": "X",
                });
                if tx.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
        }
    });
}

#[tokio::test]
async fn test_server_not_running_is_a_distinct_error() {
    let cfg = ClientConfig {
        server_url: "http://127.0.0.1:9".to_string(),
        expected_agent_version: "0.1.0".to_string(),
    };
    let mut controller = Controller::new(&cfg).unwrap();
    let err = controller
        .execute("1+1", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServerUnreachable(_)));
    assert!(err.to_string().contains("tabrelay serve"));
}

#[tokio::test]
async fn test_no_browser_fails_well_under_timeout() {
    let addr = spawn_relay().await;
    let mut controller = Controller::new(&client_config(addr)).unwrap();
    let started = Instant::now();
    let err = controller
        .execute("1+1", Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoBrowser(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_execute_round_trip() {
    let addr = spawn_relay().await;
    spawn_tab(
        addr,
        json!({"type": "browser_info", "browserName": "Chrome", "version": "9.9.9", "kind": "userscript"}),
        |code| (code == "2+2").then(|| json!(4)),
    )
    .await;

    let mut controller = Controller::new(&client_config(addr)).unwrap();
    // version 9.9.9 vs expected 0.1.0 is a warning, never a failure
    let outcome = controller
        .execute("2+2", Duration::from_secs(10))
        .await
        .unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.result, Some(json!(4)));
    assert_eq!(outcome.url.as_deref(), Some("https://x.test"));
}

#[tokio::test]
async fn test_policy_block_diagnosed_not_conflated_with_no_tab() {
    let addr = spawn_relay().await;
    // tab answers only the probe: the page payload is CSP-stalled
    spawn_tab(
        addr,
        json!({"type": "browser_info", "browserName": "Chrome", "version": "0.1.0", "kind": "extension"}),
        |code| (code == POLICY_PROBE_CODE).then(|| json!(true)),
    )
    .await;

    let mut controller = Controller::new(&client_config(addr)).unwrap();
    let err = controller
        .execute("document.title", Duration::from_secs(15))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PolicyBlocked(_)));
    assert!(err.to_string().contains("security policy"));
}

#[tokio::test]
async fn test_timeout_carries_guidance() {
    let addr = spawn_relay().await;
    // tab never answers anything, and the probe flag is not set
    spawn_tab(
        addr,
        json!({"type": "browser_info", "browserName": "Chrome", "version": "0.1.0", "kind": "extension"}),
        |code| (code == POLICY_PROBE_CODE).then(|| json!(false)),
    )
    .await;

    let mut controller = Controller::new(&client_config(addr)).unwrap();
    let err = controller
        .execute("while(true){}", Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.to_string().contains("timeout"));
}

#[tokio::test]
async fn test_notifications_and_reinit_surface() {
    let addr = spawn_relay().await;
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    tx.send(Message::Text(
        json!({"type": "refocus_notification", "success": true, "message": "focus restored"})
            .to_string(),
    ))
    .await
    .unwrap();

    let controller = Controller::new(&client_config(addr)).unwrap();
    // wait until the relay has processed the push
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut drained = Vec::new();
    while Instant::now() < deadline {
        drained = controller.notifications().await.unwrap();
        if !drained.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].message, "focus restored");
    assert!(controller.notifications().await.unwrap().is_empty());

    let request_id = controller
        .reinit(&json!({"channel": "main"}))
        .await
        .unwrap();
    let pushed = tokio::time::timeout(Duration::from_secs(2), rx.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match pushed {
        Message::Text(text) => {
            let msg: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(msg["type"], json!("execute"));
            assert_eq!(msg["request_id"].as_str().unwrap(), request_id);
        }
        other => panic!("unexpected push: {:?}", other),
    }
}
