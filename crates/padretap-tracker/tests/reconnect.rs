//! Supervisor behaviour across upstream drops.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use padretap_core::Config;
use padretap_tracker::TrackerClient;

#[tokio::test]
async fn reconnects_with_refreshed_token() {
    let tokens = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
        .mount(&tokens)
        .await;

    let relay_port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };

    // Each accepted session reports its auth frame; the first is dropped
    // right away to force a reconnect.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        let mut sessions = 0;
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            sessions += 1;
            if let Some(Ok(Message::Binary(bytes))) = ws.next().await {
                let auth: Value = rmp_serde::from_slice(&bytes).unwrap();
                let _ = auth_tx.send(auth);
            }
            if sessions == 1 {
                let _ = ws.close(None).await;
            } else {
                tokio::spawn(async move { while ws.next().await.is_some() {} });
            }
        }
    });

    let mut config = Config::default();
    config.upstream.url = format!("ws://{upstream_addr}/_multiplex");
    config.upstream.token_url = format!("{}/v1/token", tokens.uri());
    config.credentials.access_token = Some("stale".into());
    config.credentials.refresh_token = Some("r1".into());
    config.credentials.uid = "u1".into();
    config.session.subscribe_settle_ms = 0;
    config.session.reconnect_delay_secs = 0;
    config.relay.host = "127.0.0.1".into();
    config.relay.port = relay_port;

    let mut client = TrackerClient::new(config).unwrap();
    client.bootstrap().await.unwrap();
    assert_eq!(client.access_token(), Some("stale"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { client.run(shutdown_rx).await });

    let first = tokio::time::timeout(Duration::from_secs(5), auth_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), auth_rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first[1], json!("stale"));
    assert_eq!(second[1], json!("fresh"));
    assert_ne!(first[2], second[2], "each session gets a new session id");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn failed_refresh_reconnects_with_stale_token() {
    let tokens = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("unavailable"))
        .mount(&tokens)
        .await;

    let relay_port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };

    // Every session is dropped after its auth frame.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            if let Some(Ok(Message::Binary(bytes))) = ws.next().await {
                let auth: Value = rmp_serde::from_slice(&bytes).unwrap();
                let _ = auth_tx.send(auth);
            }
            let _ = ws.close(None).await;
        }
    });

    let mut config = Config::default();
    config.upstream.url = format!("ws://{upstream_addr}/_multiplex");
    config.upstream.token_url = format!("{}/v1/token", tokens.uri());
    config.credentials.access_token = Some("stale".into());
    config.credentials.refresh_token = Some("r1".into());
    config.credentials.uid = "u1".into();
    config.session.subscribe_settle_ms = 0;
    config.session.reconnect_delay_secs = 0;
    config.relay.host = "127.0.0.1".into();
    config.relay.port = relay_port;

    let mut client = TrackerClient::new(config).unwrap();
    client.bootstrap().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { client.run(shutdown_rx).await });

    for _ in 0..3 {
        let auth = tokio::time::timeout(Duration::from_secs(5), auth_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(auth[1], json!("stale"));
    }
    assert!(!tokens.received_requests().await.unwrap().is_empty());

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
