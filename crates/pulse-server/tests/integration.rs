//! End-to-end tests against a real listener using a WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use pulse_core::constants::{HANDSHAKE_ACK, SERVER_PING_PAYLOAD, reply_for};
use pulse_server::config::ServerConfig;
use pulse_server::server::PulseServer;
use pulse_settings::WebsocketSettings;
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: SocketAddr,
    server: Arc<PulseServer>,
}

impl TestServer {
    fn ws_url(&self, username: &str) -> String {
        format!("ws://{}/ws?username={username}", self.addr)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn boot_server() -> TestServer {
    boot_server_with(WebsocketSettings::default()).await
}

async fn boot_server_with(websocket: WebsocketSettings) -> TestServer {
    let config = ServerConfig {
        websocket,
        ..ServerConfig::default()
    };
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let server = Arc::new(PulseServer::new(config, metrics_handle));
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer { addr, server }
}

/// Connect and consume the handshake acknowledgment.
async fn connect(server: &TestServer, username: &str) -> WsStream {
    let (mut ws, _) = connect_async(server.ws_url(username)).await.unwrap();
    assert_eq!(next_text(&mut ws).await, HANDSHAKE_ACK);
    ws
}

/// Next text frame, skipping control frames.
async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn get_json(server: &TestServer, path: &str) -> Value {
    reqwest::get(server.http_url(path))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Poll `/health` until the connection count equals `expected`.
async fn wait_for_connections(server: &TestServer, expected: u64) {
    timeout(TIMEOUT, async {
        loop {
            let health = get_json(server, "/health").await;
            if health["connections"].as_u64() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection count never reached expected value");
}

#[tokio::test]
async fn e2e_handshake_acknowledged() {
    let server = boot_server().await;
    let (mut ws, _) = connect_async(server.ws_url("alice")).await.unwrap();

    assert_eq!(next_text(&mut ws).await, HANDSHAKE_ACK);

    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_message_gets_templated_reply() {
    let server = boot_server().await;
    let mut ws = connect(&server, "alice").await;

    ws.send(Message::text("hi")).await.unwrap();

    assert_eq!(next_text(&mut ws).await, reply_for("hi"));
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_targeted_send_reaches_both_connections_of_identity() {
    let server = boot_server().await;
    let mut bob1 = connect(&server, "bob").await;
    let mut bob2 = connect(&server, "bob").await;
    let mut alice = connect(&server, "alice").await;
    wait_for_connections(&server, 3).await;

    let resp = get_json(&server, "/send?client=bob").await;
    assert_eq!(resp["message"], "ok");

    assert_eq!(next_text(&mut bob1).await, "hello, client");
    assert_eq!(next_text(&mut bob2).await, "hello, client");

    // Alice got nothing: her next text frame is the reply to her own message.
    alice.send(Message::text("ping?")).await.unwrap();
    assert_eq!(next_text(&mut alice).await, reply_for("ping?"));

    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_send_to_absent_identity_reports_no_client() {
    let server = boot_server().await;
    let resp = get_json(&server, "/send?client=ghost").await;
    assert_eq!(resp["message"], "no client");
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_ping_route_broadcasts_time() {
    let server = boot_server().await;
    let mut a = connect(&server, "alice").await;
    let mut b = connect(&server, "bob").await;
    wait_for_connections(&server, 2).await;

    let resp = get_json(&server, "/ping").await;
    assert_eq!(resp["message"], "ok");

    for ws in [&mut a, &mut b] {
        let text = next_text(ws).await;
        assert!(text.starts_with("hello, time: "), "unexpected broadcast {text}");
    }
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_ping_route_with_no_connections() {
    let server = boot_server().await;
    let resp = get_json(&server, "/ping").await;
    assert_eq!(resp["message"], "ok");
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_disconnect_unregisters() {
    let server = boot_server().await;
    let mut ws = connect(&server, "alice").await;
    wait_for_connections(&server, 1).await;

    ws.close(None).await.unwrap();

    wait_for_connections(&server, 0).await;
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_oversized_message_drops_connection() {
    let server = boot_server_with(WebsocketSettings {
        max_message_size: 1024,
        ..WebsocketSettings::default()
    })
    .await;
    let mut ws = connect(&server, "alice").await;
    wait_for_connections(&server, 1).await;

    let _ = ws.send(Message::text("x".repeat(4096))).await;

    wait_for_connections(&server, 0).await;
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_server_pings_on_period() {
    let server = boot_server_with(WebsocketSettings {
        ping_period_secs: 1,
        ..WebsocketSettings::default()
    })
    .await;
    let mut ws = connect(&server, "alice").await;

    let payload = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(payload))) => return payload,
                Some(Ok(_)) => {}
                other => panic!("stream ended before ping: {other:?}"),
            }
        }
    })
    .await
    .expect("no ping within timeout");

    assert_eq!(&payload[..], SERVER_PING_PAYLOAD.as_bytes());
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_plain_get_on_ws_is_rejected() {
    let server = boot_server().await;
    let resp = reqwest::get(server.http_url("/ws?username=alice"))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_metrics_endpoint() {
    let server = boot_server().await;
    let resp = reqwest::get(server.http_url("/metrics")).await.unwrap();
    assert!(resp.status().is_success());
    server.server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_graceful_shutdown_closes_clients() {
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let server = PulseServer::new(ServerConfig::default(), metrics_handle);
    let (addr, task) = server.listen().await.unwrap();
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?username=alice"))
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await, HANDSHAKE_ACK);

    server.stop(task).await;

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "client was not closed on shutdown");
    assert_eq!(server.registry().connection_count().await.unwrap(), 0);
}
