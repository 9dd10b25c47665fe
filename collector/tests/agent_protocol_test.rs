//! Agent sessions over a real WebSocket connection.

use std::time::Duration;

use collector::agent_server::{AgentFrame, ServerFrame};
use collector::{RunningHandles, ServerLifecycle};
use collector_core::{AgentCommand, AgentEnvironment, AgentId, TelemetryMessage, TimeRange, Trace};
use config::{EnvironmentSettings, StorageBackend, TransactionConfigPatch, Versioned};
use errors::SessionError;
use futures_util::{SinkExt, StreamExt};
use storage::ConfigDelivery;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn running_collector() -> (ServerLifecycle, RunningHandles) {
    let settings = EnvironmentSettings {
        storage_backend: StorageBackend::Memory,
        agent_port: testing::free_port(),
        ui_bind_address: "127.0.0.1".to_string(),
        ui_port: 0,
        drain_timeout: Duration::from_secs(2),
        ..EnvironmentSettings::default()
    };
    let lifecycle = ServerLifecycle::builder().settings(settings).build();
    lifecycle.start().await.unwrap();
    let handles = lifecycle.handles().unwrap();
    (lifecycle, handles)
}

async fn connect(handles: &RunningHandles) -> Client {
    let url = format!("ws://127.0.0.1:{}", handles.agent_address.port());
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Client, frame: &AgentFrame) {
    let json = serde_json::to_string(frame).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> ServerFrame {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).unwrap(),
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
            other => panic!("expected a frame, got {other:?}"),
        }
    }
}

async fn expect_closed(ws: &mut Client) {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, ws.next()).await {
            Ok(Some(Ok(Message::Close(_))) | None | Some(Err(_))) => return,
            Ok(Some(Ok(_))) => {}
            Err(_) => panic!("connection was not closed"),
        }
    }
}

async fn hello(ws: &mut Client, agent_id: &str) -> ServerFrame {
    send(
        ws,
        &AgentFrame::Hello {
            agent_id: agent_id.to_string(),
            environment: AgentEnvironment {
                hostname: "host-a".to_string(),
                jvm_version: "21".to_string(),
                ..AgentEnvironment::default()
            },
        },
    )
    .await;
    recv(ws).await
}

fn agent(id: &str) -> AgentId {
    AgentId::new(id).unwrap()
}

#[tokio::test]
async fn test_handshake_registers_agent() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;

    match hello(&mut ws, "web-1").await {
        ServerFrame::HelloAck {
            transaction_config, ..
        } => {
            assert_eq!(transaction_config, config::TransactionConfig::default());
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    assert!(handles.downstream.is_connected(&agent("web-1")));
    let record = handles
        .agent_dao
        .read_agent(&agent("web-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.environment.hostname, "host-a");

    send(&mut ws, &AgentFrame::Ping).await;
    assert_eq!(recv(&mut ws).await, ServerFrame::Pong);

    lifecycle.close().await;
}

#[tokio::test]
async fn test_first_frame_must_be_hello() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;

    send(&mut ws, &AgentFrame::Ping).await;

    assert!(matches!(recv(&mut ws).await, ServerFrame::Error { .. }));
    expect_closed(&mut ws).await;
    lifecycle.close().await;
}

#[tokio::test]
async fn test_telemetry_reaches_storage() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;
    hello(&mut ws, "web-1").await;

    let trace = Trace {
        id: "t-1".to_string(),
        transaction_type: "Web".to_string(),
        transaction_name: "/checkout".to_string(),
        start_time: 1_000,
        duration_millis: 250.0,
        error: false,
        headline: "GET /checkout".to_string(),
        detail: serde_json::json!({"rows": 3}),
    };
    send(
        &mut ws,
        &AgentFrame::Telemetry {
            message: TelemetryMessage::Trace(trace.clone()),
        },
    )
    .await;
    // Frames are handled in order, so the pong proves the trace was stored.
    send(&mut ws, &AgentFrame::Ping).await;
    assert_eq!(recv(&mut ws).await, ServerFrame::Pong);

    let stored = handles
        .trace_dao
        .read(&agent("web-1"), TimeRange::new(0, 2_000), 10)
        .await
        .unwrap();
    assert_eq!(stored, vec![trace]);

    lifecycle.close().await;
}

#[tokio::test]
async fn test_malformed_frame_closes_session() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;
    hello(&mut ws, "web-1").await;

    ws.send(Message::Text("{\"type\":\"bogus\"}".into()))
        .await
        .unwrap();

    assert!(matches!(recv(&mut ws).await, ServerFrame::Error { .. }));
    expect_closed(&mut ws).await;
    lifecycle.close().await;
}

#[tokio::test]
async fn test_pushed_command_reaches_agent() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;
    hello(&mut ws, "web-1").await;

    handles
        .downstream
        .push_to(&agent("web-1"), AgentCommand::ReweaveClasses)
        .await
        .unwrap();

    match recv(&mut ws).await {
        ServerFrame::Command { command, .. } => assert_eq!(command, AgentCommand::ReweaveClasses),
        other => panic!("unexpected frame: {other:?}"),
    }
    lifecycle.close().await;
}

#[tokio::test]
async fn test_request_waits_for_command_result() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;
    hello(&mut ws, "web-1").await;

    let agent_side = tokio::spawn(async move {
        let ServerFrame::Command { request_id, .. } = recv(&mut ws).await else {
            panic!("expected a command");
        };
        send(
            &mut ws,
            &AgentFrame::CommandResult {
                request_id,
                result: serde_json::json!({"threads": 42}),
                error: None,
            },
        )
        .await;
        ws
    });

    let reply = handles
        .downstream
        .request(&agent("web-1"), AgentCommand::ThreadDump, RECV_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(reply["threads"], 42);

    let _ws = agent_side.await.unwrap();
    lifecycle.close().await;
}

#[tokio::test]
async fn test_transaction_config_update_is_pushed() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;
    hello(&mut ws, "web-1").await;

    let current = handles
        .config_repository
        .transaction_config(&agent("web-1"))
        .await
        .unwrap();
    let update = handles
        .config_repository
        .update_transaction_config(
            &agent("web-1"),
            TransactionConfigPatch {
                slow_threshold_millis: Some(500),
                ..TransactionConfigPatch::default()
            },
            current.version(),
        )
        .await
        .unwrap();
    assert_eq!(update.delivery, ConfigDelivery::Delivered);

    match recv(&mut ws).await {
        ServerFrame::Command {
            command: AgentCommand::UpdateTransactionConfig { config },
            ..
        } => assert_eq!(config.slow_threshold_millis(), 500),
        other => panic!("unexpected frame: {other:?}"),
    }
    lifecycle.close().await;
}

#[tokio::test]
async fn test_new_connection_supersedes_old_one() {
    let (lifecycle, handles) = running_collector().await;
    let mut first = connect(&handles).await;
    hello(&mut first, "web-1").await;

    let mut second = connect(&handles).await;
    let ServerFrame::HelloAck { session_id, .. } = hello(&mut second, "web-1").await else {
        panic!("expected helloAck");
    };

    expect_closed(&mut first).await;

    handles
        .downstream
        .push_to(&agent("web-1"), AgentCommand::ThreadDump)
        .await
        .unwrap();
    assert!(matches!(
        recv(&mut second).await,
        ServerFrame::Command { .. }
    ));
    assert!(!session_id.is_nil());
    lifecycle.close().await;
}

#[tokio::test]
async fn test_push_to_disconnected_agent_fails() {
    let (lifecycle, handles) = running_collector().await;

    let result = handles
        .downstream
        .push_to(&agent("offline"), AgentCommand::ThreadDump)
        .await;

    assert!(matches!(result, Err(SessionError::NotConnected { .. })));
    lifecycle.close().await;
}

#[tokio::test]
async fn test_shutdown_closes_agent_connections() {
    let (lifecycle, handles) = running_collector().await;
    let mut ws = connect(&handles).await;
    hello(&mut ws, "web-1").await;

    let report = lifecycle.close().await;

    assert!(report.is_clean());
    expect_closed(&mut ws).await;
}
