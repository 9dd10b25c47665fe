use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use collector_core::{AgentId, Clock, TelemetryKind, TelemetrySink};
use errors::{SessionError, StorageError};
use futures_util::{Sink, SinkExt, StreamExt};
use storage::ConfigRepository;
use storage::dao::AgentDao;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::downstream::DownstreamService;
use super::protocol::{AgentFrame, ServerFrame};
use super::registry::{AgentSession, CloseReason, SessionRegistry};
use crate::error::{CollectorError, Result};
use crate::telemetry::CollectorTelemetry;

/// The first frame must arrive within this bound.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum ConnectionError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Everything a connection task needs, shared by all of them.
struct ConnectionContext {
    registry: Arc<SessionRegistry>,
    agent_dao: AgentDao,
    config_repository: Arc<ConfigRepository>,
    sinks: HashMap<TelemetryKind, Arc<dyn TelemetrySink>>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    telemetry: CollectorTelemetry,
}

/// WebSocket endpoint agents connect to.
pub struct AgentCommunicationServer {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl AgentCommunicationServer {
    /// Binds `bind_address` and starts accepting agent connections.
    /// Telemetry is routed to the sink registered for its kind.
    pub async fn start(
        bind_address: SocketAddr,
        agent_dao: AgentDao,
        config_repository: Arc<ConfigRepository>,
        sinks: Vec<Arc<dyn TelemetrySink>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .await
            .map_err(|e| CollectorError::Bind {
                address: bind_address.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| CollectorError::Bind {
            address: bind_address.to_string(),
            reason: e.to_string(),
        })?;

        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let context = Arc::new(ConnectionContext {
            registry: Arc::clone(&registry),
            agent_dao,
            config_repository,
            sinks: sinks.into_iter().map(|sink| (sink.kind(), sink)).collect(),
            clock,
            shutdown: shutdown.clone(),
            telemetry: CollectorTelemetry,
        });

        tracker.spawn(accept_loop(listener, context, tracker.clone()));
        tracing::info!(address = %local_addr, "Agent server listening");

        Ok(Self {
            local_addr,
            registry,
            shutdown,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn downstream(&self) -> Arc<DownstreamService> {
        Arc::new(DownstreamService::new(Arc::clone(&self.registry)))
    }

    pub fn connected_agents(&self) -> Vec<AgentId> {
        self.registry.agent_ids()
    }

    /// Stops accepting, closes every session and waits up to
    /// `drain_timeout` for connection tasks to finish.
    pub async fn close(&self, drain_timeout: Duration) -> Result<()> {
        self.shutdown.cancel();
        let closed = self.registry.close_all(CloseReason::ServerShutdown);
        self.tracker.close();

        tracing::info!(sessions = closed, "Agent server closing");
        tokio::time::timeout(drain_timeout, self.tracker.wait())
            .await
            .map_err(|_| CollectorError::DrainTimeout {
                resource: "agent server".to_string(),
                timeout_ms: u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }
}

async fn accept_loop(listener: TcpListener, context: Arc<ConnectionContext>, tracker: TaskTracker) {
    loop {
        tokio::select! {
            () = context.shutdown.cancelled() => break,
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let context = Arc::clone(&context);
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(&context, stream, peer_addr).await {
                                tracing::warn!(peer = %peer_addr, error = %e, "Agent connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept error");
                    }
                }
            }
        }
    }
    tracing::debug!("Agent server stopped accepting");
}

async fn send_frame<S>(sink: &mut S, frame: &ServerFrame) -> ConnectionResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn handle_connection(
    context: &ConnectionContext,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> ConnectionResult<()> {
    let handshake = async {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_receiver.next())
            .await
            .map_err(|_| SessionError::Handshake {
                reason: "no hello within the handshake timeout".to_string(),
            })?
            .ok_or_else(|| SessionError::Handshake {
                reason: "connection closed before hello".to_string(),
            })??;

        let frame = match first {
            Message::Text(text) => serde_json::from_str::<AgentFrame>(&text).ok(),
            _ => None,
        };
        let hello = match frame {
            Some(AgentFrame::Hello {
                agent_id,
                environment,
            }) => AgentId::new(agent_id).map(|id| (id, environment)),
            _ => None,
        };
        let Some((agent_id, environment)) = hello else {
            let reason = "first frame must be a hello with a valid agent id".to_string();
            send_frame(
                &mut ws_sender,
                &ServerFrame::Error {
                    message: reason.clone(),
                },
            )
            .await?;
            return Err(SessionError::Handshake { reason }.into());
        };

        Ok::<_, ConnectionError>((ws_sender, ws_receiver, agent_id, environment))
    };

    let (mut ws_sender, mut ws_receiver, agent_id, environment) = tokio::select! {
        () = context.shutdown.cancelled() => return Ok(()),
        result = handshake => result?,
    };

    let now = context.clock.now_millis();
    context
        .agent_dao
        .store_environment(&agent_id, &environment, now)
        .await?;
    let transaction_config = context.config_repository.transaction_config(&agent_id).await?;

    let (session, mut outbound_rx) = AgentSession::new(agent_id.clone(), now);
    context.registry.register(Arc::clone(&session));
    if context.shutdown.is_cancelled() {
        session.close(CloseReason::ServerShutdown);
    }

    tracing::info!(
        agent_id = %agent_id,
        session_id = %session.session_id(),
        peer = %peer_addr,
        "Agent connected"
    );

    let result: ConnectionResult<Option<CloseReason>> = async {
        send_frame(
            &mut ws_sender,
            &ServerFrame::HelloAck {
                session_id: session.session_id(),
                transaction_config,
            },
        )
        .await?;

        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => return Ok(None),
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<AgentFrame>(&text) {
                                Ok(frame) => {
                                    if let Some(reply) = handle_frame(context, &session, frame).await {
                                        send_frame(&mut ws_sender, &reply).await?;
                                    }
                                }
                                Err(e) => {
                                    send_frame(&mut ws_sender, &ServerFrame::Error {
                                        message: format!("malformed frame: {e}"),
                                    }).await?;
                                    return Ok(Some(CloseReason::ProtocolError));
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(Some(CloseReason::Disconnected));
                        }
                        Some(Err(e)) => {
                            tracing::warn!(agent_id = %agent_id, error = %e, "WebSocket receive error");
                            return Ok(Some(CloseReason::Disconnected));
                        }
                        Some(Ok(_)) => {}
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        // Frames queued before a supersede never reach the old socket.
                        Some(_) if !session.is_active() => return Ok(None),
                        Some(frame) => send_frame(&mut ws_sender, &frame).await?,
                        None => return Ok(Some(CloseReason::Disconnected)),
                    }
                }
            }
        }
    }
    .await;

    match &result {
        Ok(Some(reason)) => {
            session.close(*reason);
            if *reason == CloseReason::ProtocolError {
                let _ = ws_sender.send(Message::Close(None)).await;
            }
        }
        Ok(None) | Err(_) => {
            session.close(CloseReason::Disconnected);
            let _ = ws_sender.send(Message::Close(None)).await;
        }
    }
    context
        .registry
        .remove_if_owner(&agent_id, session.session_id());

    tracing::info!(
        agent_id = %agent_id,
        session_id = %session.session_id(),
        state = ?session.state(),
        "Agent disconnected"
    );
    result.map(|_| ())
}

/// Handles one post-handshake frame; returns the reply to send, if any.
async fn handle_frame(
    context: &ConnectionContext,
    session: &AgentSession,
    frame: AgentFrame,
) -> Option<ServerFrame> {
    match frame {
        AgentFrame::Telemetry { message } => {
            let kind = message.kind();
            context.telemetry.record_telemetry_message(kind);

            let Some(sink) = context.sinks.get(&kind) else {
                context.telemetry.record_telemetry_rejected(kind);
                return Some(ServerFrame::Error {
                    message: format!("no sink accepts {kind} telemetry"),
                });
            };
            match sink.accept(session.agent_id(), &message).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(
                        agent_id = %session.agent_id(),
                        kind = %kind,
                        error = %e,
                        "Telemetry rejected"
                    );
                    context.telemetry.record_telemetry_rejected(kind);
                    Some(ServerFrame::Error {
                        message: e.to_string(),
                    })
                }
            }
        }
        AgentFrame::CommandResult {
            request_id,
            result,
            error,
        } => {
            let reply = match error {
                Some(message) => Err(message),
                None => Ok(result),
            };
            if !session.complete_reply(request_id, reply) {
                tracing::debug!(
                    agent_id = %session.agent_id(),
                    request_id = %request_id,
                    "Result for unknown or abandoned request"
                );
            }
            None
        }
        AgentFrame::Ping => Some(ServerFrame::Pong),
        AgentFrame::Hello { .. } => Some(ServerFrame::Error {
            message: "Already greeted".to_string(),
        }),
    }
}
