//! Live agent sessions, at most one per agent id.

use std::sync::Arc;

use collector_core::AgentId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use errors::SessionError;
use parking_lot::Mutex;
use strum::Display;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::protocol::ServerFrame;
use crate::telemetry::CollectorTelemetry;

const OUTBOUND_CAPACITY: usize = 256;

/// Outcome of a request, as reported by the agent.
pub type CommandReply = Result<serde_json::Value, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CloseReason {
    Superseded,
    Disconnected,
    ProtocolError,
    ServerShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed(CloseReason),
}

/// One agent connection as seen by the rest of the server.
///
/// The connection task owns the socket; everyone else talks to the agent
/// through the outbound channel held here.
pub struct AgentSession {
    agent_id: AgentId,
    session_id: Uuid,
    connected_at: i64,
    outbound: mpsc::Sender<ServerFrame>,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    pending: DashMap<Uuid, oneshot::Sender<CommandReply>>,
}

impl AgentSession {
    pub fn new(agent_id: AgentId, connected_at: i64) -> (Arc<Self>, mpsc::Receiver<ServerFrame>) {
        let (outbound, receiver) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(Self {
            agent_id,
            session_id: Uuid::new_v4(),
            connected_at,
            outbound,
            state: Mutex::new(SessionState::Active),
            cancel: CancellationToken::new(),
            pending: DashMap::new(),
        });
        (session, receiver)
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Marks the session closed and wakes its connection task. Pending
    /// requests are dropped, which their waiters observe as a disconnect.
    /// Returns false if the session was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Active {
                return false;
            }
            *state = SessionState::Closed(reason);
        }
        self.cancel.cancel();
        self.pending.clear();
        tracing::debug!(
            agent_id = %self.agent_id,
            session_id = %self.session_id,
            reason = %reason,
            "Agent session closed"
        );
        true
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Enqueues `frame` for the connection task without waiting.
    ///
    /// The state check and the enqueue happen under the state lock, so a
    /// frame is never queued after the session was closed. A full outbound
    /// channel fails the send instead of blocking the caller.
    pub fn send(&self, frame: ServerFrame) -> Result<(), SessionError> {
        let state = self.state.lock();
        match *state {
            SessionState::Active => {}
            SessionState::Closed(CloseReason::Superseded) => {
                return Err(SessionError::Superseded {
                    agent_id: self.agent_id.to_string(),
                });
            }
            SessionState::Closed(_) => {
                return Err(SessionError::NotConnected {
                    agent_id: self.agent_id.to_string(),
                });
            }
        }
        self.outbound
            .try_send(frame)
            .map_err(|e| SessionError::SendFailed {
                agent_id: self.agent_id.to_string(),
                reason: match e {
                    mpsc::error::TrySendError::Full(_) => "outbound queue is full".to_string(),
                    mpsc::error::TrySendError::Closed(_) => "connection task has exited".to_string(),
                },
            })
    }

    /// Registers a waiter for the agent's answer to `request_id`.
    pub fn expect_reply(&self, request_id: Uuid) -> oneshot::Receiver<CommandReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);
        rx
    }

    pub fn forget_reply(&self, request_id: Uuid) {
        self.pending.remove(&request_id);
    }

    /// Hands the agent's answer to its waiter. Returns false for unknown or
    /// abandoned request ids.
    pub fn complete_reply(&self, request_id: Uuid, reply: CommandReply) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, waiter)) => waiter.send(reply).is_ok(),
            None => false,
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<AgentId, Arc<AgentSession>>,
    telemetry: CollectorTelemetry,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `session` as the agent's live session. A prior session for
    /// the same agent is closed while the entry is still locked, so no
    /// lookup can observe both as active.
    pub fn register(&self, session: Arc<AgentSession>) -> Option<Arc<AgentSession>> {
        let superseded = match self.sessions.entry(session.agent_id().clone()) {
            Entry::Occupied(mut entry) => {
                let prior = Arc::clone(entry.get());
                prior.close(CloseReason::Superseded);
                entry.insert(session);
                Some(prior)
            }
            Entry::Vacant(entry) => {
                entry.insert(session);
                None
            }
        };

        if let Some(prior) = &superseded {
            tracing::info!(
                agent_id = %prior.agent_id(),
                session_id = %prior.session_id(),
                "Agent session superseded by a newer connection"
            );
            self.telemetry.record_session_superseded();
        }
        self.telemetry.record_active_sessions(self.sessions.len());
        superseded
    }

    /// Removes the agent's entry only if it still belongs to `session_id`.
    pub fn remove_if_owner(&self, agent_id: &AgentId, session_id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(agent_id, |_, session| session.session_id() == session_id)
            .is_some();
        if removed {
            self.telemetry.record_active_sessions(self.sessions.len());
        }
        removed
    }

    /// The agent's session, if it is connected.
    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<AgentSession>> {
        self.sessions
            .get(agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| session.is_active())
    }

    pub fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.get(agent_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn close_all(&self, reason: CloseReason) -> usize {
        let sessions: Vec<Arc<AgentSession>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        self.sessions.clear();
        let closed = sessions.iter().filter(|s| s.close(reason)).count();
        self.telemetry.record_active_sessions(0);
        closed
    }
}
