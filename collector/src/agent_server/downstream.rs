use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collector_core::{AgentCommand, AgentId, DownstreamPush};
use errors::SessionError;
use uuid::Uuid;

use super::protocol::ServerFrame;
use super::registry::{AgentSession, SessionRegistry};

/// Command delivery to live agent sessions.
pub struct DownstreamService {
    registry: Arc<SessionRegistry>,
}

impl DownstreamService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    fn live_session(&self, agent_id: &AgentId) -> Result<Arc<AgentSession>, SessionError> {
        self.registry
            .get(agent_id)
            .ok_or_else(|| SessionError::NotConnected {
                agent_id: agent_id.to_string(),
            })
    }
}

#[async_trait]
impl DownstreamPush for DownstreamService {
    async fn push_to(&self, agent_id: &AgentId, command: AgentCommand) -> Result<(), SessionError> {
        let session = self.live_session(agent_id)?;
        session
            .send(ServerFrame::Command {
                request_id: Uuid::new_v4(),
                command,
            })?;
        tracing::debug!(agent_id = %agent_id, "Command pushed to agent");
        Ok(())
    }

    async fn request(
        &self,
        agent_id: &AgentId,
        command: AgentCommand,
        timeout: Duration,
    ) -> Result<serde_json::Value, SessionError> {
        let session = self.live_session(agent_id)?;
        let request_id = Uuid::new_v4();
        let reply = session.expect_reply(request_id);

        if let Err(e) = session
            .send(ServerFrame::Command {
                request_id,
                command,
            })
        {
            session.forget_reply(request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(SessionError::Protocol {
                reason: format!("agent {agent_id} failed the command: {message}"),
            }),
            // The session closed before the agent answered.
            Ok(Err(_)) => Err(SessionError::NotConnected {
                agent_id: agent_id.to_string(),
            }),
            Err(_) => {
                session.forget_reply(request_id);
                Err(SessionError::Timeout {
                    agent_id: agent_id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.registry.is_connected(agent_id)
    }
}
