//! Agent-facing WebSocket server.
//!
//! Agents open one connection each, introduce themselves with a `hello`
//! frame and then stream telemetry. The collector pushes commands down the
//! same connection.

mod downstream;
mod protocol;
mod registry;
mod server;

pub use downstream::DownstreamService;
pub use protocol::{AgentFrame, ServerFrame};
pub use registry::{AgentSession, CloseReason, CommandReply, SessionRegistry, SessionState};
pub use server::{AgentCommunicationServer, HANDSHAKE_TIMEOUT};
