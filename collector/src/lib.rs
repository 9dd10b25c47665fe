//! # Telemetry Collector Server
//!
//! Wires the storage layer to agents and operators.
//!
//! This crate provides:
//! - The WebSocket server agents stream telemetry through
//! - Command delivery back to connected agents
//! - The HTTP UI layer for config editing, queries and maintenance
//! - The lifecycle that starts and stops all of it in order

pub mod agent_server;
pub mod error;
pub mod lifecycle;
pub mod telemetry;
pub mod ui;

pub use agent_server::{AgentCommunicationServer, DownstreamService};
pub use error::{CollectorError, ErrorResponse, Result};
pub use lifecycle::{
    LifecycleListener, LifecycleState, Resource, RunningHandles, ServerLifecycle,
    ServerLifecycleBuilder, ShutdownReport, StartupStep, TracingListener, shutdown_signal,
};
pub use telemetry::{CollectorTelemetry, init_metrics};
pub use ui::{UiServer, UiState};
