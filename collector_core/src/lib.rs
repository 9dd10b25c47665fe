//! # Telemetry Collector Core
//!
//! Shared types, traits, and utilities for the telemetry collector.
//!
//! This crate provides:
//! - Agent identity and the telemetry messages agents push
//! - Commands the collector pushes down to agents
//! - Seam traits between the agent server, the storage layer and the UI
//! - A clock abstraction so time-dependent policies stay testable

pub mod clock;
pub mod traits;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use traits::{DownstreamPush, RepoAdmin, TelemetrySink};
pub use types::{
    AgentCommand, AgentEnvironment, AgentId, GaugeValue, TelemetryKind, TelemetryMessage,
    TimeRange, Trace, TransactionAggregate,
};
