//! # Storage Layer
//!
//! Cluster access and the repository graph of the telemetry collector.
//!
//! This crate provides:
//! - Cluster drivers (Redis, in-process) behind one session abstraction
//! - A shared session handle with a bounded shutdown drain
//! - DAOs for agents, configs, aggregates, traces and gauges
//! - The config repository and rollup level selection

pub mod cluster;
pub mod config_repository;
pub mod dao;
pub mod memory_cluster;
pub mod redis_cluster;
pub mod repo_admin;
pub mod rollup;
pub mod session;

#[cfg(test)]
mod test_support;

pub use cluster::{
    Cluster, ClusterConnection, ClusterDriver, ClusterSession, ClusterSettings, ReplicationPolicy,
};
pub use config_repository::{
    ConfigDelivery, ConfigRepository, ConfigUpdateError, ROLLUP_INTERVALS, TransactionConfigUpdate,
};
pub use memory_cluster::MemoryClusterDriver;
pub use redis_cluster::RedisClusterDriver;
pub use repo_admin::{ExpirationRepoAdmin, NopRepoAdmin};
pub use rollup::{RollupLevel, RollupLevelService, select_rollup_level};
pub use session::{DrainGate, SessionHandle};
