//! # Configuration System
//!
//! Configuration values for the telemetry collector.
//!
//! This crate provides:
//! - Immutable, content-versioned operational settings (`StorageConfig`,
//!   `TransactionConfig`, `AlertConfig`) updated through overlays
//! - Static environment settings resolved from a properties file
//! - Validation through the `validator` crate

pub mod alert_config;
pub mod properties;
pub mod settings;
pub mod storage_config;
pub mod transaction_config;
pub mod versioned;

pub use alert_config::{AlertConfig, AlertConfigData};
pub use properties::parse_properties;
pub use settings::{DEFAULT_SETTINGS_FILE, EnvironmentSettings, RepoAdminMode, StorageBackend};
pub use storage_config::{
    ROLLUP_LEVEL_COUNT, StorageConfig, StorageConfigOverlay, StorageConfigPatch,
};
pub use transaction_config::{
    TransactionConfig, TransactionConfigOverlay, TransactionConfigPatch,
};
pub use validator::Validate;
pub use versioned::{UiView, Versioned};
