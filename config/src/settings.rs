//! # Environment Settings
//!
//! Static process settings, resolved once at startup from an optional
//! properties file and read-only afterwards.
//!
//! # Keys
//! - `storage.contact.points`: comma-separated cluster hosts (default: `127.0.0.1`)
//! - `storage.namespace`: logical keyspace (default: `collector`)
//! - `storage.backend`: `redis` or `memory` (default: `redis`)
//! - `storage.connect.timeout.millis`: cluster connect bound (default: none)
//! - `agent.port`: agent server port (default: 8181)
//! - `ui.bind.address` / `ui.port`: UI listener (default: `0.0.0.0:4000`)
//! - `shutdown.drain.timeout.millis`: per-resource drain bound (default: 10000)
//! - `rollup.max.data.points`: max buckets per rollup query (default: 1000)
//! - `repo.admin.mode`: `disabled` or `expiration` (default: `disabled`)

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use errors::SettingsError;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};
use validator::{Validate, ValidationError};

use crate::properties::parse_properties;

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "collector.properties";

pub const CONTACT_POINTS_KEY: &str = "storage.contact.points";
pub const NAMESPACE_KEY: &str = "storage.namespace";
pub const STORAGE_BACKEND_KEY: &str = "storage.backend";
pub const CONNECT_TIMEOUT_KEY: &str = "storage.connect.timeout.millis";
pub const AGENT_PORT_KEY: &str = "agent.port";
pub const UI_BIND_ADDRESS_KEY: &str = "ui.bind.address";
pub const UI_PORT_KEY: &str = "ui.port";
pub const DRAIN_TIMEOUT_KEY: &str = "shutdown.drain.timeout.millis";
pub const MAX_ROLLUP_DATA_POINTS_KEY: &str = "rollup.max.data.points";
pub const REPO_ADMIN_MODE_KEY: &str = "repo.admin.mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Redis,
    /// In-process tables, lost on exit.
    Memory
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepoAdminMode {
    #[default]
    Disabled,
    Expiration
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct EnvironmentSettings {
    #[validate(length(min = 1))]
    pub contact_points: Vec<String>,

    #[validate(custom(function = "validate_namespace"))]
    pub namespace: String,

    pub storage_backend: StorageBackend,

    pub connect_timeout: Option<Duration>,

    #[validate(range(min = 1))]
    pub agent_port: u16,

    #[validate(length(min = 1))]
    pub ui_bind_address: String,

    pub ui_port: u16,

    pub drain_timeout: Duration,

    #[validate(range(min = 1))]
    pub max_rollup_data_points: u32,

    pub repo_admin_mode: RepoAdminMode
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            contact_points: vec!["127.0.0.1".to_string()],
            namespace: "collector".to_string(),
            storage_backend: StorageBackend::Redis,
            connect_timeout: None,
            agent_port: 8181,
            ui_bind_address: "0.0.0.0".to_string(),
            ui_port: 4000,
            drain_timeout: Duration::from_millis(10_000),
            max_rollup_data_points: 1000,
            repo_admin_mode: RepoAdminMode::Disabled
        }
    }
}

impl EnvironmentSettings {
    /// Resolve settings from a properties file.
    ///
    /// # M-CANONICAL-DOCS
    ///
    /// ## Purpose
    /// Reads the collector's static settings. A missing file is not an
    /// error: every key then keeps its default.
    ///
    /// ## Usage
    /// ```rust,no_run
    /// use config::EnvironmentSettings;
    /// use std::path::Path;
    ///
    /// fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let settings = EnvironmentSettings::load(Path::new("collector.properties"))?;
    ///     println!("agent port: {}", settings.agent_port);
    ///     Ok(())
    /// }
    /// ```
    ///
    /// ## Error Handling
    /// Returns `SettingsError` for:
    /// - an unreadable file
    /// - a malformed number or enum value
    /// - values that fail validation
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.display().to_string(),
            reason: e.to_string()
        })?;
        debug!(path = %path.display(), "Loaded settings file");

        Self::from_properties(&parse_properties(&contents))
    }

    /// Apply parsed properties over the defaults. Empty values never
    /// override.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        let value = |key: &str| {
            properties
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = value(CONTACT_POINTS_KEY) {
            let points = utils::split_list(raw);
            if !points.is_empty() {
                settings.contact_points = points;
            }
        }
        if let Some(raw) = value(NAMESPACE_KEY) {
            settings.namespace = raw.to_string();
        }
        if let Some(raw) = value(STORAGE_BACKEND_KEY) {
            settings.storage_backend = parse_value(STORAGE_BACKEND_KEY, raw)?;
        }
        if let Some(raw) = value(CONNECT_TIMEOUT_KEY) {
            let millis: u64 = parse_value(CONNECT_TIMEOUT_KEY, raw)?;
            settings.connect_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(raw) = value(AGENT_PORT_KEY) {
            settings.agent_port = parse_value(AGENT_PORT_KEY, raw)?;
        }
        if let Some(raw) = value(UI_BIND_ADDRESS_KEY) {
            settings.ui_bind_address = raw.to_string();
        }
        if let Some(raw) = value(UI_PORT_KEY) {
            settings.ui_port = parse_value(UI_PORT_KEY, raw)?;
        }
        if let Some(raw) = value(DRAIN_TIMEOUT_KEY) {
            let millis: u64 = parse_value(DRAIN_TIMEOUT_KEY, raw)?;
            settings.drain_timeout = Duration::from_millis(millis);
        }
        if let Some(raw) = value(MAX_ROLLUP_DATA_POINTS_KEY) {
            settings.max_rollup_data_points = parse_value(MAX_ROLLUP_DATA_POINTS_KEY, raw)?;
        }
        if let Some(raw) = value(REPO_ADMIN_MODE_KEY) {
            settings.repo_admin_mode = parse_value(REPO_ADMIN_MODE_KEY, raw)?;
        }

        settings
            .validate()
            .map_err(|e| SettingsError::Validation {
                reason: e.to_string()
            })?;

        Ok(settings)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    raw.parse::<T>()
        .map_err(|e| SettingsError::InvalidProperty {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string()
        })
}

fn validate_namespace(namespace: &str) -> Result<(), ValidationError> {
    let valid_chars = namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if namespace.is_empty() || namespace.len() > 48 || !valid_chars {
        return Err(ValidationError::new("namespace"));
    }
    Ok(())
}
