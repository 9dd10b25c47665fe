//! # Storage Configuration
//!
//! Server-wide retention and quota settings.
//!
//! Default values are conservative: one week of traces, one gigabyte of trace
//! detail, and rollup retention growing with bucket width.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::versioned::Versioned;

/// Number of rollup levels the collector maintains.
pub const ROLLUP_LEVEL_COUNT: usize = 3;

const DEFAULT_ROLLUP_EXPIRATION_HOURS: [u32; ROLLUP_LEVEL_COUNT] = [48, 24 * 30, 24 * 365];
const DEFAULT_TRACE_EXPIRATION_HOURS: u32 = 24 * 7;
const DEFAULT_CAPPED_DATABASE_SIZE_MB: u32 = 1000;

/// Immutable storage config.
///
/// Serializing this value produces the persistence representation, which
/// omits `version`. Deserializing goes through [`StorageConfigOverlay`], so
/// missing fields take their defaults and the version is always recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", from = "StorageConfigOverlay")]
pub struct StorageConfig {
    /// Retention of each rollup level, finest first.
    #[validate(custom(function = "validate_rollup_expirations"))]
    rollup_expiration_hours: Vec<u32>,

    #[validate(range(min = 1))]
    trace_expiration_hours: u32,

    /// Size of the capped store for trace details.
    #[validate(range(min = 1))]
    capped_database_size_mb: u32,

    #[serde(skip_serializing)]
    version: String
}

impl StorageConfig {
    pub fn new(
        rollup_expiration_hours: Vec<u32>,
        trace_expiration_hours: u32,
        capped_database_size_mb: u32
    ) -> Self {
        let version = utils::compute_version_hash(&(
            &rollup_expiration_hours,
            trace_expiration_hours,
            capped_database_size_mb
        ));
        Self {
            rollup_expiration_hours,
            trace_expiration_hours,
            capped_database_size_mb,
            version
        }
    }

    /// Seeds a mutable overlay with this config's current values.
    pub fn overlay(base: &StorageConfig) -> StorageConfigOverlay {
        StorageConfigOverlay {
            rollup_expiration_hours: base.rollup_expiration_hours.clone(),
            trace_expiration_hours: base.trace_expiration_hours,
            capped_database_size_mb: base.capped_database_size_mb
        }
    }

    pub fn rollup_expiration_hours(&self) -> &[u32] {
        &self.rollup_expiration_hours
    }

    pub fn trace_expiration_hours(&self) -> u32 {
        self.trace_expiration_hours
    }

    pub fn capped_database_size_mb(&self) -> u32 {
        self.capped_database_size_mb
    }

    /// Retention of the given rollup level, if the level exists.
    pub fn rollup_expiration(&self, level: usize) -> Option<Duration> {
        self.rollup_expiration_hours
            .get(level)
            .map(|hours| Duration::from_secs(u64::from(*hours) * 3600))
    }

    pub fn trace_expiration(&self) -> Duration {
        Duration::from_secs(u64::from(self.trace_expiration_hours) * 3600)
    }

    pub fn capped_database_size_bytes(&self) -> u64 {
        u64::from(self.capped_database_size_mb) * 1024 * 1024
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_ROLLUP_EXPIRATION_HOURS.to_vec(),
            DEFAULT_TRACE_EXPIRATION_HOURS,
            DEFAULT_CAPPED_DATABASE_SIZE_MB
        )
    }
}

impl Versioned for StorageConfig {
    fn version(&self) -> &str {
        &self.version
    }
}

fn validate_rollup_expirations(hours: &[u32]) -> Result<(), ValidationError> {
    if hours.len() != ROLLUP_LEVEL_COUNT {
        return Err(ValidationError::new("rollup_level_count"));
    }
    if hours.contains(&0) {
        return Err(ValidationError::new("rollup_expiration_zero"));
    }
    Ok(())
}

/// Staging area for a partial update of a [`StorageConfig`].
///
/// Setters only stage values; nothing is recomputed until [`build`].
///
/// [`build`]: StorageConfigOverlay::build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfigOverlay {
    rollup_expiration_hours: Vec<u32>,
    trace_expiration_hours: u32,
    capped_database_size_mb: u32
}

impl Default for StorageConfigOverlay {
    fn default() -> Self {
        StorageConfig::overlay(&StorageConfig::default())
    }
}

impl StorageConfigOverlay {
    pub fn set_rollup_expiration_hours(&mut self, rollup_expiration_hours: Vec<u32>) -> &mut Self {
        self.rollup_expiration_hours = rollup_expiration_hours;
        self
    }

    pub fn set_trace_expiration_hours(&mut self, trace_expiration_hours: u32) -> &mut Self {
        self.trace_expiration_hours = trace_expiration_hours;
        self
    }

    pub fn set_capped_database_size_mb(&mut self, capped_database_size_mb: u32) -> &mut Self {
        self.capped_database_size_mb = capped_database_size_mb;
        self
    }

    /// Stages every field present in `patch`; absent fields keep the base
    /// value.
    pub fn apply(&mut self, patch: StorageConfigPatch) -> &mut Self {
        if let Some(hours) = patch.rollup_expiration_hours {
            self.set_rollup_expiration_hours(hours);
        }
        if let Some(hours) = patch.trace_expiration_hours {
            self.set_trace_expiration_hours(hours);
        }
        if let Some(size) = patch.capped_database_size_mb {
            self.set_capped_database_size_mb(size);
        }
        self
    }

    pub fn build(&self) -> StorageConfig {
        StorageConfig::new(
            self.rollup_expiration_hours.clone(),
            self.trace_expiration_hours,
            self.capped_database_size_mb
        )
    }
}

impl From<StorageConfigOverlay> for StorageConfig {
    fn from(overlay: StorageConfigOverlay) -> Self {
        overlay.build()
    }
}

/// Partial update document, typically deserialized from a UI request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageConfigPatch {
    #[serde(default)]
    pub rollup_expiration_hours: Option<Vec<u32>>,
    #[serde(default)]
    pub trace_expiration_hours: Option<u32>,
    #[serde(default)]
    pub capped_database_size_mb: Option<u32>
}
