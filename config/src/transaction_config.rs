//! Per-agent transaction capture settings, pushed down to the agent whenever
//! they change.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::versioned::Versioned;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", from = "TransactionConfigOverlay")]
pub struct TransactionConfig {
    slow_threshold_millis: u32,

    #[validate(range(min = 1))]
    profiling_interval_millis: u32,

    capture_thread_stats: bool,

    #[serde(skip_serializing)]
    version: String
}

impl TransactionConfig {
    pub fn new(
        slow_threshold_millis: u32,
        profiling_interval_millis: u32,
        capture_thread_stats: bool
    ) -> Self {
        let version = utils::compute_version_hash(&(
            slow_threshold_millis,
            profiling_interval_millis,
            capture_thread_stats
        ));
        Self {
            slow_threshold_millis,
            profiling_interval_millis,
            capture_thread_stats,
            version
        }
    }

    pub fn overlay(base: &TransactionConfig) -> TransactionConfigOverlay {
        TransactionConfigOverlay {
            slow_threshold_millis: base.slow_threshold_millis,
            profiling_interval_millis: base.profiling_interval_millis,
            capture_thread_stats: base.capture_thread_stats
        }
    }

    pub fn slow_threshold_millis(&self) -> u32 {
        self.slow_threshold_millis
    }

    pub fn profiling_interval_millis(&self) -> u32 {
        self.profiling_interval_millis
    }

    pub fn capture_thread_stats(&self) -> bool {
        self.capture_thread_stats
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::new(2000, 1000, true)
    }
}

impl Versioned for TransactionConfig {
    fn version(&self) -> &str {
        &self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionConfigOverlay {
    slow_threshold_millis: u32,
    profiling_interval_millis: u32,
    capture_thread_stats: bool
}

impl Default for TransactionConfigOverlay {
    fn default() -> Self {
        TransactionConfig::overlay(&TransactionConfig::default())
    }
}

impl TransactionConfigOverlay {
    pub fn set_slow_threshold_millis(&mut self, slow_threshold_millis: u32) -> &mut Self {
        self.slow_threshold_millis = slow_threshold_millis;
        self
    }

    pub fn set_profiling_interval_millis(&mut self, profiling_interval_millis: u32) -> &mut Self {
        self.profiling_interval_millis = profiling_interval_millis;
        self
    }

    pub fn set_capture_thread_stats(&mut self, capture_thread_stats: bool) -> &mut Self {
        self.capture_thread_stats = capture_thread_stats;
        self
    }

    pub fn apply(&mut self, patch: TransactionConfigPatch) -> &mut Self {
        if let Some(millis) = patch.slow_threshold_millis {
            self.set_slow_threshold_millis(millis);
        }
        if let Some(millis) = patch.profiling_interval_millis {
            self.set_profiling_interval_millis(millis);
        }
        if let Some(capture) = patch.capture_thread_stats {
            self.set_capture_thread_stats(capture);
        }
        self
    }

    pub fn build(&self) -> TransactionConfig {
        TransactionConfig::new(
            self.slow_threshold_millis,
            self.profiling_interval_millis,
            self.capture_thread_stats
        )
    }
}

impl From<TransactionConfigOverlay> for TransactionConfig {
    fn from(overlay: TransactionConfigOverlay) -> Self {
        overlay.build()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionConfigPatch {
    #[serde(default)]
    pub slow_threshold_millis: Option<u32>,
    #[serde(default)]
    pub profiling_interval_millis: Option<u32>,
    #[serde(default)]
    pub capture_thread_stats: Option<bool>
}
