use std::collections::BTreeMap;

use config::TransactionConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier an agent announces in its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() || id.len() > 256 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| format!("Invalid agent ID: {s:?}"))
    }
}

/// Process details an agent reports when it connects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentEnvironment {
    pub hostname: String,
    pub jvm_version: String,
    pub agent_version: String,
    /// Epoch millis at which the monitored process started.
    pub start_time: i64,
    pub properties: BTreeMap<String, String>
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TelemetryKind {
    Aggregates,
    Trace,
    GaugeValues
}

/// Aggregated timings for one transaction type over one capture interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAggregate {
    pub transaction_type: String,
    pub total_duration_millis: f64,
    pub max_duration_millis: f64,
    pub transaction_count: u64,
    #[serde(default)]
    pub error_count: u64
}

impl TransactionAggregate {
    /// Folds `other` into this aggregate.
    pub fn merge(&mut self, other: &TransactionAggregate) {
        self.total_duration_millis += other.total_duration_millis;
        self.max_duration_millis = self.max_duration_millis.max(other.max_duration_millis);
        self.transaction_count += other.transaction_count;
        self.error_count += other.error_count;
    }

    pub fn average_duration_millis(&self) -> f64 {
        if self.transaction_count == 0 {
            0.0
        } else {
            self.total_duration_millis / self.transaction_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    pub transaction_type: String,
    pub transaction_name: String,
    /// Epoch millis.
    pub start_time: i64,
    pub duration_millis: f64,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub headline: String,
    /// Opaque trace entries and profile; only its size matters here.
    #[serde(default)]
    pub detail: serde_json::Value
}

/// One JVM gauge sample. Rolled-up values carry the number of samples they
/// were averaged from in `weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaugeValue {
    pub gauge_name: String,
    pub capture_time: i64,
    pub value: f64,
    #[serde(default = "default_weight")]
    pub weight: u64
}

fn default_weight() -> u64 {
    1
}

impl GaugeValue {
    /// Weighted average of both samples.
    pub fn merge(&mut self, other: &GaugeValue) {
        let total = self.weight + other.weight;
        if total > 0 {
            self.value = (self.value * self.weight as f64 + other.value * other.weight as f64)
                / total as f64;
        }
        self.weight = total;
        self.capture_time = self.capture_time.max(other.capture_time);
    }
}

/// Telemetry pushed by an agent, routed by [`TelemetryKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TelemetryMessage {
    #[serde(rename_all = "camelCase")]
    Aggregates {
        capture_time: i64,
        aggregates: Vec<TransactionAggregate>
    },
    Trace(Trace),
    #[serde(rename_all = "camelCase")]
    GaugeValues { values: Vec<GaugeValue> }
}

impl TelemetryMessage {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Self::Aggregates { .. } => TelemetryKind::Aggregates,
            Self::Trace(_) => TelemetryKind::Trace,
            Self::GaugeValues { .. } => TelemetryKind::GaugeValues
        }
    }
}

/// Live-control command sent from the collector to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentCommand {
    ThreadDump,
    #[serde(rename_all = "camelCase")]
    JvmProfile { duration_seconds: u32 },
    ReweaveClasses,
    UpdateTransactionConfig { config: TransactionConfig }
}

/// Half-open interval `[from, to)` in epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    pub fn duration_millis(&self) -> i64 {
        (self.to - self.from).max(0)
    }

    pub fn contains(&self, millis: i64) -> bool {
        millis >= self.from && millis < self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_rejects_blank() {
        assert!(AgentId::new("").is_none());
        assert!(AgentId::new("   ").is_none());
        assert_eq!(AgentId::new("web-1").unwrap().as_str(), "web-1");
        assert!("web-1".parse::<AgentId>().is_ok());
    }

    #[test]
    fn test_telemetry_message_wire_shape() {
        let json = r#"{"kind":"gaugeValues","values":[{"gaugeName":"heap","captureTime":5,"value":2.0}]}"#;
        let message: TelemetryMessage = serde_json::from_str(json).unwrap();

        assert_eq!(message.kind(), TelemetryKind::GaugeValues);
        match message {
            TelemetryMessage::GaugeValues { values } => assert_eq!(values[0].weight, 1),
            other => panic!("unexpected message: {other:?}")
        }
    }

    #[test]
    fn test_trace_message_is_flattened() {
        let json = r#"{"kind":"trace","id":"t1","transactionType":"Web","transactionName":"/","startTime":1,"durationMillis":3.5}"#;
        let message: TelemetryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.kind(), TelemetryKind::Trace);
    }

    #[test]
    fn test_aggregate_merge() {
        let mut first = TransactionAggregate {
            transaction_type: "Web".to_string(),
            total_duration_millis: 100.0,
            max_duration_millis: 60.0,
            transaction_count: 2,
            error_count: 0
        };
        let second = TransactionAggregate {
            transaction_type: "Web".to_string(),
            total_duration_millis: 50.0,
            max_duration_millis: 80.0,
            transaction_count: 3,
            error_count: 1
        };
        first.merge(&second);

        assert_eq!(first.total_duration_millis, 150.0);
        assert_eq!(first.max_duration_millis, 80.0);
        assert_eq!(first.transaction_count, 5);
        assert_eq!(first.error_count, 1);
        assert_eq!(first.average_duration_millis(), 30.0);
    }

    #[test]
    fn test_gauge_merge_is_weighted() {
        let mut first = GaugeValue {
            gauge_name: "heap".to_string(),
            capture_time: 10,
            value: 10.0,
            weight: 3
        };
        first.merge(&GaugeValue {
            gauge_name: "heap".to_string(),
            capture_time: 20,
            value: 30.0,
            weight: 1
        });

        assert_eq!(first.value, 15.0);
        assert_eq!(first.weight, 4);
        assert_eq!(first.capture_time, 20);
    }

    #[test]
    fn test_command_wire_shape() {
        let json = serde_json::to_value(AgentCommand::JvmProfile { duration_seconds: 30 }).unwrap();
        assert_eq!(json["type"], "jvmProfile");
        assert_eq!(json["durationSeconds"], 30);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(10, 20);
        assert!(!range.is_empty());
        assert!(range.contains(10));
        assert!(!range.contains(20));
        assert!(TimeRange::new(20, 10).is_empty());
        assert_eq!(TimeRange::new(20, 10).duration_millis(), 0);
    }
}
