use collector_core::TelemetryKind;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Server-side metrics for agent sessions and inbound telemetry.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectorTelemetry;

impl CollectorTelemetry {
    pub fn record_active_sessions(&self, count: usize) {
        gauge!("collector_agent_sessions").set(count as f64);
    }

    pub fn record_session_superseded(&self) {
        counter!("collector_sessions_superseded_total").increment(1);
    }

    pub fn record_telemetry_message(&self, kind: TelemetryKind) {
        counter!("collector_telemetry_messages_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_telemetry_rejected(&self, kind: TelemetryKind) {
        counter!("collector_telemetry_rejected_total", "kind" => kind.to_string()).increment(1);
    }
}

/// Installs the global Prometheus recorder. The returned handle renders
/// the exposition text served at `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
