//! # Repository Graph
//!
//! Data access objects over the shared [`SessionHandle`](crate::SessionHandle).
//!
//! Catalog DAOs (`AgentDao`, `TransactionTypeDao`, `ServerConfigDao`,
//! `AlertConfigDao`) have no dependencies beyond the session. Domain DAOs
//! (`AggregateDao`, `TraceDao`, `GaugeValueDao`) also take the
//! `ConfigRepository` for rollup levels and retention.

pub mod agent;
pub mod aggregate;
pub mod alert_config;
pub mod gauge_value;
pub mod server_config;
pub mod trace;
pub mod transaction_type;

pub use agent::{AgentDao, AgentRecord};
pub use aggregate::{AggregateDao, AggregatePoint};
pub use alert_config::AlertConfigDao;
pub use gauge_value::GaugeValueDao;
pub use server_config::ServerConfigDao;
pub use trace::TraceDao;
pub use transaction_type::TransactionTypeDao;

/// End of the rollup bucket containing `capture_time`.
///
/// Buckets are labelled by their upper bound, so a capture exactly on a
/// boundary stays in that bucket.
pub fn rollup_capture_time(capture_time: i64, interval_millis: i64) -> i64 {
    if interval_millis <= 0 {
        return capture_time;
    }
    (capture_time + interval_millis - 1).div_euclid(interval_millis) * interval_millis
}

/// Zero-padded so lexical key order matches numeric order for
/// non-negative times.
pub(crate) fn time_key(millis: i64) -> String {
    format!("{:020}", millis.max(0))
}
