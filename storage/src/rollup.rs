//! # Rollup Level Selection
//!
//! Picks the aggregation granularity used to answer a time-range query.

use std::sync::Arc;
use std::time::Duration;

use collector_core::{Clock, TimeRange};
use serde::Serialize;

use crate::config_repository::ConfigRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupLevel {
    pub level: usize,
    pub interval: Duration,
    pub expiration: Duration
}

impl RollupLevel {
    pub fn interval_millis(&self) -> i64 {
        self.interval.as_millis() as i64
    }
}

/// Finest level that renders `range` in at most `max_data_points` buckets
/// and still retains data at the end of the range. Falls back to the
/// coarsest level; an empty range maps to level 0.
pub fn select_rollup_level(
    range: TimeRange,
    levels: &[RollupLevel],
    now_millis: i64,
    max_data_points: u32
) -> usize {
    if range.is_empty() || levels.is_empty() {
        return 0;
    }

    let span = range.duration_millis();
    let age = (now_millis - range.to).max(0);

    levels
        .iter()
        .find(|level| {
            let interval = level.interval_millis().max(1);
            let points = (span + interval - 1) / interval;
            let retained = age < level.expiration.as_millis() as i64;
            points <= i64::from(max_data_points) && retained
        })
        .or_else(|| levels.last())
        .map_or(0, |level| level.level)
}

pub struct RollupLevelService {
    config_repository: Arc<ConfigRepository>,
    clock: Arc<dyn Clock>,
    max_data_points: u32
}

impl RollupLevelService {
    pub fn new(
        config_repository: Arc<ConfigRepository>,
        clock: Arc<dyn Clock>,
        max_data_points: u32
    ) -> Self {
        Self {
            config_repository,
            clock,
            max_data_points
        }
    }

    pub fn level_for(&self, from: i64, to: i64) -> usize {
        select_rollup_level(
            TimeRange::new(from, to),
            &self.config_repository.rollup_levels(),
            self.clock.now_millis(),
            self.max_data_points
        )
    }

    pub fn levels(&self) -> Vec<RollupLevel> {
        self.config_repository.rollup_levels()
    }

    pub fn max_data_points(&self) -> u32 {
        self.max_data_points
    }
}
