use std::sync::Arc;

use collector_core::FixedClock;
use config::{StorageConfigPatch, Versioned};
use storage::dao::{AgentDao, AlertConfigDao, ServerConfigDao};
use storage::{ClusterConnection, ClusterSettings, ConfigRepository, MemoryClusterDriver, RollupLevelService};

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
const NOW: i64 = 1_700_000_000_000;

async fn service() -> (Arc<ConfigRepository>, RollupLevelService) {
    let settings = ClusterSettings {
        contact_points: vec![],
        namespace: "rollup".to_string(),
        connect_timeout: None
    };
    let session = ClusterConnection::open(&MemoryClusterDriver::new(), &settings)
        .await
        .unwrap()
        .session();
    let repo = Arc::new(
        ConfigRepository::load(
            AgentDao::new(session.clone()),
            ServerConfigDao::new(session.clone()),
            AlertConfigDao::new(session)
        )
        .await
        .unwrap()
    );
    let service = RollupLevelService::new(Arc::clone(&repo), Arc::new(FixedClock::new(NOW)), 1000);
    (repo, service)
}

#[tokio::test]
async fn test_default_levels_pick_expected_granularity() {
    let (_, service) = service().await;

    assert_eq!(service.level_for(NOW - 40 * DAY, NOW), 1);
    assert_eq!(service.level_for(NOW - 16 * HOUR, NOW), 0);
    assert_eq!(service.level_for(NOW - 17 * HOUR, NOW), 1);
    assert_eq!(service.level_for(NOW - 3 * 365 * DAY, NOW), 2);
    assert_eq!(service.level_for(NOW, NOW - HOUR), 0);
}

#[tokio::test]
async fn test_levels_follow_storage_config_updates() {
    let (repo, service) = service().await;
    let week_ago = NOW - 7 * DAY;
    assert_eq!(service.level_for(week_ago - HOUR, week_ago), 1);

    // Shrink hourly retention below a week: the same range now needs days.
    let patch = StorageConfigPatch {
        rollup_expiration_hours: Some(vec![48, 24, 8760]),
        ..StorageConfigPatch::default()
    };
    let prior = repo.storage_config();
    repo.update_storage_config(patch, prior.version())
        .await
        .unwrap();

    assert_eq!(service.level_for(week_ago - HOUR, week_ago), 2);
}
