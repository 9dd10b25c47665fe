//! Integration tests for the Redis cluster driver
//!
//! These tests use the shared Redis testcontainer and are skipped when Docker
//! is not available.

use std::time::Duration;

use storage::{
    Cluster, ClusterConnection, ClusterDriver, ClusterSession, ClusterSettings, RedisClusterDriver,
    ReplicationPolicy,
};

fn settings(contact_point: &str, namespace: &str) -> ClusterSettings {
    ClusterSettings {
        contact_points: vec![contact_point.to_string()],
        namespace: namespace.to_string(),
        connect_timeout: Some(Duration::from_secs(10))
    }
}

#[tokio::test]
async fn test_redis_table_operations() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let namespace = testing::unique_namespace();
    let connection = ClusterConnection::open(
        &RedisClusterDriver::new(),
        &settings(fixture.contact_point(), &namespace)
    )
    .await
    .expect("Failed to open Redis cluster connection");
    let session = connection.session();

    session.put("agent", "a:1", "one").await.unwrap();
    session.put("agent", "a:2", "two").await.unwrap();
    session.put("agent", "b:1", "three").await.unwrap();

    assert_eq!(
        session.get("agent", "a:1").await.unwrap().as_deref(),
        Some("one")
    );
    let rows = session.scan("agent", "a:").await.unwrap();
    assert_eq!(
        rows,
        vec![
            ("a:1".to_string(), "one".to_string()),
            ("a:2".to_string(), "two".to_string())
        ]
    );

    assert!(session.delete("agent", "a:1").await.unwrap());
    assert!(!session.delete("agent", "a:1").await.unwrap());
    assert_eq!(session.get("agent", "a:1").await.unwrap(), None);

    connection
        .close_session(Duration::from_secs(1))
        .await
        .unwrap();
    connection.close_cluster().await.unwrap();
}

#[tokio::test]
async fn test_redis_namespace_bootstrap_is_idempotent() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let namespace = testing::unique_namespace();

    for _ in 0..2 {
        let connection = ClusterConnection::open(
            &RedisClusterDriver::new(),
            &settings(fixture.contact_point(), &namespace)
        )
        .await
        .expect("Failed to open Redis cluster connection");
        connection.session().put("t", "k", "v").await.unwrap();
    }

    let client = redis::Client::open(fixture.url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let policy: String = redis::cmd("HGET")
        .arg("collector:namespaces")
        .arg(&namespace)
        .query_async(&mut conn)
        .await
        .unwrap();
    let policy: ReplicationPolicy = serde_json::from_str(&policy).unwrap();
    assert_eq!(policy, ReplicationPolicy::simple(1));
}

#[tokio::test]
async fn test_redis_use_unknown_namespace_fails() {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return;
    };
    let cluster = RedisClusterDriver::new()
        .connect(&[fixture.contact_point().to_string()])
        .await
        .unwrap();
    let session = cluster.open_session().await.unwrap();

    let result = session.use_namespace(&testing::unique_namespace()).await;
    assert!(matches!(
        result,
        Err(errors::StorageError::NamespaceError { .. })
    ));
}

#[tokio::test]
async fn test_redis_unreachable_contact_point() {
    let result = RedisClusterDriver::new()
        .connect(&["127.0.0.1:1".to_string()])
        .await;
    assert!(matches!(
        result,
        Err(errors::StorageError::ConnectionError { .. })
    ));
}
