use std::sync::Arc;

use crate::cluster::{ClusterConnection, ClusterSettings};
use crate::config_repository::ConfigRepository;
use crate::dao::{
    AgentDao, AggregateDao, AlertConfigDao, GaugeValueDao, ServerConfigDao, TraceDao,
    TransactionTypeDao,
};
use crate::memory_cluster::MemoryClusterDriver;

pub(crate) struct TestGraph {
    pub transaction_type_dao: TransactionTypeDao,
    pub aggregate_dao: Arc<AggregateDao>,
    pub trace_dao: Arc<TraceDao>,
    pub gauge_value_dao: Arc<GaugeValueDao>
}

pub(crate) async fn repository_graph() -> TestGraph {
    let settings = ClusterSettings {
        contact_points: vec![],
        namespace: "test".to_string(),
        connect_timeout: None
    };
    let session = ClusterConnection::open(&MemoryClusterDriver::new(), &settings)
        .await
        .unwrap()
        .session();

    let transaction_type_dao = TransactionTypeDao::new(session.clone());
    let config_repository = Arc::new(
        ConfigRepository::load(
            AgentDao::new(session.clone()),
            ServerConfigDao::new(session.clone()),
            AlertConfigDao::new(session.clone())
        )
        .await
        .unwrap()
    );

    TestGraph {
        aggregate_dao: Arc::new(AggregateDao::new(
            session.clone(),
            Arc::clone(&config_repository),
            transaction_type_dao.clone()
        )),
        trace_dao: Arc::new(TraceDao::new(
            session.clone(),
            Arc::clone(&config_repository),
            transaction_type_dao.clone()
        )),
        gauge_value_dao: Arc::new(GaugeValueDao::new(session, config_repository)),
        transaction_type_dao
    }
}
