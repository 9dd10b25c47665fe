//! Startup and shutdown orchestration for the collector.
//!
//! Startup acquires resources in a fixed order and releases whatever it
//! already holds if any step fails. Shutdown releases in exact reverse order
//! and keeps going past individual failures.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use collector_core::{Clock, DownstreamPush, RepoAdmin, SystemClock, TelemetrySink};
use config::{DEFAULT_SETTINGS_FILE, EnvironmentSettings, RepoAdminMode, StorageBackend};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use storage::dao::{
    AgentDao, AggregateDao, AlertConfigDao, GaugeValueDao, ServerConfigDao, TraceDao,
    TransactionTypeDao,
};
use storage::{
    ClusterConnection, ClusterDriver, ClusterSettings, ConfigRepository, ExpirationRepoAdmin,
    MemoryClusterDriver, NopRepoAdmin, RedisClusterDriver, RollupLevelService,
};
use strum::Display;
use tokio::signal;

use crate::agent_server::AgentCommunicationServer;
use crate::error::{CollectorError, Result};
use crate::ui::{UiServer, UiState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LifecycleState {
    Unstarted,
    Starting,
    Running,
    Closing,
    Closed,
}

/// Startup steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StartupStep {
    ResolveSettings,
    OpenCluster,
    CatalogDaos,
    ConfigRepository,
    DomainDaos,
    AgentServer,
    RegisterDownstream,
    RollupService,
    UiLayer,
}

/// Resources released at shutdown, in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    UiLayer,
    AgentServer,
    StorageSession,
    Cluster,
}

/// Observer of lifecycle progress.
pub trait LifecycleListener: Send + Sync {
    fn step_completed(&self, _step: StartupStep) {}

    /// Called once per released resource; `error` is set when the release
    /// failed.
    fn resource_released(&self, _resource: Resource, _error: Option<&str>) {}
}

/// Listener that only logs.
#[derive(Debug, Default)]
pub struct TracingListener;

impl LifecycleListener for TracingListener {
    fn step_completed(&self, step: StartupStep) {
        tracing::debug!(step = %step, "Startup step completed");
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub released: Vec<Resource>,
    pub failures: Vec<(Resource, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record<E: std::fmt::Display>(
        &mut self,
        resource: Resource,
        result: std::result::Result<(), E>,
        listener: &dyn LifecycleListener,
    ) {
        self.released.push(resource);
        match result {
            Ok(()) => {
                tracing::info!(resource = %resource, "Released");
                listener.resource_released(resource, None);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(resource = %resource, error = %message, "Release failed");
                listener.resource_released(resource, Some(&message));
                self.failures.push((resource, message));
            }
        }
    }
}

/// Addresses and shared handles of a running collector.
#[derive(Clone)]
pub struct RunningHandles {
    pub settings: EnvironmentSettings,
    pub agent_address: SocketAddr,
    pub ui_address: SocketAddr,
    pub config_repository: Arc<ConfigRepository>,
    pub agent_dao: AgentDao,
    pub aggregate_dao: Arc<AggregateDao>,
    pub trace_dao: Arc<TraceDao>,
    pub rollup: Arc<RollupLevelService>,
    pub downstream: Arc<dyn DownstreamPush>,
}

/// Everything acquired so far; released in reverse field order.
#[derive(Default)]
struct Acquired {
    drain_timeout: Duration,
    cluster: Option<ClusterConnection>,
    agent_server: Option<AgentCommunicationServer>,
    ui: Option<UiServer>,
}

pub struct ServerLifecycleBuilder {
    settings_path: PathBuf,
    settings: Option<EnvironmentSettings>,
    driver: Option<Arc<dyn ClusterDriver>>,
    listener: Arc<dyn LifecycleListener>,
    clock: Arc<dyn Clock>,
    metrics: Option<PrometheusHandle>,
}

impl ServerLifecycleBuilder {
    pub fn settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }

    /// Uses these settings instead of reading the properties file.
    pub fn settings(mut self, settings: EnvironmentSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Overrides the driver otherwise chosen from `storage.backend`.
    pub fn cluster_driver(mut self, driver: Arc<dyn ClusterDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn build(self) -> ServerLifecycle {
        ServerLifecycle {
            settings_path: self.settings_path,
            settings: self.settings,
            driver: self.driver,
            listener: self.listener,
            clock: self.clock,
            metrics: self.metrics,
            state: Mutex::new(LifecycleState::Unstarted),
            acquired: tokio::sync::Mutex::new(Acquired::default()),
            handles: Mutex::new(None),
        }
    }
}

/// Owner of every long-lived resource of the collector.
pub struct ServerLifecycle {
    settings_path: PathBuf,
    settings: Option<EnvironmentSettings>,
    driver: Option<Arc<dyn ClusterDriver>>,
    listener: Arc<dyn LifecycleListener>,
    clock: Arc<dyn Clock>,
    metrics: Option<PrometheusHandle>,
    state: Mutex<LifecycleState>,
    acquired: tokio::sync::Mutex<Acquired>,
    handles: Mutex<Option<RunningHandles>>,
}

impl ServerLifecycle {
    pub fn builder() -> ServerLifecycleBuilder {
        ServerLifecycleBuilder {
            settings_path: PathBuf::from(DEFAULT_SETTINGS_FILE),
            settings: None,
            driver: None,
            listener: Arc::new(TracingListener),
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Handles of the running collector; `None` unless `Running`.
    pub fn handles(&self) -> Option<RunningHandles> {
        self.handles.lock().clone()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock() = state;
        tracing::debug!(state = %state, "Lifecycle state changed");
    }

    /// Runs every startup step. On failure everything acquired so far is
    /// released and the lifecycle ends `Closed`.
    pub async fn start(&self) -> Result<()> {
        // Locked for the whole startup run, under the same state lock `close` takes.
        let mut acquired = {
            let mut state = self.state.lock();
            if *state != LifecycleState::Unstarted {
                return Err(CollectorError::Lifecycle(format!(
                    "cannot start from state {state}"
                )));
            }
            let Ok(acquired) = self.acquired.try_lock() else {
                return Err(CollectorError::Lifecycle(
                    "startup is already in progress".to_string(),
                ));
            };
            *state = LifecycleState::Starting;
            acquired
        };

        match self.run_startup(&mut acquired).await {
            Ok(handles) => {
                tracing::info!(
                    agent_address = %handles.agent_address,
                    ui_address = %handles.ui_address,
                    "Collector running"
                );
                *self.handles.lock() = Some(handles);
                self.set_state(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Startup failed, releasing acquired resources");
                let report = self.release(std::mem::take(&mut *acquired)).await;
                if !report.is_clean() {
                    tracing::warn!(failures = ?report.failures, "Rollback left failures");
                }
                self.set_state(LifecycleState::Closed);
                Err(e)
            }
        }
    }

    async fn run_startup(&self, acquired: &mut Acquired) -> Result<RunningHandles> {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => EnvironmentSettings::load(&self.settings_path)?,
        };
        acquired.drain_timeout = settings.drain_timeout;
        self.listener.step_completed(StartupStep::ResolveSettings);

        let driver = self
            .driver
            .clone()
            .unwrap_or_else(|| driver_for(settings.storage_backend));
        let cluster =
            ClusterConnection::open(driver.as_ref(), &ClusterSettings::from_environment(&settings))
                .await?;
        let session = cluster.session();
        acquired.cluster = Some(cluster);
        self.listener.step_completed(StartupStep::OpenCluster);

        let agent_dao = AgentDao::new(session.clone());
        let transaction_type_dao = TransactionTypeDao::new(session.clone());
        self.listener.step_completed(StartupStep::CatalogDaos);

        let config_repository = Arc::new(
            ConfigRepository::load(
                agent_dao.clone(),
                ServerConfigDao::new(session.clone()),
                AlertConfigDao::new(session.clone()),
            )
            .await?,
        );
        self.listener.step_completed(StartupStep::ConfigRepository);

        let aggregate_dao = Arc::new(AggregateDao::new(
            session.clone(),
            Arc::clone(&config_repository),
            transaction_type_dao.clone(),
        ));
        let trace_dao = Arc::new(TraceDao::new(
            session.clone(),
            Arc::clone(&config_repository),
            transaction_type_dao.clone(),
        ));
        let gauge_value_dao = Arc::new(GaugeValueDao::new(
            session,
            Arc::clone(&config_repository),
        ));
        self.listener.step_completed(StartupStep::DomainDaos);

        let sinks: Vec<Arc<dyn TelemetrySink>> = vec![
            Arc::clone(&aggregate_dao) as Arc<dyn TelemetrySink>,
            Arc::clone(&trace_dao) as Arc<dyn TelemetrySink>,
            Arc::clone(&gauge_value_dao) as Arc<dyn TelemetrySink>,
        ];
        let agent_server = AgentCommunicationServer::start(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.agent_port),
            agent_dao.clone(),
            Arc::clone(&config_repository),
            sinks,
            Arc::clone(&self.clock),
        )
        .await?;
        let agent_address = agent_server.local_addr();
        let downstream: Arc<dyn DownstreamPush> = agent_server.downstream();
        acquired.agent_server = Some(agent_server);
        self.listener.step_completed(StartupStep::AgentServer);

        config_repository.register_downstream(Arc::clone(&downstream))?;
        self.listener.step_completed(StartupStep::RegisterDownstream);

        let rollup = Arc::new(RollupLevelService::new(
            Arc::clone(&config_repository),
            Arc::clone(&self.clock),
            settings.max_rollup_data_points,
        ));
        self.listener.step_completed(StartupStep::RollupService);

        let repo_admin: Arc<dyn RepoAdmin> = match settings.repo_admin_mode {
            RepoAdminMode::Disabled => Arc::new(NopRepoAdmin),
            RepoAdminMode::Expiration => Arc::new(ExpirationRepoAdmin::new(
                Arc::clone(&aggregate_dao),
                Arc::clone(&trace_dao),
                Arc::clone(&gauge_value_dao),
                Arc::clone(&self.clock),
            )),
        };
        let ui_state = Arc::new(UiState {
            config_repository: Arc::clone(&config_repository),
            agent_dao: agent_dao.clone(),
            transaction_type_dao,
            aggregate_dao: Arc::clone(&aggregate_dao),
            trace_dao: Arc::clone(&trace_dao),
            gauge_value_dao,
            rollup: Arc::clone(&rollup),
            downstream: Arc::clone(&downstream),
            repo_admin,
            metrics: self.metrics.clone(),
        });
        let ui_address = ui_bind_address(&settings)?;
        let ui = UiServer::start(ui_address, ui_state).await?;
        let ui_address = ui.local_addr();
        acquired.ui = Some(ui);
        self.listener.step_completed(StartupStep::UiLayer);

        Ok(RunningHandles {
            settings,
            agent_address,
            ui_address,
            config_repository,
            agent_dao,
            aggregate_dao,
            trace_dao,
            rollup,
            downstream,
        })
    }

    /// Releases everything in reverse acquisition order. Closing an
    /// unstarted or already closed lifecycle returns an empty report, as does
    /// closing while `start` is still running.
    ///
    /// If a `start` future was dropped before it finished, whatever it had
    /// acquired is released here.
    pub async fn close(&self) -> ShutdownReport {
        let abandoned = {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Running => {
                    *state = LifecycleState::Closing;
                    None
                }
                LifecycleState::Starting => match self.acquired.try_lock() {
                    Ok(mut acquired) => {
                        *state = LifecycleState::Closing;
                        Some(std::mem::take(&mut *acquired))
                    }
                    Err(_) => return ShutdownReport::default(),
                },
                LifecycleState::Unstarted => {
                    *state = LifecycleState::Closed;
                    return ShutdownReport::default();
                }
                LifecycleState::Closing | LifecycleState::Closed => {
                    return ShutdownReport::default();
                }
            }
        };

        self.handles.lock().take();
        let acquired = match abandoned {
            Some(acquired) => {
                tracing::warn!("Releasing resources of an abandoned startup");
                acquired
            }
            None => std::mem::take(&mut *self.acquired.lock().await),
        };
        let report = self.release(acquired).await;
        self.set_state(LifecycleState::Closed);

        if report.is_clean() {
            tracing::info!("Collector shut down cleanly");
        } else {
            tracing::warn!(failures = ?report.failures, "Collector shut down with failures");
        }
        report
    }

    async fn release(&self, acquired: Acquired) -> ShutdownReport {
        let listener = self.listener.as_ref();
        let drain = acquired.drain_timeout;
        let mut report = ShutdownReport::default();

        if let Some(ui) = acquired.ui {
            report.record(Resource::UiLayer, ui.close(drain).await, listener);
        }
        if let Some(agent_server) = acquired.agent_server {
            report.record(Resource::AgentServer, agent_server.close(drain).await, listener);
        }
        if let Some(cluster) = acquired.cluster {
            report.record(
                Resource::StorageSession,
                cluster.close_session(drain).await,
                listener,
            );
            report.record(Resource::Cluster, cluster.close_cluster().await, listener);
        }
        report
    }
}

fn driver_for(backend: StorageBackend) -> Arc<dyn ClusterDriver> {
    match backend {
        StorageBackend::Redis => Arc::new(RedisClusterDriver::new()),
        StorageBackend::Memory => Arc::new(MemoryClusterDriver::new()),
    }
}

fn ui_bind_address(settings: &EnvironmentSettings) -> Result<SocketAddr> {
    let ip: IpAddr = settings.ui_bind_address.parse().map_err(|e| {
        CollectorError::Bind {
            address: settings.ui_bind_address.clone(),
            reason: format!("invalid bind address: {e}"),
        }
    })?;
    Ok(SocketAddr::new(ip, settings.ui_port))
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        () = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
