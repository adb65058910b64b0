//! Engine wiring: one owned instance that assembles the replication
//! components, registers the local region, and runs the background loops.
//!
//! Three kinds of loops run under the engine: the dispatch poll, the health
//! cycle, and a pool of workers consuming the replication queue. Each is a
//! spawned task watching a shutdown signal, so the whole engine stops
//! cleanly when the process does.

use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::dispatcher::Dispatcher;
use crate::error::SyncError;
use crate::health::{HealthMonitor, HealthSummary, HealthThresholds, RegionHealth};
use crate::link::RegionRouter;
use crate::log::{JsonMap, Operation, ReplicationEntry, ReplicationLog, SyncTable};
use crate::metrics::{MetricsReporter, RegionMetrics, StatusReport};
use crate::queue::TaskQueue;
use crate::region::Region;
use crate::store::SyncStore;
use crate::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The replication engine: owns every component and its background loops.
pub struct SyncEngine {
    config: SyncConfig,
    region: Region,
    log: ReplicationLog,
    resolver: ConflictResolver,
    health: Arc<HealthMonitor>,
    metrics: MetricsReporter,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Validate the config, register the local region, and start the
    /// background loops.
    ///
    /// Registration is idempotent: an existing region row with the
    /// configured name is adopted, otherwise a new ACTIVE row is created.
    pub async fn start(
        config: SyncConfig,
        store: Arc<dyn SyncStore>,
        queue: Arc<dyn TaskQueue>,
        router: Arc<dyn RegionRouter>,
    ) -> Result<Arc<Self>, SyncError> {
        config.validate()?;
        let region = Self::register_region(&config, &store).await?;

        let log = ReplicationLog::new(store.clone(), region.id);
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queue.clone(),
            region.id,
            config.dispatch_batch_size,
        ));
        let worker = Arc::new(Worker::new(store.clone(), router.clone()));
        let resolver = ConflictResolver::new(store.clone());
        let health = Arc::new(HealthMonitor::new(
            store.clone(),
            router,
            HealthThresholds::default(),
            Duration::from_millis(config.ping_timeout_ms),
        ));
        let metrics = MetricsReporter::new(store, region.id);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::new(Self {
            region,
            log,
            resolver,
            health: health.clone(),
            metrics,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        });

        let mut tasks = engine.tasks.lock().await;
        tasks.push(tokio::spawn(Self::dispatch_loop(
            dispatcher,
            engine.config.sync_interval_ms,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(Self::health_loop(
            health,
            engine.config.health_check_interval_ms,
            shutdown_rx.clone(),
        )));
        for _ in 0..engine.config.worker_count {
            tasks.push(tokio::spawn(Self::worker_loop(
                worker.clone(),
                queue.clone(),
                Duration::from_millis(engine.config.apply_timeout_ms),
                shutdown_rx.clone(),
            )));
        }
        drop(tasks);

        tracing::info!(
            region = %engine.region.name,
            workers = engine.config.worker_count,
            "replication engine started"
        );
        Ok(engine)
    }

    async fn register_region(
        config: &SyncConfig,
        store: &Arc<dyn SyncStore>,
    ) -> Result<Region, SyncError> {
        if let Some(region) = store.region_by_name(&config.region_name).await? {
            tracing::info!(region = %region.name, "adopted existing region row");
            return Ok(region);
        }

        let mut region = Region::new(&config.region_name, &config.host, config.port);
        region.is_primary = config.is_primary;
        store.insert_region(region.clone()).await?;
        tracing::info!(region = %region.name, is_primary = region.is_primary, "registered region");
        Ok(region)
    }

    async fn dispatch_loop(
        dispatcher: Arc<Dispatcher>,
        interval_ms: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = dispatcher.dispatch_pending().await {
                        tracing::error!(error = %e, "dispatch poll failed");
                    }
                }
            }
        }
    }

    async fn health_loop(
        health: Arc<HealthMonitor>,
        interval_ms: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = health.check_all().await {
                        tracing::error!(error = %e, "health cycle failed");
                    }
                }
            }
        }
    }

    async fn worker_loop(
        worker: Arc<Worker>,
        queue: Arc<dyn TaskQueue>,
        apply_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let task = tokio::select! {
                _ = shutdown.changed() => break,
                task = queue.pop() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            match tokio::time::timeout(
                apply_timeout,
                worker.apply(task.log_id, task.target_region_id),
            )
            .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) if e.is_transient() => {
                    queue.nack(task).await;
                }
                Ok(Err(e)) => {
                    // Programmer/data errors are not retried.
                    tracing::error!(
                        log_id = %task.log_id,
                        target = %task.target_region_id,
                        error = %e,
                        "replication task failed permanently"
                    );
                }
                Err(_) => {
                    if let Err(e) = worker
                        .record_failure(task.log_id, task.target_region_id, "apply timed out")
                        .await
                    {
                        tracing::error!(log_id = %task.log_id, error = %e, "failed to record timeout");
                    }
                    queue.nack(task).await;
                }
            }
        }
    }

    /// Record one logical write for propagation to other regions.
    pub async fn log_operation(
        &self,
        table: SyncTable,
        record_id: &str,
        operation: Operation,
        data: JsonMap,
        old_data: Option<JsonMap>,
    ) -> Result<ReplicationEntry, SyncError> {
        self.log
            .log_operation(table, record_id, operation, data, old_data)
            .await
    }

    /// The region this engine runs in.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The conflict resolver, for operator-driven resolutions.
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Full engine snapshot for the status endpoint.
    pub async fn status_report(&self) -> Result<StatusReport, SyncError> {
        self.metrics.status_report().await
    }

    /// Per-target counters for one region.
    pub async fn region_metrics(&self, region_id: Uuid) -> Result<RegionMetrics, SyncError> {
        self.metrics.region_metrics(region_id).await
    }

    /// Aggregate health across all regions.
    pub async fn health_summary(&self) -> Result<HealthSummary, SyncError> {
        self.health.health_summary().await
    }

    /// Cached health snapshot for one region.
    pub fn region_health(&self, region_id: Uuid) -> Option<RegionHealth> {
        self.health.region_health(region_id)
    }

    /// Cached health snapshots for every sampled region.
    pub fn all_region_health(&self) -> Vec<RegionHealth> {
        self.health.all_region_health()
    }

    /// Signal every loop to stop and wait for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        tracing::info!(region = %self.region.name, "replication engine stopped");
    }
}
