//! Wires every component together, mirroring the teacher's `Services`
//! struct: one place that owns every `Arc<dyn Trait>`/`Arc<Concrete>`
//! service handle and is cloned into the REST/gRPC layers.

use crate::admission::AdmissionController;
use crate::assignment::AssignmentLifecycle;
use crate::config::MasterConfig;
use crate::grpcapi::worker_client::WorkerControlClientTransport;
use crate::metrics::Metrics;
use crate::param_loader::ParamLoader;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;
use crate::store::mongo::MongoMirror;
use crate::store::TaskStore;
use crate::tau_store::TauStore;
use crate::telemetry::TelemetryFanout;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Clone)]
pub struct Services {
    pub registry: Arc<WorkerRegistry>,
    pub telemetry: Arc<TelemetryFanout>,
    pub tau_store: Arc<TauStore>,
    pub queue: Arc<TaskQueue>,
    pub scheduler: Arc<Scheduler>,
    pub assignment: Arc<AssignmentLifecycle>,
    pub admission: Arc<AdmissionController>,
    pub params: Arc<ParamLoader>,
    pub store: Arc<TaskStore>,
    pub metrics: Arc<Metrics>,
}

impl Services {
    pub async fn new(config: &MasterConfig, metrics: Arc<Metrics>) -> Result<Self, String> {
        let mirror = match MongoMirror::connect(&config.mongodb_uri, &config.mongodb_database).await
        {
            Ok(mirror) => Some(Arc::new(mirror)),
            Err(err) => {
                warn!(error = %err, "could not connect to MongoDB mirror, continuing in-memory-only");
                None
            }
        };

        let store = TaskStore::new(mirror.clone());
        let registry = WorkerRegistry::new(config.inactivity_timeout, mirror.clone());
        if let Err(err) = registry.rehydrate().await {
            warn!(error = %err, "could not rehydrate workers from mirror, starting with an empty registry");
        }
        let telemetry = TelemetryFanout::new(metrics.clone());
        let tau_store = TauStore::new(config.tau_lambda);
        let queue = TaskQueue::new();
        let params = ParamLoader::new(config.param_file.clone());
        let scheduler = Arc::new(Scheduler::new(tau_store.clone(), params.clone()));

        let transport: Arc<dyn crate::assignment::WorkerTransport> =
            Arc::new(WorkerControlClientTransport::new());
        let assignment = AssignmentLifecycle::new(
            registry.clone(),
            queue.clone(),
            tau_store.clone(),
            transport,
            store.clone(),
            metrics.clone(),
        );

        let admission = AdmissionController::new(
            tau_store.clone(),
            queue.clone(),
            store.clone(),
            MasterConfig::clip_k(config.sched_sla_multiplier),
            metrics.clone(),
        );

        Ok(Services {
            registry,
            telemetry,
            tau_store,
            queue,
            scheduler,
            assignment,
            admission,
            params,
            store,
            metrics,
        })
    }

    /// Spawns every background task (liveness watcher, queue sweeper,
    /// parameter loader) onto the given join set; all of them listen on the
    /// same shutdown signal so `CloudAiMaster::shutdown` stops them together.
    pub fn spawn_background_tasks(
        &self,
        join_set: &mut JoinSet<Result<(), anyhow::Error>>,
        shutdown: watch::Receiver<bool>,
        queue_tick: std::time::Duration,
        param_reload_interval: std::time::Duration,
    ) {
        let registry = self.registry.clone();
        let shutdown_registry = shutdown.clone();
        join_set.spawn(async move {
            registry.run_liveness_watcher(shutdown_registry).await;
            Ok(())
        });

        let queue = self.queue.clone();
        let queue_registry = self.registry.clone();
        let scheduler = self.scheduler.clone();
        let assignment = self.assignment.clone();
        let queue_metrics = self.metrics.clone();
        let shutdown_queue = shutdown.clone();
        join_set.spawn(async move {
            queue
                .run_sweeper(
                    queue_registry,
                    scheduler,
                    assignment,
                    queue_metrics,
                    queue_tick,
                    shutdown_queue,
                )
                .await;
            Ok(())
        });

        let params = self.params.clone();
        let shutdown_params = shutdown;
        join_set.spawn(async move {
            params.run(param_reload_interval, shutdown_params).await;
            Ok(())
        });
    }
}
