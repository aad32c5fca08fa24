//! Worker Registry (C1): the authoritative map of workers, their capacities
//! and resource accounting. Concurrency model mirrors §4.1: one
//! reader/writer lock guards the whole map; `Allocate`/`Release`/the
//! liveness flip all take the write lock so no two callers can interleave
//! arithmetic on the same worker.

use crate::store::mongo::MongoMirror;
use chrono::Utc;
use cloudai_common::error::CloudAiError;
use cloudai_common::model::{ResourceVector, TaskId, UsageSnapshot, Worker, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Worker>>,
    inactivity_timeout: Duration,
    mirror: Option<Arc<MongoMirror>>,
}

impl WorkerRegistry {
    pub fn new(inactivity_timeout: Duration, mirror: Option<Arc<MongoMirror>>) -> Arc<Self> {
        Arc::new(WorkerRegistry {
            workers: RwLock::new(HashMap::new()),
            inactivity_timeout,
            mirror,
        })
    }

    async fn mirror_upsert(&self, worker: &Worker) {
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.upsert_worker(worker).await {
                warn!(worker_id = %worker.worker_id, error = %err, "worker mirror write failed");
            }
        }
    }

    /// Rehydrates the registry from the persistent mirror on startup (spec
    /// §3): workers come back `authorized` but with `active` forced to
    /// `false` until a fresh heartbeat arrives, matching §4.1's framing that
    /// only a live heartbeat can mark a worker active.
    pub async fn rehydrate(&self) -> Result<(), String> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };
        let persisted = mirror
            .list_workers()
            .await
            .map_err(|err| err.to_string())?;
        let mut workers = self.workers.write().await;
        for mut worker in persisted {
            worker.active = false;
            info!(worker_id = %worker.worker_id, "rehydrated worker from mirror");
            workers.insert(worker.worker_id.clone(), worker);
        }
        Ok(())
    }

    /// Registers an inactive, authorized worker. Spec §4.1 `PreAuthorize`.
    pub async fn pre_authorize(
        &self,
        worker_id: WorkerId,
        endpoint: String,
    ) -> Result<(), CloudAiError> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&worker_id) {
            return Err(CloudAiError::AlreadyRegistered);
        }
        let worker = Worker::pre_authorized(worker_id.clone(), endpoint, Utc::now());
        workers.insert(worker_id.clone(), worker.clone());
        drop(workers);
        info!(worker_id = %worker_id, "pre-authorized worker");
        self.mirror_upsert(&worker).await;
        Ok(())
    }

    /// Spec §4.1 `RevokeAndUnregister`.
    pub async fn revoke_and_unregister(&self, worker_id: &WorkerId) -> Result<(), CloudAiError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get(worker_id)
            .ok_or_else(|| CloudAiError::NotFound(worker_id.to_string()))?;
        if !worker.running_tasks.is_empty() {
            return Err(CloudAiError::HasRunningTasks);
        }
        workers.remove(worker_id);
        drop(workers);
        info!(worker_id = %worker_id, "unregistered worker");
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.delete_worker(worker_id).await {
                warn!(worker_id = %worker_id, error = %err, "worker mirror delete failed");
            }
        }
        Ok(())
    }

    /// Spec §4.1 `HandleRegistrationHandshake`: worker -> master register RPC.
    pub async fn handle_registration_handshake(
        &self,
        worker_id: WorkerId,
        endpoint: Option<String>,
        capacity: ResourceVector,
    ) -> Result<(), CloudAiError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(&worker_id)
            .ok_or(CloudAiError::Unauthorized)?;
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            worker.endpoint = endpoint;
        }
        worker.capacity = capacity;
        worker.active = true;
        worker.last_heartbeat = Utc::now();
        worker.recompute_available();
        let updated = worker.clone();
        drop(workers);
        info!(worker_id = %worker_id, "worker registration handshake complete");
        self.mirror_upsert(&updated).await;
        Ok(())
    }

    /// Spec §4.1 `Heartbeat`.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        usage: UsageSnapshot,
        running_task_ids: Vec<TaskId>,
    ) -> Result<(), CloudAiError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| CloudAiError::NotFound(worker_id.to_string()))?;
        worker.last_heartbeat = Utc::now();
        worker.latest_usage = usage;
        worker.active = true;
        worker.running_tasks = running_task_ids.into_iter().collect();
        Ok(())
    }

    /// Spec §4.1 `Allocate`: atomic arithmetic on `{allocated, available}`.
    pub async fn allocate(
        &self,
        worker_id: &WorkerId,
        req: &ResourceVector,
        task_id: TaskId,
    ) -> Result<(), CloudAiError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| CloudAiError::NotFound(worker_id.to_string()))?;
        if !worker.available.dominates(req) {
            return Err(CloudAiError::InsufficientResources);
        }
        worker.allocated = worker.allocated.add(req);
        worker.recompute_available();
        worker.running_tasks.insert(task_id);
        Ok(())
    }

    /// Spec §4.1 `Release`: clamps each component at zero, idempotent.
    pub async fn release(&self, worker_id: &WorkerId, req: &ResourceVector, task_id: TaskId) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.allocated = worker.allocated.saturating_sub(req);
            worker.recompute_available();
            worker.running_tasks.remove(&task_id);
        }
    }

    /// Spec §4.1 `Snapshot`: a deep copy view for schedulers and readers.
    pub async fn snapshot(&self) -> Vec<Worker> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn get(&self, worker_id: &WorkerId) -> Option<Worker> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Background liveness watcher, spec §4.1: runs every
    /// `inactivity_timeout/2`, flips `active=false` on stale workers. Never
    /// removes state.
    pub async fn run_liveness_watcher(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let tick = self.inactivity_timeout / 2;
        let mut interval = tokio::time::interval(tick.max(Duration::from_millis(1)));
        info!("liveness watcher started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_inactive().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("liveness watcher stopped");
    }

    async fn sweep_inactive(&self) {
        let now = Utc::now();
        let mut workers = self.workers.write().await;
        for worker in workers.values_mut() {
            if worker.active {
                let age = now.signed_duration_since(worker.last_heartbeat);
                if age.to_std().unwrap_or(Duration::ZERO) > self.inactivity_timeout {
                    worker.active = false;
                    warn!(worker_id = %worker.worker_id, "worker flagged inactive");
                } else {
                    debug!(worker_id = %worker.worker_id, "worker still alive");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn cap(cpu: f64, memory: f64) -> ResourceVector {
        ResourceVector {
            cpu,
            memory,
            storage: 100.0,
            gpu: 0.0,
        }
    }

    #[test]
    async fn pre_authorize_twice_fails() {
        let registry = WorkerRegistry::new(Duration::from_secs(30), None);
        registry
            .pre_authorize(WorkerId("w1".into()), "h:1".into())
            .await
            .unwrap();
        let err = registry
            .pre_authorize(WorkerId("w1".into()), "h:1".into())
            .await
            .unwrap_err();
        assert_eq!(err, CloudAiError::AlreadyRegistered);
    }

    #[test]
    async fn unauthorized_handshake_rejected() {
        let registry = WorkerRegistry::new(Duration::from_secs(30), None);
        let err = registry
            .handle_registration_handshake(WorkerId("rogue".into()), None, cap(4.0, 8.0))
            .await
            .unwrap_err();
        assert_eq!(err, CloudAiError::Unauthorized);
        assert!(registry.get(&WorkerId("rogue".into())).await.is_none());
    }

    #[test]
    async fn allocate_then_release_restores_availability() {
        let registry = WorkerRegistry::new(Duration::from_secs(30), None);
        let worker_id = WorkerId("w1".into());
        registry
            .pre_authorize(worker_id.clone(), "h:1".into())
            .await
            .unwrap();
        registry
            .handle_registration_handshake(worker_id.clone(), None, cap(4.0, 8.0))
            .await
            .unwrap();

        let req = cap(2.0, 4.0);
        let task_id = TaskId::new();
        registry.allocate(&worker_id, &req, task_id).await.unwrap();
        let after_alloc = registry.get(&worker_id).await.unwrap();
        assert_eq!(after_alloc.available.cpu, 2.0);

        registry.release(&worker_id, &req, task_id).await;
        let after_release = registry.get(&worker_id).await.unwrap();
        assert_eq!(after_release.available, after_release.capacity);
    }

    #[test]
    async fn allocate_beyond_availability_fails() {
        let registry = WorkerRegistry::new(Duration::from_secs(30), None);
        let worker_id = WorkerId("w1".into());
        registry
            .pre_authorize(worker_id.clone(), "h:1".into())
            .await
            .unwrap();
        registry
            .handle_registration_handshake(worker_id.clone(), None, cap(4.0, 8.0))
            .await
            .unwrap();
        let err = registry
            .allocate(&worker_id, &cap(8.0, 8.0), TaskId::new())
            .await
            .unwrap_err();
        assert_eq!(err, CloudAiError::InsufficientResources);
    }
}
