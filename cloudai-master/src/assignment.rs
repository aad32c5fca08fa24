//! Assignment Lifecycle (C7), spec §4.7: capacity allocation, dispatch to
//! the worker, completion reconciliation, τ feedback, SLA verdict.

use crate::metrics::Metrics;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::store::TaskStore;
use crate::tau_store::TauStore;
use async_trait::async_trait;
use chrono::Utc;
use cloudai_common::error::CloudAiError;
use cloudai_common::model::{
    Assignment, AssignmentId, Task, TaskId, TaskOutcome, TaskResult, TaskStatus, WorkerId,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Outbound RPC surface to a worker, spec §6 `AssignTask`/`CancelTask`.
/// Abstracted behind a trait so the dispatch/reconcile/cancel logic can be
/// exercised without a live gRPC transport, the way the teacher tests its
/// service layer against trait objects rather than concrete clients.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn assign_task(&self, worker_endpoint: &str, task: &Task) -> Result<(), CloudAiError>;
    async fn cancel_task(&self, worker_endpoint: &str, task_id: TaskId) -> Result<(), CloudAiError>;
}

pub struct AssignmentLifecycle {
    registry: Arc<WorkerRegistry>,
    queue: Arc<TaskQueue>,
    tau_store: Arc<TauStore>,
    transport: Arc<dyn WorkerTransport>,
    store: Arc<TaskStore>,
    metrics: Arc<Metrics>,
}

impl AssignmentLifecycle {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        queue: Arc<TaskQueue>,
        tau_store: Arc<TauStore>,
        transport: Arc<dyn WorkerTransport>,
        store: Arc<TaskStore>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(AssignmentLifecycle {
            registry,
            queue,
            tau_store,
            transport,
            store,
            metrics,
        })
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.store.get_task(task_id).await
    }

    pub async fn get_assignment(&self, task_id: TaskId) -> Option<Assignment> {
        self.store.get_assignment(task_id).await
    }

    pub async fn list_tasks(&self, status_filter: Option<TaskStatus>) -> Vec<Task> {
        self.store.list_tasks(status_filter).await
    }

    /// Spec §4.7 `Dispatch`, steps 1-5. The task was already persisted in
    /// `queued` status by admission (C4); this transitions it in place.
    pub async fn dispatch(&self, task: &mut Task, worker_id: &str) -> Result<(), CloudAiError> {
        let worker_id = WorkerId(worker_id.to_string());
        self.registry
            .allocate(&worker_id, &task.requirements, task.task_id)
            .await?;

        let worker = self
            .registry
            .get(&worker_id)
            .await
            .ok_or_else(|| CloudAiError::NotFound(worker_id.to_string()))?;
        let load_at_start = worker.normalized_load();

        task.status = TaskStatus::Running;
        task.started = Some(Utc::now());

        let assignment = Assignment {
            assignment_id: AssignmentId::new(),
            task_id: task.task_id,
            worker_id: worker_id.clone(),
            assigned_at: Utc::now(),
            load_at_start,
            sla_success: None,
        };

        if let Err(err) = self.transport.assign_task(&worker.endpoint, task).await {
            // Transport failure: roll back allocation, requeue, do not fail the task.
            self.registry
                .release(&worker_id, &task.requirements, task.task_id)
                .await;
            task.status = TaskStatus::Queued;
            task.started = None;
            task.last_error = Some(err.to_string());
            self.store.insert_task(task.clone()).await;
            self.queue.enqueue(task.clone()).await;
            warn!(task_id = %task.task_id, worker_id = %worker_id, error = %err, "dispatch transport failure, rolled back");
            return Err(err);
        }

        self.store.insert_task(task.clone()).await;
        self.store.upsert_assignment(assignment).await;
        self.metrics.tasks_dispatched.inc();
        Ok(())
    }

    /// Spec §4.7 `Reconcile`, steps 1-6. Idempotent: a duplicate report for
    /// an already-terminal task is a no-op.
    pub async fn reconcile(&self, result: TaskResult) {
        let Some(task) = self.store.get_task(result.task_id).await else {
            warn!(task_id = %result.task_id, "reconcile for unknown task, ignoring");
            return;
        };
        if matches!(
            task.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        ) {
            info!(task_id = %task.task_id, "duplicate completion report, ignoring");
            return;
        }

        let actual_runtime = task
            .started
            .map(|s| (result.completed_at - s).num_milliseconds() as f64 / 1000.0);

        self.registry
            .release(&result.worker_id, &task.requirements, task.task_id)
            .await;

        let new_status = match result.outcome {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        };
        let completed_at = result.completed_at;
        self.store
            .update_task(task.task_id, |t| {
                t.status = new_status;
                t.completed = Some(completed_at);
            })
            .await;
        self.store.insert_result(result).await;

        match new_status {
            TaskStatus::Completed => {
                self.metrics.tasks_completed.inc();
                let sla_success = completed_at <= task.deadline;
                if !sla_success {
                    self.metrics.sla_misses.inc();
                }
                self.store
                    .update_assignment(task.task_id, |a| a.sla_success = Some(sla_success))
                    .await;
                if let Some(actual_runtime) = actual_runtime {
                    self.tau_store
                        .update_tau(task.task_class, actual_runtime)
                        .await;
                }
            }
            TaskStatus::Failed => {
                self.metrics.tasks_failed.inc();
            }
            _ => {}
        }
    }

    /// Spec §4.7 `Cancel`, steps 1-3. Marks the task cancelled in the store
    /// before contacting the worker, so intent is persisted even if the RPC
    /// hangs or the worker is unreachable.
    pub async fn cancel(&self, task_id: TaskId) -> Result<(), CloudAiError> {
        let still_queued = self.queue.remove(task_id).await;

        let updated = self
            .store
            .update_task(task_id, |t| t.status = TaskStatus::Cancelled)
            .await
            .ok_or_else(|| CloudAiError::NotFound(task_id.to_string()))?;

        if still_queued {
            return Ok(());
        }

        let Some(assignment) = self.store.get_assignment(task_id).await else {
            return Ok(());
        };
        let Some(worker) = self.registry.get(&assignment.worker_id).await else {
            return Ok(());
        };

        match self.transport.cancel_task(&worker.endpoint, task_id).await {
            Ok(()) => {
                self.registry
                    .release(&assignment.worker_id, &updated.requirements, task_id)
                    .await;
                Ok(())
            }
            Err(err) => {
                warn!(task_id = %task_id, worker_id = %assignment.worker_id, error = %err, "cancel RPC failed, leaving cancellation persisted for reconciliation");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;
    use cloudai_common::model::{ResourceVector, TaskClass};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockTransport {
        assign_calls: AtomicUsize,
        fail_assign: bool,
    }

    #[async_trait]
    impl WorkerTransport for MockTransport {
        async fn assign_task(&self, _endpoint: &str, _task: &Task) -> Result<(), CloudAiError> {
            self.assign_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_assign {
                Err(CloudAiError::WorkerUnreachable("down".into()))
            } else {
                Ok(())
            }
        }
        async fn cancel_task(&self, _endpoint: &str, _task_id: TaskId) -> Result<(), CloudAiError> {
            Ok(())
        }
    }

    fn req() -> ResourceVector {
        ResourceVector {
            cpu: 2.0,
            memory: 4.0,
            storage: 1.0,
            gpu: 0.0,
        }
    }

    fn sample_task() -> Task {
        Task {
            task_id: TaskId::new(),
            image: "alpine".into(),
            command: None,
            requirements: req(),
            user_id: "u1".into(),
            tag: None,
            k_value: 2.0,
            task_class: TaskClass::CpuHeavy,
            status: TaskStatus::Queued,
            arrival: Utc::now(),
            started: None,
            completed: None,
            deadline: Utc::now() + chrono::Duration::seconds(30),
            retry_count: 0,
            last_error: None,
        }
    }

    async fn setup(fail_assign: bool) -> (Arc<AssignmentLifecycle>, WorkerId) {
        let registry = WorkerRegistry::new(Duration::from_secs(30), None);
        let worker_id = WorkerId("w1".into());
        registry
            .pre_authorize(worker_id.clone(), "w1:9000".into())
            .await
            .unwrap();
        registry
            .handle_registration_handshake(
                worker_id.clone(),
                None,
                ResourceVector {
                    cpu: 8.0,
                    memory: 16.0,
                    storage: 100.0,
                    gpu: 0.0,
                },
            )
            .await
            .unwrap();
        let queue = TaskQueue::new();
        let tau_store = TauStore::new(0.2);
        let store = TaskStore::new(None);
        let transport = Arc::new(MockTransport {
            assign_calls: AtomicUsize::new(0),
            fail_assign,
        });
        let metrics = Metrics::new(&prometheus::Registry::new()).unwrap();
        let lifecycle =
            AssignmentLifecycle::new(registry, queue, tau_store, transport, store, metrics);
        (lifecycle, worker_id)
    }

    /// Mirrors what admission (C4) does before handing a task to the
    /// sweeper: persist it in `queued` status so it is retrievable.
    async fn admit(lifecycle: &AssignmentLifecycle, task: &Task) {
        lifecycle.store.insert_task(task.clone()).await;
    }

    #[test]
    async fn dispatch_allocates_and_marks_running() {
        let (lifecycle, worker_id) = setup(false).await;
        let mut task = sample_task();
        admit(&lifecycle, &task).await;
        lifecycle.dispatch(&mut task, &worker_id.0).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(lifecycle.get_assignment(task.task_id).await.is_some());
    }

    #[test]
    async fn dispatch_rolls_back_on_transport_failure() {
        let (lifecycle, worker_id) = setup(true).await;
        let mut task = sample_task();
        admit(&lifecycle, &task).await;
        let err = lifecycle.dispatch(&mut task, &worker_id.0).await.unwrap_err();
        assert!(matches!(err, CloudAiError::WorkerUnreachable(_)));
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(lifecycle.queue.len().await, 1);
    }

    #[test]
    async fn reconcile_is_idempotent_for_terminal_tasks() {
        let (lifecycle, worker_id) = setup(false).await;
        let mut task = sample_task();
        let task_id = task.task_id;
        admit(&lifecycle, &task).await;
        lifecycle.dispatch(&mut task, &worker_id.0).await.unwrap();

        let result = TaskResult {
            task_id,
            worker_id: worker_id.clone(),
            outcome: TaskOutcome::Completed,
            logs: "done".into(),
            completed_at: Utc::now(),
        };
        lifecycle.reconcile(result.clone()).await;
        let after_first = lifecycle.get_task(task_id).await.unwrap();
        assert_eq!(after_first.status, TaskStatus::Completed);

        lifecycle.reconcile(result).await;
        let after_second = lifecycle.get_task(task_id).await.unwrap();
        assert_eq!(after_second.status, TaskStatus::Completed);
    }

    #[test]
    async fn reconcile_unknown_task_is_ignored() {
        let (lifecycle, worker_id) = setup(false).await;
        let result = TaskResult {
            task_id: TaskId::new(),
            worker_id,
            outcome: TaskOutcome::Completed,
            logs: String::new(),
            completed_at: Utc::now(),
        };
        lifecycle.reconcile(result).await;
    }

    #[test]
    async fn sla_miss_is_recorded() {
        let (lifecycle, worker_id) = setup(false).await;
        let mut task = sample_task();
        task.deadline = task.arrival + chrono::Duration::seconds(10);
        let task_id = task.task_id;
        admit(&lifecycle, &task).await;
        lifecycle.dispatch(&mut task, &worker_id.0).await.unwrap();

        let completed_at = task.arrival + chrono::Duration::seconds(25);
        let result = TaskResult {
            task_id,
            worker_id,
            outcome: TaskOutcome::Completed,
            logs: String::new(),
            completed_at,
        };
        lifecycle.reconcile(result).await;
        let assignment = lifecycle.get_assignment(task_id).await.unwrap();
        assert_eq!(assignment.sla_success, Some(false));
    }

    #[test]
    async fn cancel_queued_task_marks_cancelled_without_rpc() {
        let (lifecycle, _worker_id) = setup(false).await;
        let task = sample_task();
        let task_id = task.task_id;
        admit(&lifecycle, &task).await;
        lifecycle.queue.enqueue(task).await;
        lifecycle.cancel(task_id).await.unwrap();
        let after = lifecycle.get_task(task_id).await.unwrap();
        assert_eq!(after.status, TaskStatus::Cancelled);
    }
}
