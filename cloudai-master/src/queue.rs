//! Task Queue & Dispatcher (C5), spec §4.5: an in-memory FIFO of queued
//! tasks plus a background sweeper that calls the scheduler (C6) and the
//! assignment lifecycle (C7) on each tick.

use crate::assignment::AssignmentLifecycle;
use crate::metrics::Metrics;
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;
use cloudai_common::error::CloudAiError;
use cloudai_common::model::{Task, TaskId, TaskStatus};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Bound on how many queue entries a single sweeper tick will examine, so a
/// very long queue cannot make one tick run unboundedly long.
const MAX_PER_TICK: usize = 256;

pub struct TaskQueue {
    pending: RwLock<VecDeque<Task>>,
}

impl TaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(TaskQueue {
            pending: RwLock::new(VecDeque::new()),
        })
    }

    pub async fn enqueue(&self, task: Task) {
        self.pending.write().await.push_back(task);
    }

    /// Removes a cancelled task from the queue, spec §5 "Queued tasks can
    /// be cancelled; they transition to cancelled and are removed from the
    /// queue."
    pub async fn remove(&self, task_id: TaskId) -> bool {
        let mut pending = self.pending.write().await;
        if let Some(pos) = pending.iter().position(|t| t.task_id == task_id) {
            pending.remove(pos);
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.pending.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    /// One sweeper tick, spec §4.5 steps 1-3. Tasks that cannot be placed
    /// stay at their position in the FIFO, carrying an updated last-error.
    pub async fn tick(
        &self,
        registry: &Arc<WorkerRegistry>,
        scheduler: &Scheduler,
        lifecycle: &AssignmentLifecycle,
        metrics: &Metrics,
    ) {
        let mut pending = self.pending.write().await;
        let n = pending.len().min(MAX_PER_TICK);
        let mut remaining: VecDeque<Task> = VecDeque::with_capacity(pending.len());

        for _ in 0..n {
            let Some(mut task) = pending.pop_front() else {
                break;
            };
            let snapshot = registry.snapshot().await;
            let tau = scheduler.tau_for(task.task_class).await;
            match scheduler.select_worker(&task, &snapshot, tau) {
                Some(worker_id) => match lifecycle.dispatch(&mut task, &worker_id).await {
                    Ok(()) => {
                        info!(task_id = %task.task_id, worker_id = %worker_id, "task dispatched");
                    }
                    Err(CloudAiError::InsufficientResources) => {
                        task.last_error = Some("InsufficientResources".into());
                        remaining.push_back(task);
                    }
                    Err(err) => {
                        warn!(task_id = %task.task_id, error = %err, "dispatch failed, requeueing");
                        task.last_error = Some(err.to_string());
                        remaining.push_back(task);
                    }
                },
                None => {
                    debug!(task_id = %task.task_id, "no eligible worker this tick");
                    metrics.scheduler_declines.inc();
                    remaining.push_back(task);
                }
            }
        }

        remaining.append(&mut pending);
        *pending = remaining;
    }

    /// Background sweeper task, spec §4.5 "single background sweeper ticks
    /// at a configurable interval".
    pub async fn run_sweeper(
        self: Arc<Self>,
        registry: Arc<WorkerRegistry>,
        scheduler: Arc<Scheduler>,
        lifecycle: Arc<AssignmentLifecycle>,
        metrics: Arc<Metrics>,
        period: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        info!("queue sweeper started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&registry, &scheduler, &lifecycle, &metrics).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("queue sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;
    use chrono::Utc;
    use cloudai_common::model::{ResourceVector, TaskClass};

    fn sample_task() -> Task {
        Task {
            task_id: TaskId::new(),
            image: "alpine".into(),
            command: None,
            requirements: ResourceVector {
                cpu: 1.0,
                memory: 1.0,
                storage: 1.0,
                gpu: 0.0,
            },
            user_id: "u1".into(),
            tag: None,
            k_value: 2.0,
            task_class: TaskClass::CpuLight,
            status: TaskStatus::Queued,
            arrival: Utc::now(),
            started: None,
            completed: None,
            deadline: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    async fn enqueue_and_remove_by_id() {
        let queue = TaskQueue::new();
        let task = sample_task();
        let task_id = task.task_id;
        queue.enqueue(task).await;
        assert_eq!(queue.len().await, 1);
        assert!(queue.remove(task_id).await);
        assert_eq!(queue.len().await, 0);
    }
}
