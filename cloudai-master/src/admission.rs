//! Task Admission & SLA Stamping (C4), spec §4.4. `submit` is the sole
//! admission entry point: validates the submission, resolves the task
//! class, stamps arrival/deadline, and hands the task to the queue.

use crate::metrics::Metrics;
use crate::queue::TaskQueue;
use crate::store::TaskStore;
use crate::tau_store::TauStore;
use chrono::Utc;
use cloudai_common::error::CloudAiError;
use cloudai_common::model::{ResourceVector, Task, TaskClass, TaskId, TaskStatus};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub image: String,
    pub command: Option<String>,
    pub cpu_required: f64,
    pub memory_required: f64,
    pub storage_required: Option<f64>,
    pub gpu_required: Option<f64>,
    pub user_id: String,
    pub tag: Option<String>,
    pub k_value: Option<f64>,
    pub task_class: Option<String>,
}

pub struct AdmissionController {
    tau_store: Arc<TauStore>,
    queue: Arc<TaskQueue>,
    store: Arc<TaskStore>,
    default_k: f64,
    metrics: Arc<Metrics>,
}

impl AdmissionController {
    pub fn new(
        tau_store: Arc<TauStore>,
        queue: Arc<TaskQueue>,
        store: Arc<TaskStore>,
        default_k: f64,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(AdmissionController {
            tau_store,
            queue,
            store,
            default_k,
            metrics,
        })
    }

    /// Spec §4.4 `SubmitTask`, steps 1-9.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, CloudAiError> {
        if spec.image.is_empty() {
            return Err(CloudAiError::InvalidSubmission("image is required".into()));
        }
        if spec.cpu_required <= 0.0 || spec.memory_required <= 0.0 {
            return Err(CloudAiError::InvalidSubmission(
                "cpu and memory requirements must be positive".into(),
            ));
        }
        let requirements = ResourceVector {
            cpu: spec.cpu_required,
            memory: spec.memory_required,
            storage: spec.storage_required.unwrap_or(1.0),
            gpu: spec.gpu_required.unwrap_or(0.0),
        };

        let task_class = match &spec.task_class {
            Some(raw) => TaskClass::parse(raw)
                .ok_or_else(|| CloudAiError::InvalidSubmission(format!("unknown task_class '{raw}'")))?,
            None => infer_task_class(&requirements),
        };

        let k_value = match spec.k_value {
            Some(k) if !(1.5..=2.5).contains(&k) => {
                return Err(CloudAiError::InvalidSubmission(
                    "k_value must lie in [1.5, 2.5]".into(),
                ))
            }
            Some(k) => k,
            None => self.default_k,
        };

        let task_id = TaskId::new();
        let arrival = Utc::now();
        let tau = self.tau_store.get_tau(task_class).await;
        let deadline = arrival + chrono::Duration::milliseconds((k_value * tau * 1000.0) as i64);

        let task = Task {
            task_id,
            image: spec.image,
            command: spec.command,
            requirements,
            user_id: spec.user_id,
            tag: spec.tag,
            k_value,
            task_class,
            status: TaskStatus::Queued,
            arrival,
            started: None,
            completed: None,
            deadline,
            retry_count: 0,
            last_error: None,
        };

        info!(task_id = %task_id, class = %task_class, "task admitted");
        self.store.insert_task(task.clone()).await;
        self.queue.enqueue(task).await;
        self.metrics.tasks_admitted.inc();
        Ok(task_id)
    }
}

/// Spec §4.4 step 3 inference rules, evaluated in priority order (a)-(e).
fn infer_task_class(req: &ResourceVector) -> TaskClass {
    if req.gpu > 0.0 {
        return if req.cpu >= 4.0 {
            TaskClass::GpuTraining
        } else {
            TaskClass::GpuInference
        };
    }
    if req.memory >= 16.0 {
        return TaskClass::MemoryHeavy;
    }
    if req.cpu >= 4.0 {
        return TaskClass::CpuHeavy;
    }
    if req.cpu <= 1.0 && req.memory <= 2.0 {
        return TaskClass::CpuLight;
    }
    TaskClass::Mixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn req(cpu: f64, memory: f64, gpu: f64) -> ResourceVector {
        ResourceVector {
            cpu,
            memory,
            storage: 1.0,
            gpu,
        }
    }

    #[test]
    fn infers_gpu_training_above_cpu_threshold() {
        assert_eq!(infer_task_class(&req(4.0, 8.0, 1.0)), TaskClass::GpuTraining);
        assert_eq!(infer_task_class(&req(2.0, 8.0, 1.0)), TaskClass::GpuInference);
    }

    #[test]
    fn infers_memory_heavy_before_cpu_heavy() {
        assert_eq!(infer_task_class(&req(4.0, 16.0, 0.0)), TaskClass::MemoryHeavy);
    }

    #[test]
    fn infers_cpu_light_for_small_requests() {
        assert_eq!(infer_task_class(&req(1.0, 2.0, 0.0)), TaskClass::CpuLight);
    }

    #[test]
    fn infers_mixed_as_fallback() {
        assert_eq!(infer_task_class(&req(2.0, 4.0, 0.0)), TaskClass::Mixed);
    }

    #[test]
    async fn submit_rejects_out_of_range_k_value() {
        let tau_store = TauStore::new(0.2);
        let queue = TaskQueue::new();
        let store = TaskStore::new(None);
        let metrics = Metrics::new(&prometheus::Registry::new()).unwrap();
        let controller = AdmissionController::new(tau_store, queue, store, 2.0, metrics);
        let spec = TaskSpec {
            image: "alpine".into(),
            command: None,
            cpu_required: 1.0,
            memory_required: 1.0,
            storage_required: None,
            gpu_required: None,
            user_id: "u1".into(),
            tag: None,
            k_value: Some(3.0),
            task_class: None,
        };
        let err = controller.submit(spec).await.unwrap_err();
        assert_eq!(
            err,
            CloudAiError::InvalidSubmission("k_value must lie in [1.5, 2.5]".into())
        );
    }

    #[test]
    async fn submit_stamps_deadline_from_k_and_tau() {
        let tau_store = TauStore::new(0.2);
        let queue = TaskQueue::new();
        let store = TaskStore::new(None);
        let metrics = Metrics::new(&prometheus::Registry::new()).unwrap();
        let controller =
            AdmissionController::new(tau_store.clone(), queue.clone(), store, 2.0, metrics);
        let spec = TaskSpec {
            image: "alpine".into(),
            command: None,
            cpu_required: 2.0,
            memory_required: 4.0,
            storage_required: None,
            gpu_required: None,
            user_id: "u1".into(),
            tag: None,
            k_value: Some(2.0),
            task_class: Some("cpu-heavy".into()),
        };
        controller.submit(spec).await.unwrap();
        let tasks = queue.snapshot().await;
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        let slack = task.deadline - task.arrival;
        assert!((slack.num_milliseconds() - 30_000).abs() < 50);
    }
}
