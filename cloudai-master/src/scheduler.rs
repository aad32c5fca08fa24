//! Scheduler (RTS) (C6), spec §4.6. Given a task and a worker snapshot plus
//! the current parameter tuple, picks a worker or declines. Pure function
//! of its inputs: no I/O, no mutation of registry state (spec §5 "The
//! scheduler reads a snapshot; it never mutates state.").

use crate::param_loader::ParamLoader;
use chrono::Utc;
use cloudai_common::model::{Task, TaskClass, Worker};
use std::sync::Arc;

/// Tolerance for a zero GPU-availability denominator, spec §4.6 step B.
const GPU_EPSILON: f64 = 1e-6;

pub struct Scheduler {
    tau_store: Arc<crate::tau_store::TauStore>,
    params: Arc<ParamLoader>,
}

impl Scheduler {
    pub fn new(tau_store: Arc<crate::tau_store::TauStore>, params: Arc<ParamLoader>) -> Self {
        Scheduler { tau_store, params }
    }

    /// Synchronous selection over a worker snapshot: spec §4.6 steps A-E.
    /// τ is read synchronously via a blocking read on the async lock inside
    /// `tau_at` to keep this call a pure, non-async function as required by
    /// "given the same snapshot and parameters, scheduling is a pure
    /// function" (§4.6 Determinism).
    pub fn select_worker(&self, task: &Task, workers: &[Worker], tau: f64) -> Option<String> {
        let params = self.params.current();
        let now = Utc::now();

        let mut best: Option<(String, f64)> = None;
        for worker in workers {
            if !is_eligible(worker, task) {
                continue;
            }
            let load = worker.normalized_load();
            let e_hat = expected_runtime(tau, task, worker, &params, load);
            let f_hat_seconds = e_hat;
            let deadline_seconds_from_now =
                (task.deadline - now).num_milliseconds() as f64 / 1000.0;
            let delta = (f_hat_seconds - deadline_seconds_from_now).max(0.0);
            let r_base = params.alpha * delta + params.beta * load;
            let affinity = params.affinity_for(task.task_class, &worker.worker_id.0);
            let penalty = params.penalty_for(&worker.worker_id.0);
            let r_final = r_base - affinity + penalty;

            best = match best {
                None => Some((worker.worker_id.0.clone(), r_final)),
                Some((ref best_id, best_score)) => {
                    if r_final < best_score
                        || (r_final == best_score && worker.worker_id.0 < *best_id)
                    {
                        Some((worker.worker_id.0.clone(), r_final))
                    } else {
                        best
                    }
                }
            };
        }
        best.map(|(worker_id, _)| worker_id)
    }

    pub async fn tau_for(&self, class: TaskClass) -> f64 {
        self.tau_store.get_tau(class).await
    }
}

/// Step A: a worker is eligible iff active, has a non-empty endpoint, and
/// its `available` dominates the task's requirements.
fn is_eligible(worker: &Worker, task: &Task) -> bool {
    worker.active && !worker.endpoint.is_empty() && worker.available.dominates(&task.requirements)
}

/// Step B: EDD-style expected runtime.
fn expected_runtime(
    tau: f64,
    task: &Task,
    worker: &Worker,
    params: &crate::param_loader::SchedulerParams,
    load: f64,
) -> f64 {
    let cpu_term = if worker.available.cpu > 0.0 {
        params.theta1 * task.requirements.cpu / worker.available.cpu
    } else {
        0.0
    };
    let mem_term = if worker.available.memory > 0.0 {
        params.theta2 * task.requirements.memory / worker.available.memory
    } else {
        0.0
    };
    let gpu_term = params.theta3 * task.requirements.gpu / worker.available.gpu.max(GPU_EPSILON);
    let load_term = params.theta4 * load;

    tau * (1.0 + cpu_term + mem_term + gpu_term + load_term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_loader::{ParamLoader, SchedulerParams};
    use chrono::Duration as ChronoDuration;
    use cloudai_common::model::{ResourceVector, TaskId, TaskStatus, UsageSnapshot, WorkerId};
    use std::collections::HashMap;
    use test_r::test;

    fn worker(id: &str, cpu: f64, memory: f64, usage_cpu: f64) -> Worker {
        Worker {
            worker_id: WorkerId(id.to_string()),
            endpoint: format!("{id}:9000"),
            capacity: ResourceVector {
                cpu,
                memory,
                storage: 100.0,
                gpu: 0.0,
            },
            allocated: ResourceVector::ZERO,
            available: ResourceVector {
                cpu,
                memory,
                storage: 100.0,
                gpu: 0.0,
            },
            authorized: true,
            active: true,
            last_heartbeat: Utc::now(),
            latest_usage: UsageSnapshot {
                cpu: usage_cpu,
                memory: 0.0,
                gpu: 0.0,
            },
            running_tasks: Default::default(),
        }
    }

    fn task(cpu: f64, memory: f64) -> Task {
        Task {
            task_id: TaskId::new(),
            image: "alpine".into(),
            command: None,
            requirements: ResourceVector {
                cpu,
                memory,
                storage: 1.0,
                gpu: 0.0,
            },
            user_id: "u1".into(),
            tag: None,
            k_value: 2.0,
            task_class: TaskClass::CpuHeavy,
            status: TaskStatus::Queued,
            arrival: Utc::now(),
            started: None,
            completed: None,
            deadline: Utc::now() + ChronoDuration::seconds(30),
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn declines_when_no_worker_is_eligible() {
        let params = ParamLoader::with_default();
        let tau_store = crate::tau_store::TauStore::new(0.2);
        let scheduler = Scheduler::new(tau_store, params);
        let task = task(100.0, 4.0);
        let snapshot = vec![worker("w1", 4.0, 8.0, 0.0)];
        assert_eq!(scheduler.select_worker(&task, &snapshot, 15.0), None);
    }

    #[test]
    fn picks_lower_load_worker_when_tied_otherwise() {
        let params = ParamLoader::with_default();
        let tau_store = crate::tau_store::TauStore::new(0.2);
        let scheduler = Scheduler::new(tau_store, params);
        let task = task(2.0, 4.0);
        let snapshot = vec![worker("w_a", 8.0, 16.0, 0.9), worker("w_b", 8.0, 16.0, 0.1)];
        let chosen = scheduler.select_worker(&task, &snapshot, 15.0).unwrap();
        assert_eq!(chosen, "w_b");
    }

    #[test]
    fn affinity_overrides_raw_availability() {
        let mut affinity = HashMap::new();
        let mut per_worker = HashMap::new();
        per_worker.insert("w_a".to_string(), 10.0);
        affinity.insert(TaskClass::GpuInference, per_worker);
        let params = SchedulerParams {
            affinity,
            ..SchedulerParams::default()
        };
        let loader = ParamLoader::with_params(params);
        let tau_store = crate::tau_store::TauStore::new(0.2);
        let scheduler = Scheduler::new(tau_store, loader);
        let mut task = task(2.0, 4.0);
        task.task_class = TaskClass::GpuInference;
        let snapshot = vec![worker("w_a", 8.0, 16.0, 0.0), worker("w_b", 8.0, 16.0, 0.0)];
        let chosen = scheduler.select_worker(&task, &snapshot, 10.0).unwrap();
        assert_eq!(chosen, "w_a");
    }

    #[test]
    fn ties_break_by_worker_id_lexicographic_order() {
        let params = ParamLoader::with_default();
        let tau_store = crate::tau_store::TauStore::new(0.2);
        let scheduler = Scheduler::new(tau_store, params);
        let task = task(2.0, 4.0);
        let snapshot = vec![worker("w_z", 8.0, 16.0, 0.0), worker("w_a", 8.0, 16.0, 0.0)];
        let chosen = scheduler.select_worker(&task, &snapshot, 10.0).unwrap();
        assert_eq!(chosen, "w_a");
    }

    #[test]
    fn selection_is_deterministic_given_same_inputs() {
        let params = ParamLoader::with_default();
        let tau_store = crate::tau_store::TauStore::new(0.2);
        let scheduler = Scheduler::new(tau_store, params);
        let task = task(2.0, 4.0);
        let snapshot = vec![worker("w_a", 8.0, 16.0, 0.3), worker("w_b", 8.0, 16.0, 0.6)];
        let first = scheduler.select_worker(&task, &snapshot, 15.0);
        let second = scheduler.select_worker(&task, &snapshot, 15.0);
        assert_eq!(first, second);
    }
}
