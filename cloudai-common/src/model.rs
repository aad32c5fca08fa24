//! The CloudAI data model (spec §3): workers, tasks, assignments and the
//! closed set of task classes the scheduler and τ-store reason about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use uuid::Uuid;

/// Stable worker identity, assigned by the operator at pre-authorization
/// time (spec §4.1). Not a `Uuid` on purpose: operators choose it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        WorkerId(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        AssignmentId(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

/// `{cpu, memory, storage, gpu}`, spec §3. Used both for worker
/// capacity/allocated/available and for task requirements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
    pub gpu: f64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        cpu: 0.0,
        memory: 0.0,
        storage: 0.0,
        gpu: 0.0,
    };

    /// Component-wise `self - other`, never going below zero (spec §4.1
    /// `Release` "clamps each component at zero as a safety floor").
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory: (self.memory - other.memory).max(0.0),
            storage: (self.storage - other.storage).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
        }
    }

    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu + other.cpu,
            memory: self.memory + other.memory,
            storage: self.storage + other.storage,
            gpu: self.gpu + other.gpu,
        }
    }

    /// True iff `self` has at least as much of every resource as `other`.
    pub fn dominates(&self, other: &ResourceVector) -> bool {
        self.cpu >= other.cpu
            && self.memory >= other.memory
            && self.storage >= other.storage
            && self.gpu >= other.gpu
    }
}

/// Most recent heartbeat usage fractions, spec §3 `latest_usage`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
}

impl UsageSnapshot {
    pub const ZERO: UsageSnapshot = UsageSnapshot {
        cpu: 0.0,
        memory: 0.0,
        gpu: 0.0,
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub worker_id: WorkerId,
    pub endpoint: String,
    pub capacity: ResourceVector,
    pub allocated: ResourceVector,
    pub available: ResourceVector,
    pub authorized: bool,
    pub active: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub latest_usage: UsageSnapshot,
    pub running_tasks: HashSet<TaskId>,
}

impl Worker {
    /// A pre-authorized, inactive worker with no capacity yet reported.
    pub fn pre_authorized(worker_id: WorkerId, endpoint: String, now: DateTime<Utc>) -> Self {
        Worker {
            worker_id,
            endpoint,
            capacity: ResourceVector::ZERO,
            allocated: ResourceVector::ZERO,
            available: ResourceVector::ZERO,
            authorized: true,
            active: false,
            last_heartbeat: now,
            latest_usage: UsageSnapshot::ZERO,
            running_tasks: HashSet::new(),
        }
    }

    /// Recomputes `available` from `capacity` and `allocated`, the single
    /// place this arithmetic happens (spec §3 invariant).
    pub fn recompute_available(&mut self) {
        self.available = self.capacity.saturating_sub(&self.allocated);
    }

    /// Weighted load normalization, spec §4.6: memory weight ÷10, GPU ×2.
    pub fn normalized_load(&self) -> f64 {
        let cpu_term = self.capacity.cpu * self.latest_usage.cpu;
        let mem_term = (self.capacity.memory * self.latest_usage.memory) / 10.0;
        let gpu_term = self.capacity.gpu * self.latest_usage.gpu * 2.0;
        let weight_sum = self.capacity.cpu + self.capacity.memory / 10.0 + self.capacity.gpu * 2.0;
        if weight_sum <= 0.0 {
            0.0
        } else {
            (cpu_term + mem_term + gpu_term) / weight_sum
        }
    }
}

/// The fixed, closed set of task classes (spec §3). Any unrecognized string
/// supplied by a caller is rejected at admission (`InvalidSubmission`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum TaskClass {
    CpuLight,
    CpuHeavy,
    MemoryHeavy,
    GpuInference,
    GpuTraining,
    Mixed,
}

impl TaskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskClass::CpuLight => "cpu-light",
            TaskClass::CpuHeavy => "cpu-heavy",
            TaskClass::MemoryHeavy => "memory-heavy",
            TaskClass::GpuInference => "gpu-inference",
            TaskClass::GpuTraining => "gpu-training",
            TaskClass::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskClass> {
        TaskClass::iter().find(|c| c.as_str() == s)
    }

    /// Default expected runtime in seconds, spec §3 τ-Store defaults.
    pub fn default_tau(&self) -> f64 {
        match self {
            TaskClass::CpuLight => 5.0,
            TaskClass::CpuHeavy => 15.0,
            TaskClass::MemoryHeavy => 20.0,
            TaskClass::GpuInference => 10.0,
            TaskClass::GpuTraining => 60.0,
            TaskClass::Mixed => 10.0,
        }
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: TaskId,
    pub image: String,
    pub command: Option<String>,
    pub requirements: ResourceVector,
    pub user_id: String,
    pub tag: Option<String>,
    pub k_value: f64,
    pub task_class: TaskClass,
    pub status: TaskStatus,
    pub arrival: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
    /// Diagnostic only (spec §4.5): not used to gate dispatch attempts.
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// One per (task, worker) dispatch attempt that succeeded (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub assignment_id: AssignmentId,
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub assigned_at: DateTime<Utc>,
    pub load_at_start: f64,
    pub sla_success: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Worker-reported terminal result (spec §3 `Results` collection / §4.7
/// `Reconcile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub outcome: TaskOutcome,
    pub logs: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn resource_vector_dominates_is_component_wise() {
        let avail = ResourceVector {
            cpu: 4.0,
            memory: 8.0,
            storage: 50.0,
            gpu: 0.0,
        };
        let req_ok = ResourceVector {
            cpu: 2.0,
            memory: 4.0,
            storage: 10.0,
            gpu: 0.0,
        };
        let req_too_much_mem = ResourceVector {
            memory: 9.0,
            ..req_ok
        };
        assert!(avail.dominates(&req_ok));
        assert!(!avail.dominates(&req_too_much_mem));
    }

    #[test]
    fn allocate_then_release_is_identity() {
        let capacity = ResourceVector {
            cpu: 8.0,
            memory: 16.0,
            storage: 100.0,
            gpu: 0.0,
        };
        let req = ResourceVector {
            cpu: 2.0,
            memory: 4.0,
            storage: 5.0,
            gpu: 0.0,
        };
        let allocated = ResourceVector::ZERO.add(&req);
        let available = capacity.saturating_sub(&allocated);
        let allocated_after_release = allocated.saturating_sub(&req);
        let available_after_release = capacity.saturating_sub(&allocated_after_release);
        assert_eq!(allocated_after_release, ResourceVector::ZERO);
        assert_eq!(available_after_release, capacity);
        let _ = available;
    }

    #[test]
    fn task_class_round_trips_through_str() {
        for class in TaskClass::iter() {
            assert_eq!(TaskClass::parse(class.as_str()), Some(class));
        }
        assert_eq!(TaskClass::parse("unknown"), None);
    }

    #[test]
    fn normalized_load_weighs_gpu_heavier_than_memory() {
        let mut w = Worker::pre_authorized(WorkerId("w1".into()), "h:1".into(), Utc::now());
        w.capacity = ResourceVector {
            cpu: 0.0,
            memory: 10.0,
            storage: 0.0,
            gpu: 1.0,
        };
        w.latest_usage = UsageSnapshot {
            cpu: 0.0,
            memory: 1.0,
            gpu: 1.0,
        };
        // mem contributes 10*1/10 = 1, gpu contributes 1*1*2 = 2, weight = 1 + 2 = 3
        let load = w.normalized_load();
        assert!((load - 1.0).abs() < 1e-9);
    }
}
