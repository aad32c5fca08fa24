//! Container execution (spec §1 Non-goals: "the actual container/process
//! runtime is out of scope - the agent only needs a pluggable seam to
//! drive one"). `TaskExecutor` is that seam; `StubExecutor` is the default
//! wired in `server.rs` until a real runtime (Docker, containerd, ...) is
//! plugged in.

use async_trait::async_trait;
use cloudai_common::model::{Task, TaskOutcome};
use std::sync::Arc;
use tokio::sync::watch;

use crate::log_broadcast::LogBroadcaster;

/// Drives one task to completion, streaming its output into `logs` as it
/// runs. `cancelled` flips to `true` when the master calls `CancelTask`;
/// implementations should race it against their own work and return
/// `TaskOutcome::Cancelled` promptly once it fires.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(
        &self,
        task: Task,
        logs: Arc<LogBroadcaster>,
        cancelled: watch::Receiver<bool>,
    ) -> TaskOutcome;
}

/// Emits a handful of synthetic log lines and reports success, standing in
/// for a real container runtime until one is wired in.
pub struct StubExecutor;

#[async_trait]
impl TaskExecutor for StubExecutor {
    async fn run(
        &self,
        task: Task,
        logs: Arc<LogBroadcaster>,
        mut cancelled: watch::Receiver<bool>,
    ) -> TaskOutcome {
        logs.push_line(format!("starting task {} image {}", task.task_id, task.image));
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {
                logs.push_line("task finished".to_string());
                TaskOutcome::Completed
            }
            _ = cancelled.changed() => {
                logs.push_line("task cancelled".to_string());
                TaskOutcome::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudai_common::model::{ResourceVector, TaskClass, TaskId, TaskStatus};
    use test_r::test;
    use tokio::sync::watch;

    fn sample_task() -> Task {
        Task {
            task_id: TaskId::new(),
            image: "busybox".to_string(),
            command: None,
            requirements: ResourceVector::ZERO,
            user_id: "u1".to_string(),
            tag: None,
            k_value: 2.0,
            task_class: TaskClass::Mixed,
            status: TaskStatus::Running,
            arrival: chrono::Utc::now(),
        }
    }

    #[test]
    async fn runs_to_completion_without_cancellation() {
        let (_tx, rx) = watch::channel(false);
        let logs = Arc::new(LogBroadcaster::new());
        let outcome = StubExecutor.run(sample_task(), logs, rx).await;
        assert_eq!(outcome, TaskOutcome::Completed);
    }

    #[test]
    async fn cancellation_wins_the_race() {
        let (tx, rx) = watch::channel(false);
        let logs = Arc::new(LogBroadcaster::new());
        tx.send(true).unwrap();
        let outcome = StubExecutor.run(sample_task(), logs, rx).await;
        assert_eq!(outcome, TaskOutcome::Cancelled);
    }
}
