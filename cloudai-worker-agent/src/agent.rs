//! Ties the worker process together: registration with the master, the
//! heartbeat loop, and the table of currently-running tasks with their log
//! broadcasters. Mirrors the master's `Services`/`bootstrap.rs` shape - one
//! struct owning every long-lived handle, cloned into the gRPC layer.

use crate::config::WorkerAgentConfig;
use crate::log_broadcast::{LogBroadcaster, LogSubscription};
use crate::masterclient::MasterClient;
use crate::runtime::TaskExecutor;
use cloudai_common::model::{Task, TaskId, TaskOutcome, UsageSnapshot};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

struct RunningTask {
    logs: Arc<LogBroadcaster>,
    cancel: watch::Sender<bool>,
}

pub struct WorkerAgent {
    config: WorkerAgentConfig,
    master: Arc<MasterClient>,
    executor: Arc<dyn TaskExecutor>,
    running: DashMap<TaskId, RunningTask>,
}

impl WorkerAgent {
    pub fn new(
        config: WorkerAgentConfig,
        master: Arc<MasterClient>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<Self> {
        Arc::new(WorkerAgent {
            config,
            master,
            executor,
            running: DashMap::new(),
        })
    }

    /// Spec §6 `MasterRegister`/`RegisterWorker` handshake: announces this
    /// worker's capacity to the master it was told to contact.
    pub async fn register(&self) {
        match self
            .master
            .register_worker(
                self.config.worker_id.clone(),
                self.config.endpoint.clone(),
                self.config.capacity,
            )
            .await
        {
            Ok(ack) if ack.accepted => {
                info!(worker_id = %self.config.worker_id, "registered with master");
            }
            Ok(ack) => {
                warn!(worker_id = %self.config.worker_id, message = %ack.message, "registration rejected by master");
            }
            Err(err) => {
                warn!(worker_id = %self.config.worker_id, error = %err, "registration RPC failed");
            }
        }
    }

    /// Spec §4.2/§6 `SendHeartbeat`: reports point-in-time usage (derived
    /// from the running task count as a proxy until a real runtime reports
    /// per-container metrics) and the running task id set.
    pub async fn run_heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.send_heartbeat().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self) {
        let running_task_ids: Vec<String> =
            self.running.iter().map(|entry| entry.key().to_string()).collect();
        // A real runtime would aggregate per-container cgroup stats here;
        // the stub executor reports no usage.
        let usage = UsageSnapshot::ZERO;
        if let Err(err) = self
            .master
            .send_heartbeat(self.config.worker_id.clone(), usage, running_task_ids)
            .await
        {
            warn!(worker_id = %self.config.worker_id, error = %err, "heartbeat RPC failed");
        }
    }

    /// Spec §6 `AssignTask`: starts the task on the executor in the
    /// background, tracks it so `CancelTask`/`StreamTaskLogs` can find it,
    /// and reports its outcome back to the master once it finishes.
    pub fn assign_task(self: &Arc<Self>, task: Task) {
        let task_id = task.task_id;
        let logs = Arc::new(LogBroadcaster::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.running.insert(
            task_id,
            RunningTask {
                logs: logs.clone(),
                cancel: cancel_tx,
            },
        );

        let agent = self.clone();
        tokio::spawn(async move {
            let outcome = agent.executor.run(task, logs.clone(), cancel_rx).await;
            let status = match outcome {
                TaskOutcome::Completed => "completed",
                TaskOutcome::Failed => "failed",
                TaskOutcome::Cancelled => "cancelled",
            };
            logs.close(status.to_string());

            let proto_outcome = match outcome {
                TaskOutcome::Completed => {
                    cloudai_grpc::proto::cloudai::workercontrol::v1::TaskOutcome::Completed
                }
                TaskOutcome::Failed => {
                    cloudai_grpc::proto::cloudai::workercontrol::v1::TaskOutcome::Failed
                }
                TaskOutcome::Cancelled => {
                    cloudai_grpc::proto::cloudai::workercontrol::v1::TaskOutcome::Cancelled
                }
            };
            let collected_logs = String::new();
            if let Err(err) = agent
                .master
                .report_task_completion(
                    task_id.to_string(),
                    agent.config.worker_id.clone(),
                    proto_outcome,
                    collected_logs,
                )
                .await
            {
                warn!(task_id = %task_id, error = %err, "could not report task completion");
            }
            agent.running.remove(&task_id);
        });
    }

    /// Spec §6 `CancelTask`: signals the running task's cancellation watch;
    /// a no-op (but not an error) if the task already finished.
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        if let Some(entry) = self.running.get(task_id) {
            let _ = entry.cancel.send(true);
            true
        } else {
            false
        }
    }

    /// Spec §6/§4.8 `StreamTaskLogs`: subscribes to the task's broadcaster,
    /// replaying its ring buffer first.
    pub fn subscribe_logs(&self, task_id: &TaskId) -> Option<LogSubscription> {
        self.running.get(task_id).map(|entry| entry.logs.subscribe())
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StubExecutor;
    use cloudai_common::model::{ResourceVector, TaskClass, TaskStatus};
    use test_r::test;

    fn unreachable_master() -> Arc<MasterClient> {
        Arc::new(MasterClient::new("http://127.0.0.1:1".to_string()))
    }

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
    async fn cancel_unknown_task_returns_false() {
        let config = WorkerAgentConfig::default();
        let agent = WorkerAgent::new(config, unreachable_master(), Arc::new(StubExecutor));
        assert!(!agent.cancel_task(&TaskId::new()));
    }

    #[test]
    async fn subscribe_logs_sees_task_output_then_completion() {
        let config = WorkerAgentConfig::default();
        let agent = WorkerAgent::new(config, unreachable_master(), Arc::new(StubExecutor));
        let task = sample_task();
        let task_id = task.task_id;
        agent.assign_task(task);

        let subscription = loop {
            if let Some(sub) = agent.subscribe_logs(&task_id) {
                break sub;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        };

        let mut saw_terminal = false;
        while let Some(event) = subscription.next().await {
            if matches!(event, crate::log_broadcast::LogEvent::Terminal { .. }) {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
    }

    #[test]
    async fn cancel_task_before_completion_is_observed_by_executor() {
        let config = WorkerAgentConfig::default();
        let agent = WorkerAgent::new(config, unreachable_master(), Arc::new(StubExecutor));
        let task = sample_task();
        let task_id = task.task_id;
        agent.assign_task(task);

        assert!(agent.cancel_task(&task_id));
    }
}
