//! Telemetry Fanout (C2): per-worker inbox + dedicated processor so a
//! slow/misbehaving worker can never block the heartbeat RPC path or any
//! other worker's processing, per spec §4.2.

use crate::metrics::Metrics;
use cloudai_common::model::{UsageSnapshot, WorkerId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

const INBOX_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct HeartbeatMessage {
    pub worker_id: WorkerId,
    pub usage: UsageSnapshot,
    pub running_task_ids: Vec<cloudai_common::model::TaskId>,
}

#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub worker_id: WorkerId,
    pub usage: UsageSnapshot,
}

struct Inbox {
    sender: mpsc::Sender<HeartbeatMessage>,
    processor: tokio::task::JoinHandle<()>,
}

/// Fanout engine: owns one bounded inbox and processor task per worker,
/// and a broadcast channel subscribers (e.g. `/ws/telemetry`) can tap.
pub struct TelemetryFanout {
    inboxes: DashMap<WorkerId, Inbox>,
    updates: broadcast::Sender<TelemetrySnapshot>,
    metrics: Arc<Metrics>,
}

impl TelemetryFanout {
    pub fn new(metrics: Arc<Metrics>) -> Arc<Self> {
        let (updates, _rx) = broadcast::channel(256);
        Arc::new(TelemetryFanout {
            inboxes: DashMap::new(),
            updates,
            metrics,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetrySnapshot> {
        self.updates.subscribe()
    }

    /// Non-blocking enqueue, spec §4.2 `Submit`. Creates the per-worker
    /// inbox/processor on first heartbeat if it doesn't exist yet.
    pub fn submit(self: &Arc<Self>, message: HeartbeatMessage) {
        if !self.inboxes.contains_key(&message.worker_id) {
            self.spawn_processor(message.worker_id.clone());
        }
        let worker_id = message.worker_id.clone();
        if let Some(inbox) = self.inboxes.get(&worker_id) {
            if inbox.sender.try_send(message).is_err() {
                warn!(worker_id = %worker_id, "telemetry inbox full, dropping heartbeat");
                self.metrics.telemetry_dropped.inc();
            }
        }
    }

    fn spawn_processor(self: &Arc<Self>, worker_id: WorkerId) {
        let (tx, mut rx) = mpsc::channel::<HeartbeatMessage>(INBOX_CAPACITY);
        let updates = self.updates.clone();
        let processor_worker_id = worker_id.clone();
        let handle = tokio::spawn(async move {
            info!(worker_id = %processor_worker_id, "telemetry processor started");
            while let Some(message) = rx.recv().await {
                let snapshot = TelemetrySnapshot {
                    worker_id: message.worker_id.clone(),
                    usage: message.usage,
                };
                // Broadcast is fire-and-forget: no subscribers is not an error,
                // and a lagging subscriber never back-pressures this processor.
                let _ = updates.send(snapshot);
            }
            info!(worker_id = %processor_worker_id, "telemetry processor stopped");
        });
        self.inboxes.insert(
            worker_id,
            Inbox {
                sender: tx,
                processor: handle,
            },
        );
    }

    /// Spec §4.2 shutdown: close all inboxes, let processors drain and exit.
    pub async fn shutdown(&self) {
        let worker_ids: Vec<WorkerId> = self.inboxes.iter().map(|e| e.key().clone()).collect();
        for worker_id in worker_ids {
            if let Some((_, inbox)) = self.inboxes.remove(&worker_id) {
                drop(inbox.sender);
                let _ = inbox.processor.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn test_metrics() -> Arc<Metrics> {
        Metrics::new(&prometheus::Registry::new()).unwrap()
    }

    #[test]
    async fn submit_updates_broadcast_subscribers() {
        let fanout = TelemetryFanout::new(test_metrics());
        let mut rx = fanout.subscribe();
        fanout.submit(HeartbeatMessage {
            worker_id: WorkerId("w1".into()),
            usage: UsageSnapshot {
                cpu: 0.5,
                memory: 0.2,
                gpu: 0.0,
            },
            running_task_ids: vec![],
        });
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.worker_id, WorkerId("w1".into()));
        assert_eq!(snapshot.usage.cpu, 0.5);
    }

    #[test]
    async fn shutdown_drains_processors() {
        let fanout = TelemetryFanout::new(test_metrics());
        fanout.submit(HeartbeatMessage {
            worker_id: WorkerId("w1".into()),
            usage: UsageSnapshot::ZERO,
            running_task_ids: vec![],
        });
        fanout.shutdown().await;
        assert!(fanout.inboxes.is_empty());
    }

    #[test]
    async fn dropping_a_heartbeat_on_a_full_inbox_increments_the_counter() {
        let metrics = test_metrics();
        let fanout = TelemetryFanout::new(metrics.clone());
        for _ in 0..(INBOX_CAPACITY + 5) {
            fanout.submit(HeartbeatMessage {
                worker_id: WorkerId("w1".into()),
                usage: UsageSnapshot::ZERO,
                running_task_ids: vec![],
            });
        }
        assert!(metrics.telemetry_dropped.get() > 0);
    }
}
