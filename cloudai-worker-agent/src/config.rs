//! Process-wide configuration for the worker agent binary, mirroring
//! `cloudai_master::config::MasterConfig`'s shape: a `Default` struct loaded
//! through `cloudai_common::config::ConfigLoader`.

use cloudai_common::model::ResourceVector;
use cloudai_common::tracing_config::TracingConfig;
use cloudai_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerAgentConfig {
    pub tracing: TracingConfig,
    /// Stable identity this worker registers under (spec §4.1 `worker_id`).
    pub worker_id: String,
    /// Address the master dials back for `AssignTask`/`CancelTask`/
    /// `StreamTaskLogs`.
    pub endpoint: String,
    pub master_endpoint: String,
    pub grpc_port: u16,
    pub capacity: ResourceVector,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for WorkerAgentConfig {
    fn default() -> Self {
        WorkerAgentConfig {
            tracing: TracingConfig::local_dev("cloudai-worker-agent"),
            worker_id: "worker-1".to_string(),
            endpoint: "http://127.0.0.1:50061".to_string(),
            master_endpoint: "http://127.0.0.1:50051".to_string(),
            grpc_port: 50061,
            capacity: ResourceVector {
                cpu: 4.0,
                memory: 8.0,
                storage: 100.0,
                gpu: 0.0,
            },
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl SafeDisplay for WorkerAgentConfig {
    fn to_safe_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "tracing: {}", self.tracing.to_safe_string());
        let _ = writeln!(out, "worker_id: {}", self.worker_id);
        let _ = writeln!(out, "endpoint: {}", self.endpoint);
        let _ = writeln!(out, "master_endpoint: {}", self.master_endpoint);
        let _ = writeln!(out, "grpc_port: {}", self.grpc_port);
        let _ = writeln!(out, "capacity: {:?}", self.capacity);
        let _ = writeln!(out, "heartbeat_interval: {:?}", self.heartbeat_interval);
        out
    }
}
