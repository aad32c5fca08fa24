//! Outbound RPC transport to workers (spec §6 `AssignTask`/`CancelTask`):
//! the concrete `WorkerTransport` the master wires up in production,
//! connecting lazily and caching channels per endpoint.

use crate::assignment::WorkerTransport;
use async_trait::async_trait;
use cloudai_common::error::CloudAiError;
use cloudai_common::model::{Task, TaskId};
use cloudai_grpc::proto::cloudai::workercontrol::v1::worker_control_client::WorkerControlClient;
use cloudai_grpc::proto::cloudai::workercontrol::v1::{CancelTaskRequest, ResourceVector, TaskSpec};
use dashmap::DashMap;
use tonic::transport::Channel;

/// Caches one connected channel per worker endpoint so repeated dispatch
/// attempts to the same worker don't each pay a fresh TCP/TLS handshake.
pub struct WorkerControlClientTransport {
    channels: DashMap<String, Channel>,
}

impl WorkerControlClientTransport {
    pub fn new() -> Self {
        WorkerControlClientTransport {
            channels: DashMap::new(),
        }
    }

    async fn client_for(
        &self,
        endpoint: &str,
    ) -> Result<WorkerControlClient<Channel>, CloudAiError> {
        if let Some(channel) = self.channels.get(endpoint) {
            return Ok(WorkerControlClient::new(channel.clone()));
        }
        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|err| CloudAiError::WorkerUnreachable(err.to_string()))?
            .connect()
            .await
            .map_err(|err| CloudAiError::WorkerUnreachable(err.to_string()))?;
        self.channels
            .insert(endpoint.to_string(), channel.clone());
        Ok(WorkerControlClient::new(channel))
    }
}

impl Default for WorkerControlClientTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerTransport for WorkerControlClientTransport {
    async fn assign_task(&self, worker_endpoint: &str, task: &Task) -> Result<(), CloudAiError> {
        let mut client = self.client_for(worker_endpoint).await?;
        let request = TaskSpec {
            task_id: task.task_id.to_string(),
            image: task.image.clone(),
            command: task.command.clone(),
            requirements: Some(ResourceVector {
                cpu: task.requirements.cpu,
                memory: task.requirements.memory,
                storage: task.requirements.storage,
                gpu: task.requirements.gpu,
            }),
        };
        let ack = client
            .assign_task(request)
            .await
            .map_err(|status| CloudAiError::WorkerUnreachable(status.message().to_string()))?
            .into_inner();
        if ack.accepted {
            Ok(())
        } else {
            Err(CloudAiError::WorkerUnreachable(ack.message))
        }
    }

    async fn cancel_task(&self, worker_endpoint: &str, task_id: TaskId) -> Result<(), CloudAiError> {
        let mut client = self.client_for(worker_endpoint).await?;
        let ack = client
            .cancel_task(CancelTaskRequest {
                task_id: task_id.to_string(),
            })
            .await
            .map_err(|status| CloudAiError::WorkerUnreachable(status.message().to_string()))?
            .into_inner();
        if ack.accepted {
            Ok(())
        } else {
            Err(CloudAiError::WorkerUnreachable(ack.message))
        }
    }
}
