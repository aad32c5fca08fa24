//! Outbound RPC transport to the master (spec §6 `RegisterWorker`/
//! `SendHeartbeat`/`ReportTaskCompletion`): a lazily-connected, cached
//! channel, the same shape as the master's
//! `WorkerControlClientTransport` but scoped to the single master endpoint
//! a worker talks to.

use cloudai_common::model::{ResourceVector as CommonResourceVector, UsageSnapshot};
use cloudai_grpc::proto::cloudai::workercontrol::v1::master_control_client::MasterControlClient;
use cloudai_grpc::proto::cloudai::workercontrol::v1::{
    Ack, Heartbeat, HeartbeatAck, RegisterAck, ResourceVector, TaskCompletionReport, TaskOutcome,
    WorkerInfo,
};
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::Status;

pub struct MasterClient {
    endpoint: String,
    channel: Mutex<Option<Channel>>,
}

impl MasterClient {
    pub fn new(endpoint: String) -> Self {
        MasterClient {
            endpoint,
            channel: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<MasterControlClient<Channel>, Status> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(MasterControlClient::new(channel.clone()));
        }
        let channel = Channel::from_shared(self.endpoint.clone())
            .map_err(|err| Status::internal(err.to_string()))?
            .connect()
            .await
            .map_err(|err| Status::unavailable(err.to_string()))?;
        *guard = Some(channel.clone());
        Ok(MasterControlClient::new(channel))
    }

    pub async fn register_worker(
        &self,
        worker_id: String,
        endpoint: String,
        capacity: CommonResourceVector,
    ) -> Result<RegisterAck, Status> {
        let mut client = self.client().await?;
        let response = client
            .register_worker(WorkerInfo {
                worker_id,
                endpoint,
                capacity: Some(ResourceVector {
                    cpu: capacity.cpu,
                    memory: capacity.memory,
                    storage: capacity.storage,
                    gpu: capacity.gpu,
                }),
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn send_heartbeat(
        &self,
        worker_id: String,
        usage: UsageSnapshot,
        running_task_ids: Vec<String>,
    ) -> Result<HeartbeatAck, Status> {
        let mut client = self.client().await?;
        let response = client
            .send_heartbeat(Heartbeat {
                worker_id,
                cpu_usage: usage.cpu,
                memory_usage: usage.memory,
                gpu_usage: usage.gpu,
                running_task_ids,
            })
            .await?;
        Ok(response.into_inner())
    }

    pub async fn report_task_completion(
        &self,
        task_id: String,
        worker_id: String,
        outcome: TaskOutcome,
        logs: String,
    ) -> Result<Ack, Status> {
        let mut client = self.client().await?;
        let response = client
            .report_task_completion(TaskCompletionReport {
                task_id,
                worker_id,
                outcome: outcome as i32,
                logs,
            })
            .await?;
        Ok(response.into_inner())
    }
}
