//! Master-side gRPC surface (spec §6): `RegisterWorker`, `SendHeartbeat`,
//! `ReportTaskCompletion`. Thin translation layer over the registry,
//! telemetry fanout and assignment lifecycle - no business logic lives here.

use crate::assignment::AssignmentLifecycle;
use crate::registry::WorkerRegistry;
use crate::telemetry::{HeartbeatMessage, TelemetryFanout};
use cloudai_common::model::{
    ResourceVector, TaskId, TaskOutcome, TaskResult, UsageSnapshot, WorkerId,
};
use cloudai_grpc::proto::cloudai::workercontrol::v1::master_control_server::MasterControl;
use cloudai_grpc::proto::cloudai::workercontrol::v1::{
    self as proto, Ack, Heartbeat, HeartbeatAck, RegisterAck, TaskCompletionReport, WorkerInfo,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::warn;

pub struct MasterControlGrpcApi {
    registry: Arc<WorkerRegistry>,
    telemetry: Arc<TelemetryFanout>,
    assignment: Arc<AssignmentLifecycle>,
}

impl MasterControlGrpcApi {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        telemetry: Arc<TelemetryFanout>,
        assignment: Arc<AssignmentLifecycle>,
    ) -> Self {
        MasterControlGrpcApi {
            registry,
            telemetry,
            assignment,
        }
    }
}

#[tonic::async_trait]
impl MasterControl for MasterControlGrpcApi {
    async fn register_worker(
        &self,
        request: Request<WorkerInfo>,
    ) -> Result<Response<RegisterAck>, Status> {
        let info = request.into_inner();
        let worker_id = WorkerId(info.worker_id.clone());
        let capacity: ResourceVector = info
            .capacity
            .map(|c| ResourceVector {
                cpu: c.cpu,
                memory: c.memory,
                storage: c.storage,
                gpu: c.gpu,
            })
            .unwrap_or(ResourceVector::ZERO);

        match self
            .registry
            .handle_registration_handshake(worker_id.clone(), Some(info.endpoint), capacity)
            .await
        {
            Ok(()) => Ok(Response::new(RegisterAck {
                accepted: true,
                message: String::new(),
            })),
            Err(err) => {
                warn!(worker_id = %worker_id, error = %err, "registration handshake rejected");
                Ok(Response::new(RegisterAck {
                    accepted: false,
                    message: err.to_string(),
                }))
            }
        }
    }

    async fn send_heartbeat(
        &self,
        request: Request<Heartbeat>,
    ) -> Result<Response<HeartbeatAck>, Status> {
        let beat = request.into_inner();
        let worker_id = WorkerId(beat.worker_id.clone());
        let running_task_ids: Vec<TaskId> = beat
            .running_task_ids
            .iter()
            .filter_map(|s| uuid::Uuid::parse_str(s).ok().map(TaskId))
            .collect();
        let usage = UsageSnapshot {
            cpu: beat.cpu_usage,
            memory: beat.memory_usage,
            gpu: beat.gpu_usage,
        };

        if let Err(err) = self
            .registry
            .heartbeat(&worker_id, usage, running_task_ids.clone())
            .await
        {
            warn!(worker_id = %worker_id, error = %err, "heartbeat for unknown worker");
            return Ok(Response::new(HeartbeatAck { ok: false }));
        }

        self.telemetry.submit(HeartbeatMessage {
            worker_id,
            usage,
            running_task_ids,
        });

        Ok(Response::new(HeartbeatAck { ok: true }))
    }

    async fn report_task_completion(
        &self,
        request: Request<TaskCompletionReport>,
    ) -> Result<Response<Ack>, Status> {
        let report = request.into_inner();
        let task_id = uuid::Uuid::parse_str(&report.task_id)
            .map(TaskId)
            .map_err(|_| Status::invalid_argument("malformed task_id"))?;
        let outcome = match proto::TaskOutcome::try_from(report.outcome) {
            Ok(proto::TaskOutcome::Completed) => TaskOutcome::Completed,
            Ok(proto::TaskOutcome::Failed) => TaskOutcome::Failed,
            Ok(proto::TaskOutcome::Cancelled) => TaskOutcome::Cancelled,
            _ => return Err(Status::invalid_argument("missing task outcome")),
        };

        self.assignment
            .reconcile(TaskResult {
                task_id,
                worker_id: WorkerId(report.worker_id),
                outcome,
                logs: report.logs,
                completed_at: chrono::Utc::now(),
            })
            .await;

        Ok(Response::new(Ack {
            ok: true,
            message: String::new(),
        }))
    }
}
