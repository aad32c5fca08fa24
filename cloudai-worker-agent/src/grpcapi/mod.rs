//! Worker-side gRPC surface (spec §6): `MasterRegister`, `AssignTask`,
//! `CancelTask`, `StreamTaskLogs`. Thin translation layer over
//! `WorkerAgent`, mirroring the master's `MasterControlGrpcApi`.

use crate::agent::WorkerAgent;
use crate::log_broadcast::LogEvent;
use cloudai_common::model::{ResourceVector, Task, TaskClass, TaskId};
use cloudai_grpc::proto::cloudai::workercontrol::v1::worker_control_server::WorkerControl;
use cloudai_grpc::proto::cloudai::workercontrol::v1::{
    Ack, CancelTaskRequest, LogChunk, LogStreamRequest, MasterInfo, TaskAck, TaskSpec,
};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::info;

pub struct WorkerControlGrpcApi {
    agent: Arc<WorkerAgent>,
}

impl WorkerControlGrpcApi {
    pub fn new(agent: Arc<WorkerAgent>) -> Self {
        WorkerControlGrpcApi { agent }
    }
}

#[tonic::async_trait]
impl WorkerControl for WorkerControlGrpcApi {
    async fn master_register(
        &self,
        request: Request<MasterInfo>,
    ) -> Result<Response<Ack>, Status> {
        let info = request.into_inner();
        info!(master_endpoint = %info.master_endpoint, "master announced itself");
        Ok(Response::new(Ack {
            ok: true,
            message: String::new(),
        }))
    }

    async fn assign_task(
        &self,
        request: Request<TaskSpec>,
    ) -> Result<Response<TaskAck>, Status> {
        let spec = request.into_inner();
        let task_id = uuid::Uuid::parse_str(&spec.task_id)
            .map(TaskId)
            .map_err(|_| Status::invalid_argument("malformed task_id"))?;
        let requirements: ResourceVector = spec
            .requirements
            .map(|r| ResourceVector {
                cpu: r.cpu,
                memory: r.memory,
                storage: r.storage,
                gpu: r.gpu,
            })
            .unwrap_or(ResourceVector::ZERO);

        // TaskSpec only carries id/image/command/requirements - the
        // scheduling metadata lives on the master, not the wire message.
        let task = Task {
            task_id,
            image: spec.image,
            command: spec.command,
            requirements,
            user_id: String::new(),
            tag: None,
            k_value: 2.0,
            task_class: TaskClass::Mixed,
            status: cloudai_common::model::TaskStatus::Running,
            arrival: chrono::Utc::now(),
        };

        self.agent.assign_task(task);

        Ok(Response::new(TaskAck {
            accepted: true,
            message: String::new(),
        }))
    }

    async fn cancel_task(
        &self,
        request: Request<CancelTaskRequest>,
    ) -> Result<Response<TaskAck>, Status> {
        let req = request.into_inner();
        let task_id = uuid::Uuid::parse_str(&req.task_id)
            .map(TaskId)
            .map_err(|_| Status::invalid_argument("malformed task_id"))?;
        let accepted = self.agent.cancel_task(&task_id);
        Ok(Response::new(TaskAck {
            accepted,
            message: if accepted {
                String::new()
            } else {
                "task not running on this worker".to_string()
            },
        }))
    }

    type StreamTaskLogsStream =
        Pin<Box<dyn Stream<Item = Result<LogChunk, Status>> + Send + 'static>>;

    async fn stream_task_logs(
        &self,
        request: Request<LogStreamRequest>,
    ) -> Result<Response<Self::StreamTaskLogsStream>, Status> {
        let req = request.into_inner();
        let task_id = uuid::Uuid::parse_str(&req.task_id)
            .map(TaskId)
            .map_err(|_| Status::invalid_argument("malformed task_id"))?;
        let subscription = self
            .agent
            .subscribe_logs(&task_id)
            .ok_or_else(|| Status::not_found("task not running on this worker"))?;

        let task_id_str = req.task_id;
        let stream = futures::stream::unfold(
            (subscription, task_id_str),
            |(subscription, task_id_str)| async move {
                let event = subscription.next().await?;
                let chunk = match event {
                    LogEvent::Line(content) => LogChunk {
                        task_id: task_id_str.clone(),
                        content,
                        is_complete: false,
                        status: String::new(),
                        dropped_marker: false,
                    },
                    LogEvent::Dropped => LogChunk {
                        task_id: task_id_str.clone(),
                        content: String::new(),
                        is_complete: false,
                        status: String::new(),
                        dropped_marker: true,
                    },
                    LogEvent::Terminal { status } => LogChunk {
                        task_id: task_id_str.clone(),
                        content: String::new(),
                        is_complete: true,
                        status,
                        dropped_marker: false,
                    },
                };
                Some((Ok(chunk), (subscription, task_id_str)))
            },
        );

        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masterclient::MasterClient;
    use crate::runtime::StubExecutor;
    use cloudai_grpc::proto::cloudai::workercontrol::v1::ResourceVector as ProtoResourceVector;
    use futures::StreamExt;
    use test_r::test;

    fn test_api() -> WorkerControlGrpcApi {
        let master = Arc::new(MasterClient::new("http://127.0.0.1:1".to_string()));
        let config = crate::config::WorkerAgentConfig::default();
        let agent = WorkerAgent::new(config, master, Arc::new(StubExecutor));
        WorkerControlGrpcApi::new(agent)
    }

    #[test]
    async fn assign_then_stream_logs_ends_with_terminal_chunk() {
        let api = test_api();
        let task_id = TaskId::new();

        api.assign_task(Request::new(TaskSpec {
            task_id: task_id.to_string(),
            image: "busybox".to_string(),
            command: None,
            requirements: Some(ProtoResourceVector {
                cpu: 1.0,
                memory: 1.0,
                storage: 1.0,
                gpu: 0.0,
            }),
        }))
        .await
        .unwrap();

        let stream = api
            .stream_task_logs(Request::new(LogStreamRequest {
                task_id: task_id.to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        let chunks: Vec<_> = stream.collect().await;
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert!(last.is_complete);
    }

    #[test]
    async fn cancel_task_not_running_is_rejected() {
        let api = test_api();
        let ack = api
            .cancel_task(Request::new(CancelTaskRequest {
                task_id: TaskId::new().to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!ack.accepted);
    }

    #[test]
    async fn stream_logs_for_unknown_task_is_not_found() {
        let api = test_api();
        let result = api
            .stream_task_logs(Request::new(LogStreamRequest {
                task_id: TaskId::new().to_string(),
            }))
            .await;
        assert!(result.is_err());
    }
}
