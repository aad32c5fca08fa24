//! Binary entrypoint: loads `WorkerAgentConfig`, registers with the master,
//! starts the worker-control gRPC server and the heartbeat loop, and blocks
//! until `ctrl+c` or a component task exits.

use cloudai_common::config::ConfigLoader;
use cloudai_common::SafeDisplay;
use cloudai_worker_agent::agent::WorkerAgent;
use cloudai_worker_agent::config::WorkerAgentConfig;
use cloudai_worker_agent::grpcapi::WorkerControlGrpcApi;
use cloudai_worker_agent::masterclient::MasterClient;
use cloudai_worker_agent::runtime::StubExecutor;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tonic::transport::Server as TonicServer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config: WorkerAgentConfig = ConfigLoader::new_with_examples()
        .load()
        .map_err(|err| anyhow::anyhow!(err).context("loading configuration"))?;
    config.tracing.init();
    info!(config = %config.to_safe_string(), "starting cloudai worker agent");

    let master_client = Arc::new(MasterClient::new(config.master_endpoint.clone()));
    let agent = WorkerAgent::new(config.clone(), master_client, Arc::new(StubExecutor));
    agent.register().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut join_set: JoinSet<Result<(), anyhow::Error>> = JoinSet::new();

    let heartbeat_agent = agent.clone();
    let heartbeat_shutdown = shutdown_rx.clone();
    join_set.spawn(async move {
        heartbeat_agent.run_heartbeat_loop(heartbeat_shutdown).await;
        Ok(())
    });

    let addr: std::net::SocketAddr =
        SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), config.grpc_port).into();
    let worker_control = WorkerControlGrpcApi::new(agent.clone());

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<cloudai_grpc::proto::cloudai::workercontrol::v1::worker_control_server::WorkerControlServer<
            WorkerControlGrpcApi,
        >>()
        .await;

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(cloudai_grpc::proto::FILE_DESCRIPTOR_SET)
        .build()?;

    join_set.spawn(async move {
        TonicServer::builder()
            .add_service(reflection_service)
            .add_service(health_service)
            .add_service(
                cloudai_grpc::proto::cloudai::workercontrol::v1::worker_control_server::WorkerControlServer::new(
                    worker_control,
                ),
            )
            .serve(addr)
            .await
            .map_err(anyhow::Error::from)
    });

    info!(grpc_port = config.grpc_port, "cloudai worker agent started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        Some(res) = join_set.join_next() => {
            match res {
                Ok(Ok(())) => error!("a server task exited unexpectedly"),
                Ok(Err(err)) => error!(error = %err, "a server task failed"),
                Err(err) => error!(error = %err, "a server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    join_set.shutdown().await;
    Ok(())
}
