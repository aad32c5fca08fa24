pub mod admission;
pub mod api;
pub mod assignment;
pub mod bootstrap;
pub mod config;
pub mod grpcapi;
pub mod metrics;
pub mod param_loader;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod tau_store;
pub mod telemetry;

use crate::bootstrap::Services;
use crate::config::MasterConfig;
use anyhow::{anyhow, Context};
use cloudai_common::SafeDisplay;
use poem::listener::{Acceptor, Listener, TcpListener};
use poem::middleware::Cors;
use poem::{EndpointExt, Route};
use prometheus::Registry;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tonic::transport::Server as TonicServer;
use tracing::{info, instrument};

#[cfg(test)]
test_r::enable!();

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct RunDetails {
    pub http_port: u16,
    pub grpc_port: u16,
}

/// Owns every long-running component of the master process: the registry's
/// liveness watcher, the telemetry fanout, the queue sweeper and the
/// parameter loader, plus the HTTP and gRPC servers layered on top of them.
/// Mirrors the teacher's `CloudService`: one struct, `run()` starts
/// everything and returns the bound ports.
pub struct CloudAiMaster {
    config: MasterConfig,
    prometheus_registry: Registry,
    services: Services,
    shutdown_tx: watch::Sender<bool>,
}

impl CloudAiMaster {
    pub async fn new(
        config: MasterConfig,
        prometheus_registry: Registry,
    ) -> Result<Self, anyhow::Error> {
        info!(config = %config.to_safe_string(), "initializing cloudai master");
        let metrics = crate::metrics::Metrics::new(&prometheus_registry)
            .map_err(|err| anyhow!(err).context("metrics registration"))?;
        let services = Services::new(&config, metrics)
            .await
            .map_err(|err| anyhow!(err).context("service initialization"))?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(CloudAiMaster {
            config,
            prometheus_registry,
            services,
            shutdown_tx,
        })
    }

    #[instrument(skip_all)]
    pub async fn run(
        &self,
        join_set: &mut JoinSet<Result<(), anyhow::Error>>,
    ) -> Result<RunDetails, anyhow::Error> {
        self.services.spawn_background_tasks(
            join_set,
            self.shutdown_tx.subscribe(),
            self.config.queue_tick,
            self.config.param_reload_interval,
        );

        let grpc_port = self.start_grpc_server(join_set).await?;
        let http_port = self.start_http_server(join_set).await?;

        info!(http_port, grpc_port, "cloudai master started");

        Ok(RunDetails {
            http_port,
            grpc_port,
        })
    }

    /// Graceful shutdown: stop background tasks (liveness watcher, queue
    /// sweeper, telemetry processors, parameter loader).
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.services.telemetry.shutdown().await;
    }

    async fn start_grpc_server(
        &self,
        join_set: &mut JoinSet<Result<(), anyhow::Error>>,
    ) -> Result<u16, anyhow::Error> {
        let addr: std::net::SocketAddr =
            SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), self.config.grpc_port).into();
        let port = self.config.grpc_port;

        let master_control = grpcapi::master_control::MasterControlGrpcApi::new(
            self.services.registry.clone(),
            self.services.telemetry.clone(),
            self.services.assignment.clone(),
        );

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<cloudai_grpc::proto::cloudai::workercontrol::v1::master_control_server::MasterControlServer<
                grpcapi::master_control::MasterControlGrpcApi,
            >>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(cloudai_grpc::proto::FILE_DESCRIPTOR_SET)
            .build()
            .context("building gRPC reflection service")?;

        join_set.spawn(async move {
            TonicServer::builder()
                .add_service(reflection_service)
                .add_service(health_service)
                .add_service(
                    cloudai_grpc::proto::cloudai::workercontrol::v1::master_control_server::MasterControlServer::new(
                        master_control,
                    ),
                )
                .serve(addr)
                .await
                .map_err(anyhow::Error::from)
        });

        Ok(port)
    }

    async fn start_http_server(
        &self,
        join_set: &mut JoinSet<Result<(), anyhow::Error>>,
    ) -> Result<u16, anyhow::Error> {
        let api_service = api::make_open_api_service(&self.services);
        let ui = api_service.swagger_ui();
        let spec = api_service.spec_endpoint_yaml();
        let metrics = poem::endpoint::PrometheusExporter::new(self.prometheus_registry.clone());

        let app = Route::new()
            .nest("/", api_service.or(api::domain_routes(&self.services)))
            .nest("/docs", ui)
            .nest("/specs", spec)
            .nest("/metrics", metrics)
            .with(Cors::new());

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.config.http_port));
        let acceptor = listener.into_acceptor().await?;
        let port = acceptor.local_addr()[0]
            .as_socket_addr()
            .expect("socket address")
            .port();

        join_set.spawn(async move {
            poem::Server::new_with_acceptor(acceptor)
                .run(app)
                .await
                .map_err(anyhow::Error::from)
        });

        Ok(port)
    }
}
