//! Binary entrypoint: loads `MasterConfig`, starts `CloudAiMaster` and
//! blocks until a component task exits or the process receives `ctrl+c`.

use cloudai_common::config::ConfigLoader;
use cloudai_common::SafeDisplay;
use cloudai_master::config::MasterConfig;
use cloudai_master::CloudAiMaster;
use prometheus::Registry;
use tokio::task::JoinSet;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config: MasterConfig = ConfigLoader::new_with_examples()
        .load()
        .map_err(|err| anyhow::anyhow!(err).context("loading configuration"))?;
    config.tracing.init();
    info!(config = %config.to_safe_string(), "starting cloudai master");

    let registry = Registry::new();
    let master = CloudAiMaster::new(config, registry).await?;

    let mut join_set: JoinSet<Result<(), anyhow::Error>> = JoinSet::new();
    master.run(&mut join_set).await?;

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

    master.shutdown().await;
    join_set.shutdown().await;
    Ok(())
}
