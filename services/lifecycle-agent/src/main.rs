//! drainhook Lifecycle Agent
//!
//! Consumes autoscaling lifecycle hook notifications and drains the matching
//! cluster node before letting the instance terminate.
//!
//! ## Architecture
//!
//! - **Consumer**: Reads one queue message per tick
//! - **Processor**: Drains and deletes the node, then completes the lifecycle action
//! - **Adapters**: Queue, compute and scaling calls go through the `aws` CLI;
//!   cluster calls go to the Kubernetes API

use std::sync::Arc;

use anyhow::Result;
use drainhook_lifecycle_agent::aws::AwsCli;
use drainhook_lifecycle_agent::cluster::{KubeApi, KubeCluster};
use drainhook_lifecycle_agent::command::{CommandRunner, ProcessRunner};
use drainhook_lifecycle_agent::config::Config;
use drainhook_lifecycle_agent::inventory::Ec2Inventory;
use drainhook_lifecycle_agent::{
    AutoScalingClient, ClusterNodeController, Consumer, ConsumerConfig, LifecycleProcessor,
    ProcessorConfig, SqsChannel,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DRAINHOOK_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting drainhook lifecycle agent");
    info!(
        queue_url = %config.queue_url,
        region = ?config.region,
        hostname_style = ?config.hostname_style,
        poll_interval_secs = config.poll_interval.as_secs(),
        drain_timeout_secs = config.drain_timeout.as_secs(),
        malformed_policy = %config.malformed_policy,
        "Configuration loaded"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(config.command_timeout));
    let aws = AwsCli::from_config(runner, &config);

    // Kubeconfig or in-cluster service account
    let kube_client = kube::Client::try_default().await?;
    let cluster = KubeCluster::from_config(Arc::new(KubeApi::new(kube_client)), &config);

    let channel = Arc::new(SqsChannel::from_config(aws.clone(), &config));
    let nodes = Arc::new(ClusterNodeController::new(
        Ec2Inventory::new(aws.clone()),
        cluster,
    ));
    let scaling = Arc::new(AutoScalingClient::new(aws));

    let processor = LifecycleProcessor::new(
        channel.clone(),
        nodes,
        scaling,
        ProcessorConfig::from(&config),
    );
    let consumer = Consumer::new(channel, processor, ConsumerConfig::from(&config));

    let handle = consumer.start();

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, waiting for in-flight notification");

    if let Err(e) = handle.stop().await {
        error!(error = %e, "Consumer task panicked");
    }

    info!("Lifecycle agent shutdown complete");
    Ok(())
}
