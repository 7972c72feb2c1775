//! Multisite Operator - WordPress site provisioning for shared tenant pods

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use multisite::config::OperatorConfig;
use multisite::controller::{error_policy, reconcile, Context};
use multisite::crd::MultiSite;
use multisite::telemetry::{init_telemetry, TelemetryConfig};

/// Multisite - provisions WordPress sites declared as MultiSite resources
#[derive(Parser, Debug)]
#[command(name = "multisite", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&MultiSite::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(&TelemetryConfig {
        format: cli.config.log_format,
        ..Default::default()
    })?;

    run_controller(cli.config).await
}

/// Run the MultiSite controller until a shutdown signal arrives
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Arc::new(
        Context::from_config(client.clone(), &config)
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?,
    );

    let sites: Api<MultiSite> = Api::all(client);

    tracing::info!(
        public_domain = %config.public_domain,
        dns_zone = %config.dns_zone,
        "Starting MultiSite controller"
    );

    Controller::new(sites, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((site, action)) => {
                    tracing::debug!(site = %site, ?action, "Site reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Site reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("MultiSite controller stopped");
    Ok(())
}
