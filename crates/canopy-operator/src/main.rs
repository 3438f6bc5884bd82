//! Canopy Operator - automated maintenance of Shoot clusters

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, CustomResourceExt};

use canopy_common::crd::{CloudProfile, OperatingSystemConfig, Shoot};
use canopy_common::kube_utils::create_client;
use canopy_common::telemetry::init_telemetry;
use canopy_shoot::maintenance::{error_policy, reconcile, Context};

mod config;

use config::Cli;

/// Watcher timeout (seconds), below the client read timeout so idle watches
/// are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in [Shoot::crd(), CloudProfile::crd(), OperatingSystemConfig::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(cli.telemetry_config())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    run_controller(&cli).await
}

async fn run_controller(cli: &Cli) -> anyhow::Result<()> {
    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let config = cli.maintenance_config();
    tracing::info!(
        controller = %config.controller_name,
        respect_sync_period_overwrite = config.respect_sync_period_overwrite,
        "Starting Shoot maintenance controller"
    );

    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());
    let shoots: Api<Shoot> = Api::all(client);

    Controller::new(shoots, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Shoot"))
        .await;

    tracing::info!("Shoot maintenance controller stopped");
    Ok(())
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
