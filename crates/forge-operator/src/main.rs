//! forge operator - builds Workloads from git with Tekton pipelines

use std::sync::Arc;

use clap::Parser;
use kube::Client;

use forge_common::telemetry::{init_telemetry, TelemetryConfig};
use forge_git::{Git2Remote, RevisionResolver};
use forge_operator::config::{Cli, Commands, ControllerArgs};
use forge_operator::controller_runner::{build_namespace_controllers, build_workload_controllers};
use forge_operator::startup::{crd_yaml, ensure_crds_installed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's rustls client needs a process-wide crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    let _telemetry = init_telemetry(TelemetryConfig::from_env("forge-operator"))
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let ttl = args.git_cache_ttl();
    let resolver = Arc::new(RevisionResolver::new(Arc::new(Git2Remote), ttl));
    let route_table = args.route_table();
    let config = args.workload_config();

    tracing::info!(
        pipeline = %config.pipeline_name,
        route_table = %format!("{}/{}", route_table.namespace, route_table.name),
        git_cache_ttl_secs = ttl.as_secs(),
        reconcile_timeout_secs = config.reconcile_timeout.as_secs(),
        "Starting controllers"
    );

    let mut controllers =
        build_workload_controllers(client.clone(), config, route_table.clone(), resolver);
    controllers.extend(build_namespace_controllers(client, route_table));

    futures::future::join_all(controllers).await;
    tracing::info!("Controllers stopped");
    Ok(())
}
