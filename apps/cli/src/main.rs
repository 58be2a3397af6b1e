//! `dualslot` - dual-slot database credential rotation
//!
//! One invocation runs one reconciliation cycle and exits; schedule it as a
//! job that never overlaps itself.

mod cli;
mod report;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use dualslot_log::{Config as LogConfig, LoggerBuilder};
use dualslot_rotation::cluster::KubeClusterRefresher;
use dualslot_rotation::database::MySqlDatabase;
use dualslot_rotation::store::AwsSecretsManagerBackend;
use dualslot_rotation::{RotationConfig, RotationOrchestrator, RunMode, runtime_config};

use crate::cli::Args;
use crate::report::{Summary, error_json};

fn main() -> ExitCode {
    let args = Args::parse();

    let log_config = if args.log_json {
        LogConfig::from_env().with_json()
    } else {
        LogConfig::from_env()
    };
    let _guard = match LoggerBuilder::from_config(log_config.with_service("dualslot")).build() {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logging disabled: {e}");
            None
        }
    };

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(&args)));

    match result {
        Ok(summary) => {
            if args.log_json {
                println!("{}", summary.to_json());
            } else {
                println!("{}", summary.message());
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "Run failed");
            if args.log_json {
                println!("{}", error_json(&error));
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<Summary> {
    if args.fix_permissions {
        let sites_root = args
            .sites_root
            .as_deref()
            .ok_or_else(|| anyhow!("missing required configuration: OPENEMR_SITES_MOUNT_ROOT"))?;
        let path = runtime_config::discover(sites_root)?;
        runtime_config::relax_permissions(&path)?;
        return Ok(Summary::PermissionsFixed(path));
    }

    let config = args.rotation_config();
    config.validate()?;
    let mode = RunMode::from_dry_run(args.dry_run);
    let orchestrator = connect(config).await?;

    if args.sync_db_users {
        orchestrator.sync_db_users(mode).await?;
        Ok(Summary::Synced(mode))
    } else {
        Ok(Summary::Rotated(orchestrator.rotate(mode).await?))
    }
}

async fn connect(config: RotationConfig) -> anyhow::Result<RotationOrchestrator> {
    let secrets = AwsSecretsManagerBackend::new(&config.region).await;
    let cluster = KubeClusterRefresher::try_default(config.rollout_poll_interval)
        .await
        .context("failed to create Kubernetes client")?;
    let db = MySqlDatabase::new(config.connect_timeout);

    Ok(RotationOrchestrator::new(
        config,
        Arc::new(secrets),
        Arc::new(cluster),
        Arc::new(db),
    )?)
}
