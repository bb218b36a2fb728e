//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use contracts::BusBlueprint;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let mut blueprint = load_blueprint(args)?;

    if let Some(deadline_ms) = args.shutdown_deadline_ms {
        info!(deadline_ms, "Overriding shutdown deadline from CLI");
        blueprint.dispatcher.shutdown_deadline_ms = deadline_ms;
    }

    info!(
        destinations = blueprint.destinations.len(),
        shutdown_deadline_ms = blueprint.dispatcher.shutdown_deadline_ms,
        redeliver_on_nack = blueprint.broker.redeliver_on_nack,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        destination: args.destination.clone(),
        count: args.count,
        to: args.to.clone(),
        body: args.body.clone(),
        settle_timeout: if args.settle_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.settle_timeout))
        },
    });

    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    stats.print_summary();
    info!("mailbus finished");
    Ok(())
}

fn load_blueprint(args: &RunArgs) -> Result<BusBlueprint> {
    let Some(path) = &args.config else {
        info!("No configuration file given, using built-in defaults");
        return Ok(config_loader::ConfigLoader::default_blueprint());
    };

    info!(config = %path.display(), "Loading configuration");
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }

    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Resolves on Ctrl+C or SIGTERM; pends forever if no handler can be installed
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &BusBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Dispatcher:");
    println!(
        "  Shutdown deadline: {}ms",
        blueprint.dispatcher.shutdown_deadline_ms
    );
    println!("  Backoff jitter: {}", blueprint.dispatcher.jitter);

    println!("\nDestinations ({}):", blueprint.destinations.len());
    for destination in &blueprint.destinations {
        println!(
            "  - {} ({:?}, {:?}) retries={} parallelism={} empty={:?}",
            destination.name,
            destination.mode,
            destination.broker_kind,
            destination.max_retries,
            destination.parallelism,
            destination.empty_registry_policy
        );
    }

    println!(
        "\nBroker: redeliver_on_nack={} max_redeliveries={}",
        blueprint.broker.redeliver_on_nack, blueprint.broker.max_redeliveries
    );
    println!();
}
