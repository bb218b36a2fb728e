//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{BusBlueprint, DeliveryMode, EmptyRegistryPolicy};

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    dispatcher: DispatcherInfo,
    broker: BrokerInfo,
    destinations: Vec<DestinationInfo>,
}

#[derive(Serialize)]
struct DispatcherInfo {
    shutdown_deadline_ms: u64,
    jitter: f64,
}

#[derive(Serialize)]
struct BrokerInfo {
    redeliver_on_nack: bool,
    max_redeliveries: u32,
}

#[derive(Serialize)]
struct DestinationInfo {
    name: String,
    mode: &'static str,
    broker_kind: String,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    empty_registry_policy: &'static str,
    parallelism: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let blueprint = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration info");
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => config_loader::ConfigLoader::default_blueprint(),
    };

    if args.json {
        let info = build_config_info(&blueprint);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint);
    }

    Ok(())
}

fn mode_label(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::PointToPoint => "point_to_point",
        DeliveryMode::Broadcast => "broadcast",
    }
}

fn policy_label(policy: EmptyRegistryPolicy) -> &'static str {
    match policy {
        EmptyRegistryPolicy::Drop => "drop",
        EmptyRegistryPolicy::DeadLetter => "dead_letter",
    }
}

fn build_config_info(blueprint: &BusBlueprint) -> ConfigInfo {
    let destinations = blueprint
        .destinations
        .iter()
        .map(|d| DestinationInfo {
            name: d.name.clone(),
            mode: mode_label(d.mode),
            broker_kind: format!("{:?}", d.broker_kind).to_lowercase(),
            max_retries: d.max_retries,
            backoff_base_ms: d.backoff_base_ms,
            backoff_max_ms: d.backoff_max_ms,
            empty_registry_policy: policy_label(d.empty_registry_policy),
            parallelism: d.parallelism,
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        dispatcher: DispatcherInfo {
            shutdown_deadline_ms: blueprint.dispatcher.shutdown_deadline_ms,
            jitter: blueprint.dispatcher.jitter,
        },
        broker: BrokerInfo {
            redeliver_on_nack: blueprint.broker.redeliver_on_nack,
            max_redeliveries: blueprint.broker.max_redeliveries,
        },
        destinations,
    }
}

fn print_config_info(blueprint: &BusBlueprint) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                   mailbus Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⚙️  Dispatcher");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!(
        "   ├─ Shutdown deadline: {}ms",
        blueprint.dispatcher.shutdown_deadline_ms
    );
    println!("   └─ Backoff jitter: ±{:.0}%", blueprint.dispatcher.jitter * 100.0);

    println!("\n📬 Destinations ({})", blueprint.destinations.len());
    for (i, destination) in blueprint.destinations.iter().enumerate() {
        let is_last = i == blueprint.destinations.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({}, {:?})",
            prefix,
            destination.name,
            mode_label(destination.mode),
            destination.broker_kind
        );
        println!(
            "   {}  ├─ Retries: {} (backoff {}ms..{}ms)",
            child_prefix,
            destination.max_retries,
            destination.backoff_base_ms,
            destination.backoff_max_ms
        );
        println!(
            "   {}  ├─ Parallelism: {}",
            child_prefix, destination.parallelism
        );
        println!(
            "   {}  └─ Unhandled messages: {}",
            child_prefix,
            policy_label(destination.empty_registry_policy)
        );
    }

    println!("\n📦 Broker");
    println!(
        "   ├─ Redeliver on nack: {}",
        blueprint.broker.redeliver_on_nack
    );
    println!(
        "   └─ Max redeliveries: {}",
        blueprint.broker.max_redeliveries
    );

    println!();
}
