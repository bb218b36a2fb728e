//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{BusBlueprint, DeliveryMode, EmptyRegistryPolicy};

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    destination_count: usize,
    point_to_point: usize,
    broadcast: usize,
    shutdown_deadline_ms: u64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            let broadcast = blueprint
                .destinations
                .iter()
                .filter(|d| d.mode == DeliveryMode::Broadcast)
                .count();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    destination_count: blueprint.destinations.len(),
                    point_to_point: blueprint.destinations.len() - broadcast,
                    broadcast,
                    shutdown_deadline_ms: blueprint.dispatcher.shutdown_deadline_ms,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &BusBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.destination(config_loader::DEFAULT_DESTINATION).is_none() {
        warnings.push(format!(
            "No '{}' destination - `mailbus run` needs --destination",
            config_loader::DEFAULT_DESTINATION
        ));
    }

    for destination in &blueprint.destinations {
        if destination.empty_registry_policy == EmptyRegistryPolicy::Drop {
            warnings.push(format!(
                "Destination '{}' acks and discards messages nobody handles",
                destination.name
            ));
        }
        if destination.max_retries == 0 {
            warnings.push(format!(
                "Destination '{}' gives handlers a single attempt",
                destination.name
            ));
        }
    }

    if blueprint.broker.redeliver_on_nack && blueprint.broker.max_redeliveries == 0 {
        warnings.push(
            "broker.redeliver_on_nack is set but max_redeliveries is 0 - nacks dead-letter immediately"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!(
                "  Destinations: {} ({} point-to-point, {} broadcast)",
                summary.destination_count, summary.point_to_point, summary.broadcast
            );
            println!("  Shutdown deadline: {}ms", summary.shutdown_deadline_ms);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
