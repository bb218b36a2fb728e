//! 配置校验模块
//!
//! 校验规则：
//! - 字段级规则 (`validator` derive): 名称非空、parallelism >= 1、jitter ∈ [0, 1] 等
//! - destination name 唯一
//! - backoff_base_ms <= backoff_max_ms
//! - 至少声明一个 destination

use std::collections::HashSet;

use contracts::{BusBlueprint, ContractError};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 校验 BusBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &BusBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_destinations_present(blueprint)?;
    validate_destination_names(blueprint)?;
    validate_backoff_ranges(blueprint)?;
    Ok(())
}

/// 字段级规则
fn validate_fields(blueprint: &BusBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let (field, message) = first_error(&errors, "")
            .unwrap_or_else(|| ("blueprint".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

/// 按字段路径排序后取第一个错误，保证报错稳定
fn first_error(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        let found = match kind {
            ValidationErrorsKind::Field(list) => list.first().map(|error| {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("failed '{}' check", error.code));
                (path.clone(), message)
            }),
            ValidationErrorsKind::Struct(nested) => first_error(nested, &path),
            ValidationErrorsKind::List(items) => items
                .iter()
                .find_map(|(idx, nested)| first_error(nested, &format!("{path}[{idx}]"))),
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// 至少一个 destination
fn validate_destinations_present(blueprint: &BusBlueprint) -> Result<(), ContractError> {
    if blueprint.destinations.is_empty() {
        return Err(ContractError::config_validation(
            "destinations",
            "at least one destination must be declared",
        ));
    }
    Ok(())
}

/// 校验 destination name 唯一性
fn validate_destination_names(blueprint: &BusBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for destination in &blueprint.destinations {
        if !seen.insert(destination.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("destinations[name={}]", destination.name),
                "duplicate destination name",
            ));
        }
    }
    Ok(())
}

/// 校验退避区间
fn validate_backoff_ranges(blueprint: &BusBlueprint) -> Result<(), ContractError> {
    for destination in &blueprint.destinations {
        if destination.backoff_base_ms > destination.backoff_max_ms {
            return Err(ContractError::config_validation(
                format!("destinations[{}].backoff_base_ms", destination.name),
                format!(
                    "backoff_base_ms ({}) must be <= backoff_max_ms ({})",
                    destination.backoff_base_ms, destination.backoff_max_ms
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        BrokerSettings, ConfigVersion, DestinationConfig, DispatcherSettings, EmptyRegistryPolicy,
    };

    fn minimal_blueprint() -> BusBlueprint {
        BusBlueprint {
            version: ConfigVersion::V1,
            dispatcher: DispatcherSettings::default(),
            broker: BrokerSettings::default(),
            destinations: vec![DestinationConfig::point_to_point(
                "mailbox",
                EmptyRegistryPolicy::DeadLetter,
            )],
        }
    }

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_blueprint()).is_ok());
    }

    #[test]
    fn test_duplicate_destination_name() {
        let mut bp = minimal_blueprint();
        bp.destinations.push(DestinationConfig::broadcast(
            "mailbox",
            EmptyRegistryPolicy::Drop,
        ));
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_backoff_base_above_max() {
        let mut bp = minimal_blueprint();
        bp.destinations[0].backoff_base_ms = 10_000;
        bp.destinations[0].backoff_max_ms = 100;
        let err = validate(&bp).unwrap_err();
        assert_eq!(field_of(err), "destinations[mailbox].backoff_base_ms");
    }

    #[test]
    fn test_zero_parallelism_reports_field_path() {
        let mut bp = minimal_blueprint();
        bp.destinations[0].parallelism = 0;
        let err = validate(&bp).unwrap_err();
        assert_eq!(field_of(err), "destinations[0].parallelism");
    }

    #[test]
    fn test_jitter_out_of_range() {
        let mut bp = minimal_blueprint();
        bp.dispatcher.jitter = 1.5;
        let err = validate(&bp).unwrap_err();
        assert_eq!(field_of(err), "dispatcher.jitter");
    }

    #[test]
    fn test_empty_name_message() {
        let mut bp = minimal_blueprint();
        bp.destinations[0].name.clear();
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("destination name cannot be empty"), "{err}");
    }

    #[test]
    fn test_no_destinations() {
        let mut bp = minimal_blueprint();
        bp.destinations.clear();
        assert_eq!(field_of(validate(&bp).unwrap_err()), "destinations");
    }

    #[test]
    fn test_too_many_retries() {
        let mut bp = minimal_blueprint();
        bp.destinations[0].max_retries = 1_000;
        assert_eq!(
            field_of(validate(&bp).unwrap_err()),
            "destinations[0].max_retries"
        );
    }
}
