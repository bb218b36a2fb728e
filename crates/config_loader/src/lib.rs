//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `BusBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("mailbus.toml")).unwrap();
//! for destination in &blueprint.destinations {
//!     println!("{}: {:?}", destination.name, destination.mode);
//! }
//! ```

mod parser;
mod validator;

pub use contracts::BusBlueprint;
pub use parser::ConfigFormat;

/// Destination used when no configuration file is given
pub const DEFAULT_DESTINATION: &str = "mailbox";

use contracts::{
    BrokerSettings, ConfigVersion, ContractError, DestinationConfig, DispatcherSettings,
    EmptyRegistryPolicy,
};
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<BusBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<BusBlueprint, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Serialize BusBlueprint to TOML string
    pub fn to_toml(blueprint: &BusBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize BusBlueprint to JSON string
    pub fn to_json(blueprint: &BusBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Built-in configuration: one point-to-point `mailbox` queue that
    /// dead-letters messages nobody handles
    pub fn default_blueprint() -> BusBlueprint {
        BusBlueprint {
            version: ConfigVersion::V1,
            dispatcher: DispatcherSettings::default(),
            broker: BrokerSettings::default(),
            destinations: vec![DestinationConfig::point_to_point(
                DEFAULT_DESTINATION,
                EmptyRegistryPolicy::DeadLetter,
            )],
        }
    }

    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<BusBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }
}
