//! BusBlueprint - Config Loader output
//!
//! Describes the destinations the bus serves, how the dispatcher treats each
//! of them, and the settings of the embedded broker.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete bus configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BusBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Dispatcher-wide settings
    #[serde(default)]
    #[validate(nested)]
    pub dispatcher: DispatcherSettings,

    /// Embedded broker settings
    #[serde(default)]
    #[validate(nested)]
    pub broker: BrokerSettings,

    /// Declared destinations
    #[validate(nested)]
    pub destinations: Vec<DestinationConfig>,
}

impl BusBlueprint {
    /// Look up a destination by name
    pub fn destination(&self, name: &str) -> Option<&DestinationConfig> {
        self.destinations.iter().find(|d| d.name == name)
    }
}

/// Dispatcher-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatcherSettings {
    /// How long shutdown waits for in-flight deliveries before force-nacking them
    #[serde(default = "default_shutdown_deadline_ms")]
    pub shutdown_deadline_ms: u64,

    /// Relative backoff jitter (0.2 = +/-20% of the computed delay)
    #[serde(default = "default_jitter")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl DispatcherSettings {
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            shutdown_deadline_ms: default_shutdown_deadline_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_shutdown_deadline_ms() -> u64 {
    5_000
}

fn default_jitter() -> f64 {
    0.2
}

/// Embedded broker settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct BrokerSettings {
    /// Requeue nacked messages instead of dead-lettering them right away
    #[serde(default)]
    pub redeliver_on_nack: bool,

    /// Broker-side redelivery budget before a message is dead-lettered
    #[serde(default)]
    #[validate(range(max = 100))]
    pub max_redeliveries: u32,
}

/// Destination configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DestinationConfig {
    /// Destination name
    #[validate(length(min = 1, message = "destination name cannot be empty"))]
    pub name: String,

    /// Handler selection semantics
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Default retry budget for handlers on this destination
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 100))]
    pub max_retries: u32,

    /// Backoff base delay in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// What happens to a message nobody is registered for.
    /// Deliberately has no default.
    pub empty_registry_policy: EmptyRegistryPolicy,

    /// Concurrent deliveries on this destination (1 = broker order)
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 1024))]
    pub parallelism: usize,

    /// How the embedded broker distributes messages to subscribers
    #[serde(default)]
    pub broker_kind: BrokerKind,
}

impl DestinationConfig {
    /// Point-to-point destination with default retry settings
    pub fn point_to_point(name: impl Into<String>, policy: EmptyRegistryPolicy) -> Self {
        Self {
            name: name.into(),
            mode: DeliveryMode::PointToPoint,
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            empty_registry_policy: policy,
            parallelism: default_parallelism(),
            broker_kind: BrokerKind::Queue,
        }
    }

    /// Broadcast destination with default retry settings
    pub fn broadcast(name: impl Into<String>, policy: EmptyRegistryPolicy) -> Self {
        Self {
            mode: DeliveryMode::Broadcast,
            ..Self::point_to_point(name, policy)
        }
    }

    pub fn with_retries(mut self, max_retries: u32, base: Duration, max: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_broker_kind(mut self, kind: BrokerKind) -> Self {
        self.broker_kind = kind;
        self
    }

    /// Retry policy handed to handlers that do not bring their own
    pub fn retry_policy(&self, jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: BackoffConfig {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                jitter,
            },
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_parallelism() -> usize {
    1
}

/// Handler selection semantics for a destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Exactly one handler (first registered) processes each message
    #[default]
    PointToPoint,
    /// Every registered handler processes each message
    Broadcast,
}

/// Outcome for a message with no eligible handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRegistryPolicy {
    /// Ack and drop (expected no-op)
    Drop,
    /// Nack with reason `no-handler`
    DeadLetter,
}

/// Broker-side distribution of messages to subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// Competing consumers share one queue
    #[default]
    Queue,
    /// Each subscriber receives its own copy
    Topic,
}

/// Per-registration retry policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    /// No retries: the first failure is final
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    /// Relative jitter in [0, 1]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(default_backoff_base_ms()),
            max: Duration::from_millis(default_backoff_max_ms()),
            jitter: default_jitter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_defaults_from_json() {
        let config: DestinationConfig = serde_json::from_str(
            r#"{ "name": "mailbox", "empty_registry_policy": "dead_letter" }"#,
        )
        .unwrap();
        assert_eq!(config.mode, DeliveryMode::PointToPoint);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.broker_kind, BrokerKind::Queue);
    }

    #[test]
    fn test_empty_registry_policy_is_required() {
        let result: Result<DestinationConfig, _> =
            serde_json::from_str(r#"{ "name": "mailbox" }"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("empty_registry_policy"), "got: {err}");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = DestinationConfig::broadcast("audit", EmptyRegistryPolicy::Drop)
            .with_retries(2, Duration::from_millis(10), Duration::from_millis(40));
        let policy = config.retry_policy(0.0);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff.base, Duration::from_millis(10));
        assert_eq!(policy.backoff.max, Duration::from_millis(40));
        assert_eq!(config.mode, DeliveryMode::Broadcast);
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let config = DestinationConfig::point_to_point("mailbox", EmptyRegistryPolicy::Drop)
            .with_parallelism(0);
        assert!(config.validate().is_err());
    }
}
