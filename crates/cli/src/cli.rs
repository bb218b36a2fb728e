//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mailbus - typed message dispatch over an embedded broker
#[derive(Parser, Debug)]
#[command(
    name = "mailbus",
    author,
    version,
    about = "Typed message dispatcher with retries and graceful shutdown",
    long_about = "Publishes typed messages to named destinations and dispatches them to \n\
                  registered handlers with bounded retries, explicit ack/nack settlement \n\
                  and a deadline-bound graceful shutdown."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MAILBUS_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "MAILBUS_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the bus, send emails to the mailbox and print what arrives
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults when omitted
    #[arg(short, long, env = "MAILBUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Destination the emails are published to
    #[arg(long, default_value = config_loader::DEFAULT_DESTINATION, env = "MAILBUS_DESTINATION")]
    pub destination: String,

    /// Number of emails to send
    #[arg(short = 'n', long, default_value = "1", env = "MAILBUS_COUNT")]
    pub count: u32,

    /// Recipient written into each email
    #[arg(long, default_value = "info@example.com", env = "MAILBUS_TO")]
    pub to: String,

    /// Body written into each email
    #[arg(long, default_value = "Hello", env = "MAILBUS_BODY")]
    pub body: String,

    /// Seconds to wait for every email to be settled (0 = wait for Ctrl-C)
    #[arg(long, default_value = "10", env = "MAILBUS_SETTLE_TIMEOUT")]
    pub settle_timeout: u64,

    /// Override the dispatcher shutdown deadline from configuration
    #[arg(long, env = "MAILBUS_SHUTDOWN_DEADLINE_MS")]
    pub shutdown_deadline_ms: Option<u64>,

    /// Validate configuration and exit without starting the bus
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MAILBUS_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "mailbus.toml", env = "MAILBUS_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; built-in defaults when omitted
    #[arg(short, long, env = "MAILBUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["mailbus", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.destination, "mailbox");
        assert_eq!(args.count, 1);
        assert_eq!(args.to, "info@example.com");
        assert_eq!(args.body, "Hello");
        assert!(args.config.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "mailbus",
            "-v",
            "run",
            "--count",
            "5",
            "--to",
            "a@example.com",
            "--body",
            "hi",
            "--shutdown-deadline-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.count, 5);
        assert_eq!(args.to, "a@example.com");
        assert_eq!(args.body, "hi");
        assert_eq!(args.shutdown_deadline_ms, Some(250));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["mailbus", "-q", "-v", "info"]).is_err());
    }
}
