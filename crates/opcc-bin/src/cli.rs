// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing.
//!
//! - `run`: start the client core (default)
//! - `validate`: load and validate a configuration file
//! - `version`: show component versions

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// OPC client core: connections, subscriptions and audited writes for OPC
/// UA, HDA and AC servers.
#[derive(Parser, Debug)]
#[command(
    name = "opcc",
    author = "Sylvex <contact@sylvex.io>",
    version = opcc_core::VERSION,
    about = "OPC client core for UA, HDA and AC servers",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path (.yaml, .yml, .toml or .json)
    #[arg(short, long, default_value = "opcc.yaml", env = "OPCC_CONFIG", global = true)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the config
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format; defaults to the config
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the client core
    ///
    /// This is the default command. It connects the configured servers,
    /// registers subscriptions and runs until SIGINT or SIGTERM.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration without connecting anything.
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

/// Arguments for the `run` command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Connect to in-memory simulated servers instead of real devices
    #[arg(long)]
    pub simulate: bool,

    /// How often simulated values change
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration, requires = "simulate")]
    pub simulate_interval: Duration,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            simulate: false,
            simulate_interval: Duration::from_secs(1),
        }
    }
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Print the parsed configuration
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Single-line compact text
    Compact,
}

impl From<opcc_config::LogFormat> for LogFormat {
    fn from(format: opcc_config::LogFormat) -> Self {
        match format {
            opcc_config::LogFormat::Text => Self::Text,
            opcc_config::LogFormat::Json => Self::Json,
            opcc_config::LogFormat::Compact => Self::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parses the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The command to run, `run` when none was given.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Log level after `--quiet`/`--verbose`, falling back to `configured`.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Log format, falling back to `configured`.
    pub fn effective_log_format(&self, configured: opcc_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["opcc"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(args) if !args.simulate));
    }

    #[test]
    fn test_run_simulate() {
        let cli = Cli::parse_from(["opcc", "run", "--simulate", "--simulate-interval", "250ms"]);
        match cli.command {
            Some(Commands::Run(args)) => {
                assert!(args.simulate);
                assert_eq!(args.simulate_interval, Duration::from_millis(250));
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_simulate_interval_requires_simulate() {
        assert!(Cli::try_parse_from(["opcc", "run", "--simulate-interval", "2s"]).is_err());
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["opcc", "-c", "/etc/opcc/plant.toml", "validate", "--show-config", "-f", "json"]);
        assert_eq!(cli.config, PathBuf::from("/etc/opcc/plant.toml"));
        match cli.command {
            Some(Commands::Validate(args)) => {
                assert!(args.show_config);
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("expected validate, got {:?}", other),
        }
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::parse_from(["opcc"]);
        assert_eq!(cli.effective_log_level("error"), "error");

        let cli = Cli::parse_from(["opcc", "-l", "trace"]);
        assert_eq!(cli.effective_log_level("error"), "trace");

        let cli = Cli::parse_from(["opcc", "-l", "trace", "-q"]);
        assert_eq!(cli.effective_log_level("error"), "warn");

        assert!(Cli::try_parse_from(["opcc", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_log_format_falls_back_to_config() {
        let cli = Cli::parse_from(["opcc"]);
        assert_eq!(cli.effective_log_format(opcc_config::LogFormat::Json), LogFormat::Json);

        let cli = Cli::parse_from(["opcc", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_format(opcc_config::LogFormat::Json), LogFormat::Compact);
    }
}
