// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Process-level errors for the `opcc` binary and their exit codes.

use opcc_config::ConfigError;
use opcc_core::ClientError;
use thiserror::Error;

/// Result type alias for binary operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that end the process.
///
/// | Exit code | Cause                                   |
/// |-----------|-----------------------------------------|
/// | 1         | configuration missing, unreadable or invalid |
/// | 2         | logging could not be set up             |
/// | 3         | the client core could not be assembled  |
/// | 4         | command output could not be rendered    |
#[derive(Debug, Error)]
pub enum BinError {
    /// No configuration path or value was supplied.
    #[error("no configuration provided")]
    MissingConfig,

    /// The configuration file failed to load or validate.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Log level, filter or subscriber installation failed.
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// The core builder rejected the configuration or its collaborators.
    #[error("client core assembly failed: {0}")]
    Assembly(#[from] ClientError),

    /// Rendering command output failed.
    #[error("output failed: {0}")]
    Output(String),

    /// Error with a description of what was being attempted.
    #[error("{context}: {source}")]
    WithContext {
        /// What was being attempted.
        context: String,
        /// Underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a logging setup error.
    pub fn logging(msg: impl Into<String>) -> Self {
        Self::Logging(msg.into())
    }

    /// Creates an output error.
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    /// Wraps the error with what was being attempted.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingConfig | Self::Config(_) => 1,
            Self::Logging(_) => 2,
            Self::Assembly(_) => 3,
            Self::Output(_) => 4,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &BinError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Prints an error to stderr, followed by the configuration field or error
/// type when one is known.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    match error.root() {
        BinError::Config(config) => eprintln!("  Kind: {}", config.error_type()),
        BinError::Assembly(client) => eprintln!("  Kind: {}", client.error_type()),
        _ => {}
    }
}

/// Reports an error and exits with its exit code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================
