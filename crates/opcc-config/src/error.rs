// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be parsed.
    #[error("Failed to parse configuration file '{path}'{}: {message}", .line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
        /// Line number, when the parser reports one.
        line: Option<usize>,
    },

    /// A value failed validation.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// A required field is missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Dotted field path.
        field: String,
    },

    /// Reading the file failed.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// File path.
        path: PathBuf,
    },

    /// Two servers share an id.
    #[error("Duplicate server id: {server_id}")]
    DuplicateServerId {
        /// Duplicated id.
        server_id: String,
    },

    /// Two tags share an id.
    #[error("Duplicate tag id: {tag_id}")]
    DuplicateTagId {
        /// Duplicated id.
        tag_id: String,
    },

    /// A reference to a server that is not configured.
    #[error("'{field}' references unknown server '{server_id}'")]
    UnknownServer {
        /// Referencing field.
        field: String,
        /// Missing server id.
        server_id: String,
    },

    /// A reference to a tag that is not configured.
    #[error("'{field}' references unknown tag '{tag_id}'")]
    UnknownTag {
        /// Referencing field.
        field: String,
        /// Missing tag id.
        tag_id: String,
    },

    /// Invalid environment variable override.
    #[error("Invalid environment variable value for '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// What is wrong.
        message: String,
    },

    /// Unsupported file extension.
    #[error("Unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// Offending extension.
        format: String,
    },

    /// Serialization or deserialization failed outside of file parsing.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Serializer message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
            line: None,
        }
    }

    /// Creates a parse error with a line number.
    pub fn parse_at_line(path: impl Into<PathBuf>, message: impl Into<String>, line: usize) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
            line: Some(line),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a duplicate server id error.
    pub fn duplicate_server_id(server_id: impl Into<String>) -> Self {
        Self::DuplicateServerId {
            server_id: server_id.into(),
        }
    }

    /// Creates a duplicate tag id error.
    pub fn duplicate_tag_id(tag_id: impl Into<String>) -> Self {
        Self::DuplicateTagId { tag_id: tag_id.into() }
    }

    /// Creates an unknown server error.
    pub fn unknown_server(field: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self::UnknownServer {
            field: field.into(),
            server_id: server_id.into(),
        }
    }

    /// Creates an unknown tag error.
    pub fn unknown_tag(field: impl Into<String>, tag_id: impl Into<String>) -> Self {
        Self::UnknownTag {
            field: field.into(),
            tag_id: tag_id.into(),
        }
    }

    /// Creates an invalid environment variable error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Validation { .. } => "validation",
            Self::MissingField { .. } => "missing_field",
            Self::Io { .. } => "io",
            Self::FileNotFound { .. } => "file_not_found",
            Self::DuplicateServerId { .. } => "duplicate_server_id",
            Self::DuplicateTagId { .. } => "duplicate_tag_id",
            Self::UnknownServer { .. } => "unknown_server",
            Self::UnknownTag { .. } => "unknown_tag",
            Self::InvalidEnvVar { .. } => "invalid_env_var",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Serialization { .. } => "serialization",
        }
    }
}

impl From<ConfigError> for opcc_core::ClientError {
    fn from(err: ConfigError) -> Self {
        opcc_core::ClientError::configuration(err.to_string())
    }
}
