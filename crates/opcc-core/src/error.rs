// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error hierarchy for the OPC client core.
//!
//! # Error Hierarchy
//!
//! ```text
//! OpcError (root)
//! ├── ClientError   - Protocol client and connection operations
//! ├── BufferError   - Outbound buffer operations
//! └── SinkError     - Outbound sink delivery
//! ```
//!
//! Only [`ClientError::is_transient`] errors are retried by the resilience
//! policies; everything else propagates on the first failure.
//!
//! ```
//! use opcc_core::error::ClientError;
//! use std::time::Duration;
//!
//! let err = ClientError::timeout(Duration::from_secs(5));
//! assert!(err.is_transient());
//! assert!(!ClientError::configuration("bad endpoint").is_transient());
//! ```

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// OpcError - Root Error Type
// =============================================================================

/// The root error type of the client core.
#[derive(Debug, Error)]
pub enum OpcError {
    /// Protocol client error.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Buffer error.
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Outbound sink error.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

impl OpcError {
    /// Returns `true` if the error is transient.
    pub fn is_transient(&self) -> bool {
        match self {
            OpcError::Client(e) => e.is_transient(),
            OpcError::Buffer(_) => false,
            OpcError::Sink(e) => e.is_transient(),
        }
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            OpcError::Client(e) => e.error_type(),
            OpcError::Buffer(_) => "buffer",
            OpcError::Sink(_) => "sink",
        }
    }
}

// =============================================================================
// ClientError
// =============================================================================

/// Errors raised by protocol clients, connections and resilience policies.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Establishing the session failed.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// The timeout that elapsed.
        duration: Duration,
    },

    /// Transport-level communication failure.
    #[error("Communication error: {message}")]
    Communication {
        /// Error message.
        message: String,
    },

    /// The server closed the session.
    #[error("Session closed: {message}")]
    SessionClosed {
        /// Error message.
        message: String,
    },

    /// The secure channel was closed.
    #[error("Secure channel closed: {message}")]
    ChannelClosed {
        /// Error message.
        message: String,
    },

    /// The outbound broker is unavailable.
    #[error("Broker unavailable: {message}")]
    BrokerUnavailable {
        /// Error message.
        message: String,
    },

    /// No active session.
    #[error("Not connected")]
    NotConnected,

    /// Read rejected by the server.
    #[error("Read failed for '{address}': {message}")]
    ReadFailed {
        /// Protocol address.
        address: String,
        /// Error message.
        message: String,
    },

    /// Write rejected by the server.
    #[error("Write failed for '{address}': {message}")]
    WriteFailed {
        /// Protocol address.
        address: String,
        /// Error message.
        message: String,
    },

    /// A bad OPC status code without a more specific mapping.
    #[error("Bad status 0x{code:08X}: {message}")]
    BadStatus {
        /// Raw status code.
        code: u32,
        /// Error message.
        message: String,
    },

    /// Address unknown to the server.
    #[error("Address not found: {address}")]
    AddressNotFound {
        /// Protocol address.
        address: String,
    },

    /// Operation not supported by this protocol variant.
    #[error("Operation '{operation}' is not supported by {protocol}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Protocol name.
        protocol: &'static str,
    },

    /// Subscription service failure.
    #[error("Subscription error: {message}")]
    Subscription {
        /// Error message.
        message: String,
    },

    /// Circuit breaker rejected the call.
    #[error("Circuit breaker is open for '{target}'")]
    CircuitOpen {
        /// Breaker target.
        target: String,
    },

    /// The operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Protocol violation or unexpected response.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// Fatal configuration problem; never retried.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// Operation not valid in the current connection state.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message.
        message: String,
    },
}

impl ClientError {
    /// Creates a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Creates a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Creates a session closed error.
    pub fn session_closed(message: impl Into<String>) -> Self {
        Self::SessionClosed {
            message: message.into(),
        }
    }

    /// Creates a channel closed error.
    pub fn channel_closed(message: impl Into<String>) -> Self {
        Self::ChannelClosed {
            message: message.into(),
        }
    }

    /// Creates a broker unavailable error.
    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::BrokerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a read failed error.
    pub fn read_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReadFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a write failed error.
    pub fn write_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates an address not found error.
    pub fn address_not_found(address: impl Into<String>) -> Self {
        Self::AddressNotFound {
            address: address.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: &'static str, protocol: &'static str) -> Self {
        Self::Unsupported {
            operation,
            protocol,
        }
    }

    /// Creates a subscription error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription {
            message: message.into(),
        }
    }

    /// Creates a circuit open error.
    pub fn circuit_open(target: impl Into<String>) -> Self {
        Self::CircuitOpen {
            target: target.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns `true` for errors a retry may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed { .. }
                | ClientError::Timeout { .. }
                | ClientError::Communication { .. }
                | ClientError::SessionClosed { .. }
                | ClientError::ChannelClosed { .. }
                | ClientError::BrokerUnavailable { .. }
        )
    }

    /// Returns `true` for errors that mean the session is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            ClientError::SessionClosed { .. }
                | ClientError::ChannelClosed { .. }
                | ClientError::NotConnected
        )
    }

    /// Returns the error type for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::ConnectionFailed { .. } => "connection_failed",
            ClientError::Timeout { .. } => "timeout",
            ClientError::Communication { .. } => "communication",
            ClientError::SessionClosed { .. } => "session_closed",
            ClientError::ChannelClosed { .. } => "channel_closed",
            ClientError::BrokerUnavailable { .. } => "broker_unavailable",
            ClientError::NotConnected => "not_connected",
            ClientError::ReadFailed { .. } => "read_failed",
            ClientError::WriteFailed { .. } => "write_failed",
            ClientError::BadStatus { .. } => "bad_status",
            ClientError::AddressNotFound { .. } => "address_not_found",
            ClientError::Unsupported { .. } => "unsupported",
            ClientError::Subscription { .. } => "subscription",
            ClientError::CircuitOpen { .. } => "circuit_open",
            ClientError::Cancelled => "cancelled",
            ClientError::Protocol { .. } => "protocol",
            ClientError::Configuration { .. } => "configuration",
            ClientError::InvalidState { .. } => "invalid_state",
        }
    }
}

// =============================================================================
// BufferError
// =============================================================================

/// Errors raised by the outbound buffer.
#[derive(Debug, Clone, Error)]
pub enum BufferError {
    /// The buffer is full and the record was rejected.
    #[error("Buffer full: capacity {capacity}")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },

    /// The buffer has been closed.
    #[error("Buffer closed")]
    Closed,
}

// =============================================================================
// SinkError
// =============================================================================

/// Errors raised by outbound sinks.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// The downstream broker cannot be reached.
    #[error("Sink unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
    },

    /// The batch was rejected.
    #[error("Sink rejected batch: {message}")]
    Rejected {
        /// Error message.
        message: String,
    },
}

impl SinkError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a rejected error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Returns `true` if the sink may accept the batch on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Unavailable { .. })
    }
}

impl From<SinkError> for ClientError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Unavailable { message } => ClientError::BrokerUnavailable { message },
            SinkError::Rejected { message } => ClientError::Protocol { message },
        }
    }
}

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result alias using the root error.
pub type OpcResult<T> = Result<T, OpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::communication("reset").is_transient());
        assert!(ClientError::session_closed("x").is_transient());
        assert!(ClientError::channel_closed("x").is_transient());
        assert!(ClientError::broker_unavailable("x").is_transient());
        assert!(ClientError::connection_failed("x").is_transient());

        assert!(!ClientError::NotConnected.is_transient());
        assert!(!ClientError::Cancelled.is_transient());
        assert!(!ClientError::circuit_open("srv").is_transient());
        assert!(!ClientError::write_failed("ns=2;s=X", "BadNotWritable").is_transient());
    }

    #[test]
    fn test_sink_error_mapping() {
        let err: ClientError = SinkError::unavailable("down").into();
        assert!(err.is_transient());
        let err: ClientError = SinkError::rejected("schema").into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_root_error() {
        let err: OpcError = ClientError::timeout(Duration::from_millis(10)).into();
        assert!(err.is_transient());
        assert_eq!(err.error_type(), "timeout");
    }
}
