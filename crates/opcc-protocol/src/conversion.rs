// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC status codes and their mapping onto [`Quality`] and [`ClientError`].
//!
//! Status codes carry their severity in the two top bits:
//!
//! ```text
//! 00.. Good   01.. Uncertain   10.. Bad
//! ```

use std::fmt;

use opcc_core::error::ClientError;
use opcc_core::types::Quality;

// =============================================================================
// StatusCode
// =============================================================================

/// A raw OPC status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Operation succeeded.
    pub const GOOD: Self = Self(0x0000_0000);
    /// Value may be stale or imprecise.
    pub const UNCERTAIN: Self = Self(0x4000_0000);
    /// Last usable value, the source stopped updating.
    pub const UNCERTAIN_LAST_USABLE_VALUE: Self = Self(0x4090_0000);
    /// Generic bad status.
    pub const BAD: Self = Self(0x8000_0000);
    /// Unexpected server error.
    pub const BAD_UNEXPECTED_ERROR: Self = Self(0x8001_0000);
    /// Low-level communication failure.
    pub const BAD_COMMUNICATION_ERROR: Self = Self(0x8005_0000);
    /// Operation timed out.
    pub const BAD_TIMEOUT: Self = Self(0x800A_0000);
    /// Service not supported by the server.
    pub const BAD_SERVICE_UNSUPPORTED: Self = Self(0x800B_0000);
    /// Server is shutting down.
    pub const BAD_SHUTDOWN: Self = Self(0x800C_0000);
    /// Server is not connected.
    pub const BAD_SERVER_NOT_CONNECTED: Self = Self(0x800D_0000);
    /// User lacks permission.
    pub const BAD_USER_ACCESS_DENIED: Self = Self(0x801F_0000);
    /// Session was closed.
    pub const BAD_SESSION_CLOSED: Self = Self(0x8026_0000);
    /// Node id does not exist.
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);
    /// No data in the requested history window.
    pub const BAD_NO_DATA: Self = Self(0x809B_0000);
    /// Node is not writable.
    pub const BAD_NOT_WRITABLE: Self = Self(0x803B_0000);
    /// Value out of range.
    pub const BAD_OUT_OF_RANGE: Self = Self(0x803C_0000);
    /// Value type does not match the node.
    pub const BAD_TYPE_MISMATCH: Self = Self(0x8074_0000);
    /// Event id unknown to the server.
    pub const BAD_EVENT_ID_UNKNOWN: Self = Self(0x809A_0000);
    /// Secure channel was closed.
    pub const BAD_SECURE_CHANNEL_CLOSED: Self = Self(0x8086_0000);
    /// Transport connection was closed.
    pub const BAD_CONNECTION_CLOSED: Self = Self(0x80AE_0000);

    /// Returns `true` for good status.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` for uncertain status.
    #[inline]
    pub fn is_uncertain(&self) -> bool {
        self.0 & 0x4000_0000 != 0 && self.0 & 0x8000_0000 == 0
    }

    /// Returns `true` for bad status.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Symbolic name, when known.
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::GOOD => "Good",
            Self::UNCERTAIN => "Uncertain",
            Self::UNCERTAIN_LAST_USABLE_VALUE => "UncertainLastUsableValue",
            Self::BAD => "Bad",
            Self::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            Self::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            Self::BAD_TIMEOUT => "BadTimeout",
            Self::BAD_SERVICE_UNSUPPORTED => "BadServiceUnsupported",
            Self::BAD_SHUTDOWN => "BadShutdown",
            Self::BAD_SERVER_NOT_CONNECTED => "BadServerNotConnected",
            Self::BAD_USER_ACCESS_DENIED => "BadUserAccessDenied",
            Self::BAD_SESSION_CLOSED => "BadSessionClosed",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_NO_DATA => "BadNoData",
            Self::BAD_NOT_WRITABLE => "BadNotWritable",
            Self::BAD_OUT_OF_RANGE => "BadOutOfRange",
            Self::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            Self::BAD_EVENT_ID_UNKNOWN => "BadEventIdUnknown",
            Self::BAD_SECURE_CHANNEL_CLOSED => "BadSecureChannelClosed",
            Self::BAD_CONNECTION_CLOSED => "BadConnectionClosed",
            _ => return None,
        };
        Some(name)
    }

    /// Quality of a value reported with this status.
    pub fn to_quality(&self) -> Quality {
        if self.is_bad() {
            Quality::Bad(self.to_string())
        } else if self.is_uncertain() {
            Quality::Uncertain(self.to_string())
        } else {
            Quality::Good
        }
    }

    /// Error for a failed service call; `address` names the affected item.
    pub fn to_client_error(&self, address: Option<&str>, message: &str) -> ClientError {
        let detail = if message.is_empty() {
            self.to_string()
        } else {
            format!("{}: {}", self, message)
        };
        let address = address.unwrap_or_default();

        match *self {
            Self::BAD_TIMEOUT => ClientError::Timeout {
                duration: std::time::Duration::ZERO,
            },
            Self::BAD_COMMUNICATION_ERROR
            | Self::BAD_CONNECTION_CLOSED
            | Self::BAD_SERVER_NOT_CONNECTED
            | Self::BAD_SHUTDOWN => ClientError::communication(detail),
            Self::BAD_SESSION_CLOSED => ClientError::session_closed(detail),
            Self::BAD_SECURE_CHANNEL_CLOSED => ClientError::channel_closed(detail),
            Self::BAD_NODE_ID_UNKNOWN => ClientError::address_not_found(address),
            Self::BAD_NOT_WRITABLE
            | Self::BAD_USER_ACCESS_DENIED
            | Self::BAD_TYPE_MISMATCH
            | Self::BAD_OUT_OF_RANGE => ClientError::write_failed(address, detail),
            _ => ClientError::BadStatus {
                code: self.0,
                message: detail,
            },
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bits() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::UNCERTAIN_LAST_USABLE_VALUE.is_uncertain());
        assert!(!StatusCode::UNCERTAIN_LAST_USABLE_VALUE.is_bad());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert!(!StatusCode::BAD_TIMEOUT.is_uncertain());
    }

    #[test]
    fn test_quality_mapping() {
        assert_eq!(StatusCode::GOOD.to_quality(), Quality::Good);
        assert_eq!(
            StatusCode::UNCERTAIN.to_quality(),
            Quality::Uncertain("Uncertain".into())
        );
        assert_eq!(
            StatusCode(0x8099_0001).to_quality(),
            Quality::Bad("0x80990001".into())
        );
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            StatusCode::BAD_TIMEOUT.to_client_error(None, ""),
            ClientError::Timeout { .. }
        ));
        assert!(StatusCode::BAD_CONNECTION_CLOSED.to_client_error(None, "").is_transient());
        assert!(matches!(
            StatusCode::BAD_SESSION_CLOSED.to_client_error(None, ""),
            ClientError::SessionClosed { .. }
        ));
        assert!(matches!(
            StatusCode::BAD_NODE_ID_UNKNOWN.to_client_error(Some("ns=2;s=X"), ""),
            ClientError::AddressNotFound { ref address } if address == "ns=2;s=X"
        ));
        let err = StatusCode::BAD_NOT_WRITABLE.to_client_error(Some("ns=2;s=X"), "");
        assert!(matches!(err, ClientError::WriteFailed { .. }));
        assert!(!err.is_transient());
    }
}
