// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for the OPC client core.
//!
//! These types are protocol-agnostic: the UA, HDA and AC adapters all convert
//! their native representations into [`Value`], [`Quality`], [`DataPoint`] and
//! [`AlarmEvent`] before anything leaves the protocol layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a configured OPC server connection.
///
/// # Examples
///
/// ```
/// use opcc_core::types::ServerId;
///
/// let id = ServerId::new("plant-ua-01");
/// assert_eq!(id.as_str(), "plant-ua-01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Creates a new server id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Client-local identifier of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(String);

impl TagId {
    /// Creates a new tag id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TagId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TagId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TagId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Client-side handle of a subscription.
///
/// Allocated by the subscription manager; the protocol-level subscription id
/// is tracked separately because it changes across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a subscription id from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// =============================================================================
// ProtocolKind
// =============================================================================

/// The OPC protocol family a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// OPC Unified Architecture.
    Ua,
    /// OPC Historical Data Access.
    Hda,
    /// OPC Alarms & Conditions.
    Ac,
}

impl ProtocolKind {
    /// Returns the canonical lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ua => "ua",
            Self::Hda => "hda",
            Self::Ac => "ac",
        }
    }

    /// Endpoint URL schemes accepted for this protocol.
    pub const fn endpoint_schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Ua => &["opc.tcp", "opc.https", "https"],
            Self::Hda => &["opc.hda", "opc.com"],
            Self::Ac => &["opc.ae", "opc.com"],
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ua" | "opcua" | "opc-ua" | "opc_ua" => Ok(Self::Ua),
            "hda" | "opchda" | "opc-hda" | "opc_hda" => Ok(Self::Hda),
            "ac" | "ae" | "opcac" | "opc-ac" | "opc_ac" | "opc-ae" => Ok(Self::Ac),
            other => Err(ClientError::configuration(format!(
                "unsupported protocol variant '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed value read from or written to an OPC server.
///
/// # Examples
///
/// ```
/// use opcc_core::types::Value;
///
/// let v = Value::Float64(25.5);
/// assert_eq!(v.as_f64(), Some(25.5));
/// assert_eq!(Value::from(42i32).type_name(), "int32");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// Array of values.
    Array(Vec<Value>),
    /// Empty variant.
    #[default]
    Null,
}

impl Value {
    /// Returns the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Null => "null",
        }
    }

    /// Returns `true` for the empty variant.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for integer and float variants.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int16(_)
                | Value::Int32(_)
                | Value::Int64(_)
                | Value::UInt16(_)
                | Value::UInt32(_)
                | Value::UInt64(_)
                | Value::Float32(_)
                | Value::Float64(_)
        )
    }

    /// Returns the boolean payload.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt16(v) => Some(*v as f64),
            Value::UInt32(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of the value; floats with a fractional part yield `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Float32(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Float64(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the string payload.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Array(v) => write!(f, "[{} elements]", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int16, i16);
impl_from_for_value!(Int32, i32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(UInt16, u16);
impl_from_for_value!(UInt32, u32);
impl_from_for_value!(UInt64, u64);
impl_from_for_value!(Float32, f32);
impl_from_for_value!(Float64, f64);
impl_from_for_value!(String, String);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

// =============================================================================
// DataType
// =============================================================================

/// Declared data type of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Boolean.
    Bool,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 16-bit integer.
    #[serde(rename = "uint16")]
    UInt16,
    /// Unsigned 32-bit integer.
    #[serde(rename = "uint32")]
    UInt32,
    /// Unsigned 64-bit integer.
    #[serde(rename = "uint64")]
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    #[default]
    Float64,
    /// String.
    String,
    /// Byte string.
    Bytes,
    /// Timestamp.
    #[serde(rename = "datetime")]
    DateTime,
}

impl DataType {
    /// Returns `true` for integer and float types.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
                | Self::Float32
                | Self::Float64
        )
    }

    /// Returns `true` for integer types.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Int16 | Self::Int32 | Self::Int64 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    /// Inclusive numeric bounds representable by this type.
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Int16 => Some((i16::MIN as f64, i16::MAX as f64)),
            Self::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            Self::Int64 => Some((i64::MIN as f64, i64::MAX as f64)),
            Self::UInt16 => Some((0.0, u16::MAX as f64)),
            Self::UInt32 => Some((0.0, u32::MAX as f64)),
            Self::UInt64 => Some((0.0, u64::MAX as f64)),
            Self::Float32 => Some((f32::MIN as f64, f32::MAX as f64)),
            Self::Float64 => Some((f64::MIN, f64::MAX)),
            _ => None,
        }
    }

    /// Returns `true` if `value` can be written to a tag of this type.
    ///
    /// Numeric values are accepted for any numeric type as long as they fit;
    /// integer targets reject fractional values.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::String => matches!(value, Value::String(_)),
            Self::Bytes => matches!(value, Value::Bytes(_)),
            Self::DateTime => matches!(value, Value::DateTime(_)),
            numeric => {
                if !value.is_numeric() {
                    return false;
                }
                if numeric.is_integer() && value.as_i64().is_none() {
                    return false;
                }
                match (numeric.numeric_bounds(), value.as_f64()) {
                    (Some((lo, hi)), Some(v)) => v >= lo && v <= hi,
                    _ => false,
                }
            }
        }
    }

    /// Converts a numeric engineering value into this type's variant.
    pub fn coerce_f64(&self, raw: f64) -> Value {
        match self {
            Self::Bool => Value::Bool(raw != 0.0),
            Self::Int16 => Value::Int16(raw.round() as i16),
            Self::Int32 => Value::Int32(raw.round() as i32),
            Self::Int64 => Value::Int64(raw.round() as i64),
            Self::UInt16 => Value::UInt16(raw.round().max(0.0) as u16),
            Self::UInt32 => Value::UInt32(raw.round().max(0.0) as u32),
            Self::UInt64 => Value::UInt64(raw.round().max(0.0) as u64),
            Self::Float32 => Value::Float32(raw as f32),
            _ => Value::Float64(raw),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::DateTime => "datetime",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Quality
// =============================================================================

/// Quality of a reported value, derived from the OPC status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "reason")]
pub enum Quality {
    /// Value is reliable.
    #[default]
    Good,
    /// Value may be stale or imprecise.
    Uncertain(String),
    /// Value is not usable.
    Bad(String),
}

impl Quality {
    /// Returns `true` for good quality.
    pub fn is_good(&self) -> bool {
        matches!(self, Quality::Good)
    }

    /// Returns `true` for bad quality.
    pub fn is_bad(&self) -> bool {
        matches!(self, Quality::Bad(_))
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Good => write!(f, "good"),
            Quality::Uncertain(r) => write!(f, "uncertain ({})", r),
            Quality::Bad(r) => write!(f, "bad ({})", r),
        }
    }
}

// =============================================================================
// DataPoint
// =============================================================================

/// A single timestamped value for a tag.
///
/// Never mutated after creation; the buffer and sinks pass it along as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Server the value came from.
    pub server_id: ServerId,
    /// Tag the value belongs to.
    pub tag_id: TagId,
    /// The value in engineering units.
    pub value: Value,
    /// Quality of the value.
    pub quality: Quality,
    /// Time the client received the value.
    pub timestamp: DateTime<Utc>,
    /// Time the source produced the value, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl DataPoint {
    /// Creates a data point stamped with the current time.
    pub fn new(server_id: ServerId, tag_id: TagId, value: Value, quality: Quality) -> Self {
        Self {
            server_id,
            tag_id,
            value,
            quality,
            timestamp: Utc::now(),
            source_timestamp: None,
        }
    }

    /// Sets the receive timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the source timestamp.
    pub fn with_source_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.source_timestamp = timestamp;
        self
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} = {} [{}] @ {}",
            self.server_id,
            self.tag_id,
            self.value,
            self.quality,
            self.timestamp.to_rfc3339()
        )
    }
}

// =============================================================================
// AlarmEvent
// =============================================================================

/// Acknowledgement state of an alarm condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckState {
    /// Awaiting operator acknowledgement.
    #[default]
    Unacknowledged,
    /// Acknowledged.
    Acknowledged,
}

/// An alarm or condition event reported by an AC server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Server the event came from.
    pub server_id: ServerId,
    /// Server-assigned event id, used for acknowledgement.
    pub event_id: String,
    /// Source (area or equipment) of the condition.
    pub source_id: String,
    /// Human-readable message.
    pub message: String,
    /// Severity, 1 (lowest) to 1000 (highest).
    pub severity: u16,
    /// Acknowledgement state.
    pub ack_state: AckState,
    /// Time the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl AlarmEvent {
    /// Maximum OPC event severity.
    pub const MAX_SEVERITY: u16 = 1000;

    /// Returns the severity clamped into the valid 1..=1000 range.
    pub fn clamped_severity(&self) -> u16 {
        self.severity.clamp(1, Self::MAX_SEVERITY)
    }
}

// =============================================================================
// Deadband
// =============================================================================

/// Deadband filter kind for a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandType {
    /// Report every change.
    #[default]
    None,
    /// Report when the change exceeds a fixed amount.
    Absolute,
    /// Report when the change exceeds a percentage of the EU range.
    Percent,
}

/// Engineering-unit range of an analog tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EuRange {
    /// Lower bound.
    pub low: f64,
    /// Upper bound.
    pub high: f64,
}

impl EuRange {
    /// Creates a new range.
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Width of the range.
    pub fn span(&self) -> f64 {
        (self.high - self.low).abs()
    }
}

/// Deadband settings as sent to the server with a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DeadbandSettings {
    /// Filter kind.
    #[serde(rename = "type")]
    pub kind: DeadbandType,
    /// Threshold; absolute units or percent depending on `kind`.
    #[serde(default)]
    pub value: f64,
}

impl DeadbandSettings {
    /// No filtering.
    pub const fn none() -> Self {
        Self {
            kind: DeadbandType::None,
            value: 0.0,
        }
    }

    /// Absolute deadband.
    pub const fn absolute(value: f64) -> Self {
        Self {
            kind: DeadbandType::Absolute,
            value,
        }
    }

    /// Percent deadband.
    pub const fn percent(value: f64) -> Self {
        Self {
            kind: DeadbandType::Percent,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_kind_parsing() {
        assert_eq!("UA".parse::<ProtocolKind>().unwrap(), ProtocolKind::Ua);
        assert_eq!("opc-hda".parse::<ProtocolKind>().unwrap(), ProtocolKind::Hda);
        assert_eq!("ae".parse::<ProtocolKind>().unwrap(), ProtocolKind::Ac);

        let err = "modbus".parse::<ProtocolKind>().unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_data_type_accepts() {
        assert!(DataType::Float64.accepts(&Value::Int32(42)));
        assert!(DataType::Int16.accepts(&Value::Float64(12.0)));
        assert!(!DataType::Int16.accepts(&Value::Float64(12.5)));
        assert!(!DataType::Int16.accepts(&Value::Int32(70_000)));
        assert!(!DataType::UInt32.accepts(&Value::Int32(-1)));
        assert!(!DataType::Bool.accepts(&Value::Int32(1)));
        assert!(DataType::String.accepts(&Value::from("on")));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(DataType::Int32.coerce_f64(41.6), Value::Int32(42));
        assert_eq!(DataType::Float64.coerce_f64(1.5), Value::Float64(1.5));
        assert_eq!(DataType::Bool.coerce_f64(0.0), Value::Bool(false));
    }

    #[test]
    fn test_value_serde() {
        let v = Value::Float64(25.5);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"Float64","value":25.5}"#);
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId::new(7).to_string(), "sub-7");
    }

    #[test]
    fn test_alarm_severity_clamped() {
        let event = AlarmEvent {
            server_id: ServerId::new("ac"),
            event_id: "e1".into(),
            source_id: "boiler".into(),
            message: "High temperature".into(),
            severity: 1500,
            ack_state: AckState::Unacknowledged,
            timestamp: Utc::now(),
        };
        assert_eq!(event.clamped_severity(), 1000);
    }
}
