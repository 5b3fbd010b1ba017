// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use opcc_config::{TagDefinition, ValidationRule};
use opcc_core::types::{TagId, Value};
use serde::{Deserialize, Serialize};

use super::WriteRequest;
use crate::tags::{to_raw, TagRegistry};

/// Kind of validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The request has no items.
    EmptyRequest,
    /// The tag is not configured.
    UnknownTag,
    /// The tag belongs to another server.
    WrongServer,
    /// The tag is read-only.
    NotWritable,
    /// The value does not fit the tag's data type.
    TypeMismatch,
    /// The value is outside the configured range.
    OutOfRange,
}

/// One reason a write was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Offending tag, if the issue is item-specific.
    pub tag_id: Option<TagId>,
    /// Kind.
    pub kind: IssueKind,
    /// Human-readable message.
    pub message: String,
}

impl ValidationIssue {
    fn new(tag_id: Option<&TagId>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.cloned(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag_id {
            Some(tag) => write!(f, "{}: {}", tag, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// An item that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedItem {
    /// Target tag.
    pub tag: TagDefinition,
    /// Requested engineering value.
    pub value: Value,
    /// Raw value sent to the device.
    pub raw: Value,
}

/// Checks write requests against tag definitions and range rules.
#[derive(Debug, Clone)]
pub struct WriteValidator {
    tags: Arc<TagRegistry>,
    rules: HashMap<TagId, ValidationRule>,
}

impl WriteValidator {
    /// Creates a validator.
    pub fn new(tags: Arc<TagRegistry>, rules: &[ValidationRule]) -> Self {
        Self {
            tags,
            rules: rules.iter().map(|r| (r.tag_id.clone(), r.clone())).collect(),
        }
    }

    /// Validates every item, collecting all issues.
    ///
    /// Ranges apply to the engineering value; type compatibility is checked
    /// on the raw value after unscaling.
    pub fn validate(&self, request: &WriteRequest) -> Result<Vec<ValidatedItem>, Vec<ValidationIssue>> {
        if request.items.is_empty() {
            return Err(vec![ValidationIssue::new(
                None,
                IssueKind::EmptyRequest,
                "write request has no items",
            )]);
        }

        let mut issues = Vec::new();
        let mut items = Vec::with_capacity(request.items.len());

        for (tag_id, value) in &request.items {
            let Some(tag) = self.tags.get(tag_id) else {
                issues.push(ValidationIssue::new(Some(tag_id), IssueKind::UnknownTag, "unknown tag"));
                continue;
            };
            if tag.server_id != request.server_id {
                issues.push(ValidationIssue::new(
                    Some(tag_id),
                    IssueKind::WrongServer,
                    format!("tag belongs to server '{}'", tag.server_id),
                ));
                continue;
            }
            if !tag.writable {
                issues.push(ValidationIssue::new(Some(tag_id), IssueKind::NotWritable, "tag is read-only"));
                continue;
            }

            let raw = match to_raw(tag, value) {
                Some(raw) if tag.data_type.accepts(&raw) => raw,
                _ => {
                    issues.push(ValidationIssue::new(
                        Some(tag_id),
                        IssueKind::TypeMismatch,
                        format!("{} value {} is not valid for {} tag", value.type_name(), value, tag.data_type),
                    ));
                    continue;
                }
            };

            if let Some(issue) = self.check_range(tag_id, value) {
                issues.push(issue);
                continue;
            }

            let raw = match raw.as_f64() {
                Some(v) if tag.data_type.is_numeric() => tag.data_type.coerce_f64(v),
                _ => raw,
            };
            items.push(ValidatedItem {
                tag: tag.clone(),
                value: value.clone(),
                raw,
            });
        }

        if issues.is_empty() {
            Ok(items)
        } else {
            Err(issues)
        }
    }

    fn check_range(&self, tag_id: &TagId, value: &Value) -> Option<ValidationIssue> {
        let rule = self.rules.get(tag_id)?;
        let v = value.as_f64().filter(|_| value.is_numeric())?;

        let below = rule.min.filter(|min| v < *min);
        let above = rule.max.filter(|max| v > *max);
        match (below, above) {
            (Some(min), _) => Some(ValidationIssue::new(
                Some(tag_id),
                IssueKind::OutOfRange,
                format!("value {} is below minimum {}", v, min),
            )),
            (_, Some(max)) => Some(ValidationIssue::new(
                Some(tag_id),
                IssueKind::OutOfRange,
                format!("value {} is above maximum {}", v, max),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_core::types::DataType;

    use crate::write::WriteContext;

    fn validator() -> WriteValidator {
        let mut setpoint = TagDefinition::new("setpoint", "plc", "ns=2;s=SP");
        setpoint.writable = true;
        let mut level = TagDefinition::new("level", "plc", "40001");
        level.data_type = DataType::Int16;
        level.scale = 0.1;
        level.writable = true;
        let mut mode = TagDefinition::new("mode", "plc", "ns=2;s=Mode");
        mode.data_type = DataType::String;
        mode.writable = true;
        let status = TagDefinition::new("status", "plc", "ns=2;s=Status");
        let mut remote = TagDefinition::new("remote", "other", "x");
        remote.writable = true;

        WriteValidator::new(
            Arc::new(TagRegistry::new(vec![setpoint, level, mode, status, remote])),
            &[ValidationRule {
                tag_id: TagId::new("setpoint"),
                min: Some(0.0),
                max: Some(100.0),
            }],
        )
    }

    fn request() -> WriteRequest {
        WriteRequest::new("plc", WriteContext::new("alice"))
    }

    #[test]
    fn test_valid_request() {
        let items = validator()
            .validate(&request().with_item("setpoint", Value::Float64(42.0)).with_item("level", Value::Float64(12.5)))
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].raw, Value::Int16(125));
    }

    #[test]
    fn test_collects_every_issue() {
        let issues = validator()
            .validate(
                &request()
                    .with_item("setpoint", Value::Float64(142.0))
                    .with_item("status", Value::Bool(true))
                    .with_item("missing", Value::Int32(1))
                    .with_item("remote", Value::Int32(1))
                    .with_item("mode", Value::Int32(1)),
            )
            .unwrap_err();
        let kinds: Vec<_> = issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::OutOfRange,
                IssueKind::NotWritable,
                IssueKind::UnknownTag,
                IssueKind::WrongServer,
                IssueKind::TypeMismatch,
            ]
        );
        assert!(issues[0].to_string().contains("above maximum 100"));
    }

    #[test]
    fn test_integer_overflow_after_unscaling() {
        // 5000 / 0.1 does not fit an i16
        let issues = validator()
            .validate(&request().with_item("level", Value::Float64(5000.0)))
            .unwrap_err();
        assert_eq!(issues[0].kind, IssueKind::TypeMismatch);
    }

    #[test]
    fn test_empty_request() {
        let issues = validator().validate(&request()).unwrap_err();
        assert_eq!(issues[0].kind, IssueKind::EmptyRequest);
        assert!(issues[0].tag_id.is_none());
    }
}
