// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Tag registry and engineering-unit scaling.

use std::collections::HashMap;

use opcc_config::TagDefinition;
use opcc_core::types::{ServerId, TagId, Value};

/// Immutable lookup of configured tags.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: HashMap<TagId, TagDefinition>,
    by_address: HashMap<(ServerId, String), TagId>,
}

impl TagRegistry {
    /// Builds the registry from tag definitions. Later duplicates win.
    pub fn new(tags: impl IntoIterator<Item = TagDefinition>) -> Self {
        let mut registry = Self::default();
        for tag in tags {
            registry
                .by_address
                .insert((tag.server_id.clone(), tag.address.clone()), tag.id.clone());
            registry.tags.insert(tag.id.clone(), tag);
        }
        registry
    }

    /// Returns the tag with `id`.
    pub fn get(&self, id: &TagId) -> Option<&TagDefinition> {
        self.tags.get(id)
    }

    /// Returns the tag bound to `address` on `server_id`.
    pub fn by_address(&self, server_id: &ServerId, address: &str) -> Option<&TagDefinition> {
        self.by_address
            .get(&(server_id.clone(), address.to_string()))
            .and_then(|id| self.tags.get(id))
    }

    /// Tags of one server.
    pub fn for_server<'a>(&'a self, server_id: &'a ServerId) -> impl Iterator<Item = &'a TagDefinition> + 'a {
        self.tags.values().filter(move |t| &t.server_id == server_id)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if no tags are configured.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Converts a raw device value into engineering units.
///
/// Numeric values of a scaled tag become `raw * scale + offset`, coerced to
/// `Float64`. Everything else passes through untouched.
pub fn to_engineering(tag: &TagDefinition, raw: Value) -> Value {
    if !tag.has_scaling() {
        return raw;
    }
    match raw.as_f64() {
        Some(v) if raw.is_numeric() => Value::Float64(tag.to_engineering(v)),
        _ => raw,
    }
}

/// Converts an engineering value into the raw value written to the device.
///
/// Numeric values of a scaled tag are unscaled and coerced to the tag's data
/// type. Returns `None` when the unscaled value does not fit that type.
pub fn to_raw(tag: &TagDefinition, engineering: &Value) -> Option<Value> {
    if !tag.data_type.is_numeric() || !engineering.is_numeric() || !tag.has_scaling() {
        return Some(engineering.clone());
    }
    let raw = tag.to_raw(engineering.as_f64()?);
    let raw = if tag.data_type.is_integer() { raw.round() } else { raw };
    let (low, high) = tag.data_type.numeric_bounds()?;
    (raw.is_finite() && raw >= low && raw <= high).then(|| tag.data_type.coerce_f64(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcc_core::types::DataType;

    fn scaled() -> TagDefinition {
        let mut tag = TagDefinition::new("temp", "plc", "ns=2;s=Temp");
        tag.data_type = DataType::Int16;
        tag.scale = 0.1;
        tag.offset = -40.0;
        tag
    }

    #[test]
    fn test_lookup() {
        let registry = TagRegistry::new(vec![
            scaled(),
            TagDefinition::new("flow", "hist", "Flow"),
        ]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&TagId::new("temp")).is_some());
        assert_eq!(
            registry.by_address(&ServerId::new("hist"), "Flow").unwrap().id,
            TagId::new("flow")
        );
        assert!(registry.by_address(&ServerId::new("plc"), "Flow").is_none());
        assert_eq!(registry.for_server(&ServerId::new("plc")).count(), 1);
    }

    #[test]
    fn test_scaling_both_ways() {
        let tag = scaled();
        assert_eq!(to_engineering(&tag, Value::Int16(650)), Value::Float64(25.0));
        assert_eq!(to_raw(&tag, &Value::Float64(25.0)), Some(Value::Int16(650)));
        assert_eq!(to_raw(&tag, &Value::Float64(5000.0)), None);
        assert_eq!(to_engineering(&tag, Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_unscaled_values_pass_through() {
        let tag = TagDefinition::new("flow", "hist", "Flow");
        assert_eq!(to_engineering(&tag, Value::Int32(7)), Value::Int32(7));
        assert_eq!(to_raw(&tag, &Value::Float64(1.5)), Some(Value::Float64(1.5)));
    }
}
