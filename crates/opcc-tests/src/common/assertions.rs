// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Assertion helpers with failure messages that name the tag and server.

use opcc_client::WriteResult;
use opcc_core::types::{DataPoint, Quality, Value};

// =============================================================================
// DataPoint Assertions
// =============================================================================

/// Assertion extensions for [`DataPoint`].
pub trait DataPointAssertions {
    /// Assert that the data point has good quality.
    fn assert_good_quality(&self);

    /// Assert that the value matches.
    fn assert_value(&self, expected: &Value);

    /// Assert that the numeric value is within `tolerance` of `expected`.
    fn assert_value_approx(&self, expected: f64, tolerance: f64);

    /// Assert server and tag ids.
    fn assert_identity(&self, server_id: &str, tag_id: &str);
}

impl DataPointAssertions for DataPoint {
    fn assert_good_quality(&self) {
        assert_eq!(
            self.quality,
            Quality::Good,
            "Expected Good quality, but got {:?} for {}:{}",
            self.quality,
            self.server_id,
            self.tag_id
        );
    }

    fn assert_value(&self, expected: &Value) {
        assert_eq!(
            &self.value, expected,
            "Value mismatch for {}:{}",
            self.server_id, self.tag_id
        );
    }

    fn assert_value_approx(&self, expected: f64, tolerance: f64) {
        let actual = self
            .value
            .as_f64()
            .unwrap_or_else(|| panic!("Value {:?} of {} is not numeric", self.value, self.tag_id));
        assert!(
            (actual - expected).abs() <= tolerance,
            "Value {} of {} not within {} of {}",
            actual,
            self.tag_id,
            tolerance,
            expected
        );
    }

    fn assert_identity(&self, server_id: &str, tag_id: &str) {
        assert_eq!(self.server_id.as_str(), server_id, "Server id mismatch");
        assert_eq!(self.tag_id.as_str(), tag_id, "Tag id mismatch");
    }
}

/// Numeric values of `points`, in order.
pub fn numeric_values(points: &[DataPoint]) -> Vec<f64> {
    points.iter().filter_map(|p| p.value.as_f64()).collect()
}

// =============================================================================
// Write Assertions
// =============================================================================

/// Assertion extensions for [`WriteResult`].
pub trait WriteResultAssertions {
    /// Assert that the request and every item succeeded.
    fn assert_success(&self);

    /// Assert that the request failed with the given error type.
    fn assert_failure(&self, error_type: &str);
}

impl WriteResultAssertions for WriteResult {
    fn assert_success(&self) {
        assert!(self.is_success(), "Expected successful write, got: {}", self);
    }

    fn assert_failure(&self, error_type: &str) {
        match &self.failure {
            Some(failure) => assert_eq!(
                failure.error_type(),
                error_type,
                "Unexpected failure: {}",
                failure
            ),
            None => panic!("Expected {} failure, got: {}", error_type, self),
        }
    }
}
