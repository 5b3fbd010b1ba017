// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

use opcc_core::types::{DeadbandSettings, DeadbandType, EuRange, Quality, Value};

use super::SubscriptionError;

/// Client-side deadband filter of one monitored item.
///
/// Compares each numeric good-quality value, in engineering units, against
/// the last reported one. The first value, non-numeric values and values of
/// non-good quality are always reported.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadbandFilter {
    settings: DeadbandSettings,
    threshold: f64,
    last_reported: Option<f64>,
}

impl DeadbandFilter {
    /// Validates `settings` and builds the filter.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::Configuration`] for negative thresholds, percent
    /// values above 100 and percent deadbands without an EU range.
    pub fn new(settings: DeadbandSettings, eu_range: Option<EuRange>) -> Result<Self, SubscriptionError> {
        if !settings.value.is_finite() || settings.value < 0.0 {
            return Err(SubscriptionError::configuration(format!(
                "deadband value must be a non-negative number, got {}",
                settings.value
            )));
        }

        let threshold = match settings.kind {
            DeadbandType::None => 0.0,
            DeadbandType::Absolute => settings.value,
            DeadbandType::Percent => {
                if settings.value > 100.0 {
                    return Err(SubscriptionError::configuration(format!(
                        "percent deadband must be at most 100, got {}",
                        settings.value
                    )));
                }
                let range = eu_range.ok_or_else(|| {
                    SubscriptionError::configuration("percent deadband requires an EU range")
                })?;
                settings.value / 100.0 * (range.high - range.low)
            }
        };

        Ok(Self {
            settings,
            threshold,
            last_reported: None,
        })
    }

    /// Settings sent to the server.
    pub fn settings(&self) -> DeadbandSettings {
        self.settings
    }

    /// Absolute change required to report.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decides whether an engineering-unit value is reported, remembering it if so.
    pub fn should_report(&mut self, value: &Value, quality: &Quality) -> bool {
        let numeric = if value.is_numeric() { value.as_f64() } else { None };
        let Some(current) = numeric else {
            return true;
        };
        if !quality.is_good() {
            return true;
        }

        let report = match (self.settings.kind, self.last_reported) {
            (DeadbandType::None, _) | (_, None) => true,
            (_, Some(last)) => (current - last).abs() > self.threshold,
        };
        if report {
            self.last_reported = Some(current);
        }
        report
    }

    /// Forgets the last reported value.
    pub fn reset(&mut self) {
        self.last_reported = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reported(filter: &mut DeadbandFilter, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .copied()
            .filter(|v| filter.should_report(&Value::Float64(*v), &Quality::Good))
            .collect()
    }

    #[test]
    fn test_absolute() {
        let mut filter = DeadbandFilter::new(DeadbandSettings::absolute(5.0), None).unwrap();
        assert_eq!(reported(&mut filter, &[10.0, 12.0, 20.0]), vec![10.0, 20.0]);
        // exactly at the threshold is not reported
        assert_eq!(reported(&mut filter, &[25.0, 25.1]), vec![25.1]);
    }

    #[test]
    fn test_percent_uses_eu_range() {
        let mut filter =
            DeadbandFilter::new(DeadbandSettings::percent(10.0), Some(EuRange::new(0.0, 200.0))).unwrap();
        assert_eq!(filter.threshold(), 20.0);
        assert_eq!(reported(&mut filter, &[100.0, 115.0, 121.0, 100.5]), vec![100.0, 121.0, 100.5]);
    }

    #[test]
    fn test_percent_without_range_is_rejected() {
        let err = DeadbandFilter::new(DeadbandSettings::percent(5.0), None).unwrap_err();
        assert!(matches!(err, SubscriptionError::Configuration { .. }));
        assert!(DeadbandFilter::new(DeadbandSettings::percent(150.0), Some(EuRange::new(0.0, 1.0))).is_err());
        assert!(DeadbandFilter::new(DeadbandSettings::absolute(-1.0), None).is_err());
    }

    #[test]
    fn test_none_reports_everything() {
        let mut filter = DeadbandFilter::new(DeadbandSettings::none(), None).unwrap();
        assert_eq!(reported(&mut filter, &[1.0, 1.0, 1.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_non_numeric_and_bad_quality_pass() {
        let mut filter = DeadbandFilter::new(DeadbandSettings::absolute(100.0), None).unwrap();
        assert!(filter.should_report(&Value::Float64(1.0), &Quality::Good));
        assert!(filter.should_report(&Value::String("x".into()), &Quality::Good));
        assert!(filter.should_report(&Value::Float64(2.0), &Quality::Bad("BadSensorFailure".into())));
        assert!(!filter.should_report(&Value::Float64(3.0), &Quality::Good));

        filter.reset();
        assert!(filter.should_report(&Value::Float64(3.0), &Quality::Good));
    }
}
