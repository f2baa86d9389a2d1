//! Correctness oracle for growth figures.
//!
//! Recomputes the compound growth rate and every scenario forecast from the
//! measured period values and compares them with what was reported.
//! Mismatches are reported, never adjusted.

use serde::{Deserialize, Serialize};

use crate::financial::{FinancialResult, Scenario};

/// Percentage points.
pub const GROWTH_TOLERANCE_PCT: f64 = 0.01;
/// Currency units.
pub const FORECAST_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub checks: usize,
    pub mismatches: Vec<String>,
}

/// `(end / start)^(1 / periods) - 1`, undefined unless start is positive,
/// end is non-negative and at least one period elapsed.
pub fn expected_growth_fraction(start_value: f64, end_value: f64, periods: i32) -> Option<f64> {
    if start_value <= 0.0 || end_value < 0.0 || periods <= 0 {
        return None;
    }
    Some((end_value / start_value).powf(1.0 / periods as f64) - 1.0)
}

/// `value × (1 + rate)^years_ahead`
pub fn expected_forecast(value: f64, rate: f64, years_ahead: i32) -> f64 {
    value * (1.0 + rate).powi(years_ahead)
}

pub fn validate(result: &FinancialResult) -> ValidationReport {
    let mut checks = 0;
    let mut mismatches = Vec::new();

    let (Some(start), Some(end)) = (result.start_value, result.end_value) else {
        return ValidationReport {
            passed: false,
            checks,
            mismatches: vec!["period values are missing".to_string()],
        };
    };

    let periods = result.end_period - result.start_period;
    let Some(expected) = expected_growth_fraction(start, end, periods) else {
        return ValidationReport {
            passed: false,
            checks,
            mismatches: vec!["growth rate is undefined for these period values".to_string()],
        };
    };

    let mut check_pct = |label: &str, reported: Option<f64>, expected_fraction: f64| {
        checks += 1;
        match reported {
            Some(r) if (r - expected_fraction * 100.0).abs() <= GROWTH_TOLERANCE_PCT => {}
            Some(r) => mismatches.push(format!(
                "{}: reported {:.4}%, expected {:.4}%",
                label,
                r,
                expected_fraction * 100.0
            )),
            None => mismatches.push(format!("{}: not reported", label)),
        }
    };

    check_pct("growth rate", result.growth_rate, expected);
    check_pct("growth fraction", result.growth_fraction.map(|f| f * 100.0), expected);

    for scenario in Scenario::ALL {
        let expected_rate = expected * scenario.factor();
        let Some(reported) = result.scenario(scenario) else {
            if !result.forecasts.is_empty() {
                checks += 1;
                mismatches.push(format!("{} scenario: not reported", scenario));
            }
            continue;
        };

        checks += 1;
        if (reported.rate - expected_rate).abs() * 100.0 > GROWTH_TOLERANCE_PCT {
            mismatches.push(format!(
                "{} rate: reported {:.6}, expected {:.6}",
                scenario, reported.rate, expected_rate
            ));
        }

        for (&period, &value) in &reported.values {
            checks += 1;
            let want = expected_forecast(end, expected_rate, period - result.end_period);
            if (value - want).abs() > FORECAST_TOLERANCE {
                mismatches.push(format!(
                    "{} forecast {}: reported {:.2}, expected {:.2}",
                    scenario, period, value, want
                ));
            }
        }
    }

    if let Some(base) = result.scenario(Scenario::Base) {
        checks += 1;
        if base.values != result.forecasts {
            mismatches.push("base forecasts differ from reported forecasts".to_string());
        }
    }

    ValidationReport {
        passed: mismatches.is_empty(),
        checks,
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::financial::{FinancialFailure, ScenarioForecast};
    use std::collections::BTreeMap;

    fn reported(start: f64, end: f64, fraction: f64) -> FinancialResult {
        let mut result = FinancialResult::failed(2023, 2024, FinancialFailure::Execution, "");
        result.success = true;
        result.failure = None;
        result.start_value = Some(start);
        result.end_value = Some(end);
        result.growth_fraction = Some(fraction);
        result.growth_rate = Some(fraction * 100.0);
        for scenario in Scenario::ALL {
            let rate = fraction * scenario.factor();
            let mut values = BTreeMap::new();
            values.insert(2025, expected_forecast(end, rate, 1));
            result.scenarios.push(ScenarioForecast { scenario, rate, values });
        }
        result.forecasts = result.scenarios[0].values.clone();
        result
    }

    #[test]
    fn test_expected_figures() {
        let g = expected_growth_fraction(100.0, 121.0, 1).unwrap();
        assert!((g - 0.21).abs() < 1e-12);
        let g2 = expected_growth_fraction(100.0, 121.0, 2).unwrap();
        assert!((g2 - 0.10).abs() < 1e-12);
        assert!((expected_forecast(121.0, 0.21, 1) - 146.41).abs() < 1e-9);
        assert_eq!(expected_growth_fraction(0.0, 10.0, 1), None);
        assert_eq!(expected_growth_fraction(10.0, 20.0, 0), None);
    }

    #[test]
    fn test_consistent_result_passes() {
        let report = validate(&reported(100.0, 121.0, 0.21));
        assert!(report.passed, "{:?}", report.mismatches);
        assert_eq!(report.checks, 9);
    }

    #[test]
    fn test_tolerance_boundaries() {
        // 0.005 percentage points off is inside tolerance
        let mut ok = reported(100.0, 121.0, 0.21);
        ok.growth_rate = Some(21.005);
        assert!(validate(&ok).passed);

        let mut off = reported(100.0, 121.0, 0.21);
        off.growth_rate = Some(21.5);
        let report = validate(&off);
        assert!(!report.passed);
        assert!(report.mismatches[0].starts_with("growth rate"));
    }

    #[test]
    fn test_tampered_forecast_is_flagged() {
        let mut result = reported(100.0, 121.0, 0.21);
        result.scenarios[1].values.insert(2025, 200.0);
        let report = validate(&result);
        assert!(!report.passed);
        assert!(report.mismatches.iter().any(|m| m.starts_with("optimistic forecast 2025")));
    }
}
