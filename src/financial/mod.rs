//! Deterministic financial figures
//!
//! Growth rates and forecasts are computed by the relational engine from
//! closed-form formulas, then re-derived independently by [`oracle`] before
//! they are reported.

pub mod calculator;
pub mod detect;
pub mod oracle;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use calculator::GrowthCalculator;
pub use detect::{detect_growth_question, GrowthRequest};
pub use oracle::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Base,
    Optimistic,
    Pessimistic,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Base, Scenario::Optimistic, Scenario::Pessimistic];

    /// Multiplier applied to the measured growth fraction.
    pub fn factor(self) -> f64 {
        match self {
            Scenario::Base => 1.0,
            Scenario::Optimistic => 1.10,
            Scenario::Pessimistic => 0.90,
        }
    }

    pub fn column_prefix(self) -> &'static str {
        match self {
            Scenario::Base => "base",
            Scenario::Optimistic => "optimistic",
            Scenario::Pessimistic => "pessimistic",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioForecast {
    pub scenario: Scenario,
    /// Growth fraction this scenario applied (e.g. 0.231).
    pub rate: f64,
    pub values: BTreeMap<i32, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinancialFailure {
    InvalidPeriods,
    InvalidSource,
    Execution,
    MissingData,
    UndefinedGrowth,
    ValidationMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialResult {
    pub success: bool,
    pub message: String,
    pub failure: Option<FinancialFailure>,
    pub start_period: i32,
    pub end_period: i32,
    pub start_value: Option<f64>,
    pub end_value: Option<f64>,
    /// Percentage, e.g. 21.0
    pub growth_rate: Option<f64>,
    /// Fraction, e.g. 0.21
    pub growth_fraction: Option<f64>,
    /// Base-scenario forecasts by period.
    pub forecasts: BTreeMap<i32, f64>,
    pub scenarios: Vec<ScenarioForecast>,
    pub query: String,
    pub validation: Option<ValidationReport>,
}

impl FinancialResult {
    pub(crate) fn failed(
        start_period: i32,
        end_period: i32,
        failure: FinancialFailure,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            failure: Some(failure),
            start_period,
            end_period,
            start_value: None,
            end_value: None,
            growth_rate: None,
            growth_fraction: None,
            forecasts: BTreeMap::new(),
            scenarios: Vec::new(),
            query: String::new(),
            validation: None,
        }
    }

    pub fn scenario(&self, scenario: Scenario) -> Option<&ScenarioForecast> {
        self.scenarios.iter().find(|s| s.scenario == scenario)
    }
}
