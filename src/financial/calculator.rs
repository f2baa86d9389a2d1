//! Growth calculator
//!
//! One aggregate query sums the value column for the two measured periods
//! and evaluates the compound growth rate and every scenario forecast in SQL.
//! Nothing is estimated client-side: values are read back from the result
//! and checked by the oracle.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::config::GrowthSource;
use crate::db::TabularResult;
use crate::execution_loop::ExecutionCoordinator;
use crate::financial::{
    oracle, FinancialFailure, FinancialResult, Scenario, ScenarioForecast,
};
use crate::schema::SchemaCatalog;

lazy_static! {
    static ref SAFE_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub struct GrowthCalculator {
    coordinator: Arc<ExecutionCoordinator>,
    catalog: Arc<SchemaCatalog>,
    source: GrowthSource,
    max_retries: u32,
}

impl GrowthCalculator {
    pub fn new(
        coordinator: Arc<ExecutionCoordinator>,
        catalog: Arc<SchemaCatalog>,
        source: GrowthSource,
        max_retries: u32,
    ) -> Self {
        Self {
            coordinator,
            catalog,
            source,
            max_retries,
        }
    }

    pub fn source(&self) -> &GrowthSource {
        &self.source
    }

    pub async fn compute_growth(
        &self,
        start_period: i32,
        end_period: i32,
        forecast_periods: &[i32],
    ) -> FinancialResult {
        if end_period <= start_period {
            return FinancialResult::failed(
                start_period,
                end_period,
                FinancialFailure::InvalidPeriods,
                format!(
                    "End period {} must be after start period {}",
                    end_period, start_period
                ),
            );
        }

        if let Err(message) = self.check_source() {
            return FinancialResult::failed(
                start_period,
                end_period,
                FinancialFailure::InvalidSource,
                message,
            );
        }

        let mut forecasts: Vec<i32> = forecast_periods.to_vec();
        forecasts.sort_unstable();
        forecasts.dedup();
        let (forecasts, ignored): (Vec<i32>, Vec<i32>) =
            forecasts.into_iter().partition(|p| *p > end_period);
        if !ignored.is_empty() {
            warn!(
                "Ignoring forecast periods not after {}: {:?}",
                end_period, ignored
            );
        }

        let sql = build_growth_sql(&self.source, start_period, end_period, &forecasts);
        info!(
            "📈 Computing growth {}→{} with {} forecast period(s)",
            start_period,
            end_period,
            forecasts.len()
        );

        let outcome = self.coordinator.execute_with_retry(&sql, self.max_retries).await;
        let mut result = FinancialResult::failed(
            start_period,
            end_period,
            FinancialFailure::Execution,
            outcome.message.clone(),
        );
        result.query = outcome.final_query.clone();

        let Some(table) = outcome.result.filter(|_| outcome.success) else {
            return result;
        };

        let start_rows = table.first_row_f64("start_rows").unwrap_or(0.0);
        let end_rows = table.first_row_f64("end_rows").unwrap_or(0.0);
        let mut empty = Vec::new();
        if start_rows == 0.0 {
            empty.push(start_period.to_string());
        }
        if end_rows == 0.0 {
            empty.push(end_period.to_string());
        }
        if !empty.is_empty() {
            result.failure = Some(FinancialFailure::MissingData);
            result.message = format!("No data for period(s): {}", empty.join(", "));
            return result;
        }

        result.start_value = table.first_row_f64("start_value");
        result.end_value = table.first_row_f64("end_value");

        let Some(fraction) = table.first_row_f64("growth_fraction") else {
            result.failure = Some(FinancialFailure::UndefinedGrowth);
            result.message = format!(
                "Growth rate is undefined: start value {} must be positive and end value {} non-negative",
                fmt_value(result.start_value),
                fmt_value(result.end_value)
            );
            return result;
        };
        result.growth_fraction = Some(fraction);
        result.growth_rate = table.first_row_f64("growth_rate");

        result.scenarios = read_scenarios(&table, fraction, &forecasts);
        result.forecasts = result
            .scenario(Scenario::Base)
            .map(|s| s.values.clone())
            .unwrap_or_default();

        let report = oracle::validate(&result);
        let passed = report.passed;
        let mismatches = report.mismatches.join("; ");
        result.validation = Some(report);

        if !passed {
            warn!("Growth figures failed validation: {}", mismatches);
            result.failure = Some(FinancialFailure::ValidationMismatch);
            result.message = format!("Validation mismatch: {}", mismatches);
            return result;
        }

        result.success = true;
        result.failure = None;
        result.message = format!(
            "Growth {}→{}: {:.2}% per period",
            start_period,
            end_period,
            result.growth_rate.unwrap_or(fraction * 100.0)
        );
        result
    }

    /// Identifiers are interpolated into SQL, so they must be plain names
    /// that exist in the catalog.
    fn check_source(&self) -> std::result::Result<(), String> {
        let source = &self.source;
        for name in [&source.table, &source.period_column, &source.value_column] {
            if !SAFE_IDENTIFIER.is_match(name) {
                return Err(format!("'{}' is not a valid identifier", name));
            }
        }

        let snapshot = self.catalog.snapshot();
        if !snapshot.table_exists(&source.table) {
            return Err(format!("Growth table '{}' not found", source.table));
        }
        for column in [&source.period_column, &source.value_column] {
            if !snapshot.has_column(&source.table, column) {
                return Err(format!(
                    "Column '{}' not found in growth table '{}'",
                    column, source.table
                ));
            }
        }
        Ok(())
    }
}

fn fmt_value(value: Option<f64>) -> String {
    value.map_or_else(|| "NULL".to_string(), |v| v.to_string())
}

/// The single aggregate query. Scenario forecast columns are named
/// `{scenario}_{period}`.
pub fn build_growth_sql(
    source: &GrowthSource,
    start_period: i32,
    end_period: i32,
    forecast_periods: &[i32],
) -> String {
    let (table, period, value) = (&source.table, &source.period_column, &source.value_column);
    let elapsed = end_period - start_period;

    let mut select = vec![
        "start_value".to_string(),
        "end_value".to_string(),
        "start_rows".to_string(),
        "end_rows".to_string(),
        "growth_fraction * 100 AS growth_rate".to_string(),
        "growth_fraction".to_string(),
    ];
    for &p in forecast_periods {
        let ahead = p - end_period;
        for scenario in Scenario::ALL {
            select.push(format!(
                "end_value * POWER(1 + growth_fraction * {:.2}, {}) AS {}_{}",
                scenario.factor(),
                ahead,
                scenario.column_prefix(),
                p
            ));
        }
    }

    format!(
        "WITH period_totals AS (\n\
         \x20   SELECT\n\
         \x20       CAST(SUM(CASE WHEN {period} = {start} THEN {value} END) AS DOUBLE PRECISION) AS start_value,\n\
         \x20       CAST(SUM(CASE WHEN {period} = {end} THEN {value} END) AS DOUBLE PRECISION) AS end_value,\n\
         \x20       COUNT(CASE WHEN {period} = {start} THEN 1 END) AS start_rows,\n\
         \x20       COUNT(CASE WHEN {period} = {end} THEN 1 END) AS end_rows\n\
         \x20   FROM {table}\n\
         \x20   WHERE {period} IN ({start}, {end})\n\
         ),\n\
         growth AS (\n\
         \x20   SELECT start_value, end_value, start_rows, end_rows,\n\
         \x20       CASE WHEN start_value > 0 AND end_value >= 0\n\
         \x20            THEN POWER(end_value / start_value, 1.0 / {elapsed}) - 1\n\
         \x20       END AS growth_fraction\n\
         \x20   FROM period_totals\n\
         )\n\
         SELECT {columns}\n\
         FROM growth",
        period = period,
        value = value,
        table = table,
        start = start_period,
        end = end_period,
        elapsed = elapsed,
        columns = select.join(",\n       "),
    )
}

fn read_scenarios(table: &TabularResult, fraction: f64, forecasts: &[i32]) -> Vec<ScenarioForecast> {
    Scenario::ALL
        .iter()
        .map(|&scenario| {
            let values: BTreeMap<i32, f64> = forecasts
                .iter()
                .filter_map(|&p| {
                    table
                        .first_row_f64(&format!("{}_{}", scenario.column_prefix(), p))
                        .map(|v| (p, v))
                })
                .collect();
            ScenarioForecast {
                scenario,
                rate: fraction * scenario.factor(),
                values,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::scan;

    #[test]
    fn test_growth_sql_shape() {
        let sql = build_growth_sql(&GrowthSource::default(), 2023, 2024, &[2025, 2026]);

        assert!(sql.contains("WHERE year IN (2023, 2024)"));
        assert!(sql.contains("POWER(end_value / start_value, 1.0 / 1) - 1"));
        assert!(sql.contains("end_value * POWER(1 + growth_fraction * 1.10, 1) AS optimistic_2025"));
        assert!(sql.contains("end_value * POWER(1 + growth_fraction * 0.90, 2) AS pessimistic_2026"));
        assert!(sql.contains("end_value * POWER(1 + growth_fraction * 1.00, 2) AS base_2026"));

        // Only the source table is a real table reference.
        assert_eq!(scan(&sql).referenced_tables(), vec!["orders"]);
    }

    #[test]
    fn test_scenarios_read_from_columns() {
        let table = TabularResult::new(
            vec!["base_2025".into(), "optimistic_2025".into(), "pessimistic_2025".into()],
            vec![vec![
                serde_json::json!(146.41),
                serde_json::json!("148.951"),
                serde_json::json!(143.869),
            ]],
        );
        let scenarios = read_scenarios(&table, 0.21, &[2025]);
        assert_eq!(scenarios.len(), 3);
        assert_eq!(scenarios[1].scenario, Scenario::Optimistic);
        assert!((scenarios[1].rate - 0.231).abs() < 1e-12);
        assert_eq!(scenarios[1].values.get(&2025), Some(&148.951));
        assert!((scenarios[2].rate - 0.189).abs() < 1e-12);
    }
}
