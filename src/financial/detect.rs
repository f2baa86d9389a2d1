//! Recognises growth / forecast questions so they can be answered by the
//! deterministic calculator instead of a generated query.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref YEAR: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").unwrap();
    static ref GROWTH_WORDS: Regex =
        Regex::new(r"(?i)\b(?:growth|cagr|grow|grew|grown|increase[ds]?|decline[ds]?)\b").unwrap();
    static ref FORECAST_WORDS: Regex =
        Regex::new(r"(?i)\b(?:forecast\w*|projection\w*|project(?:ed)?|predict\w*)\b").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthRequest {
    pub start_period: i32,
    pub end_period: i32,
    pub forecast_periods: Vec<i32>,
}

/// Measured periods are the years mentioned before the first forecast word;
/// years after it are forecast periods. When the question leads with the
/// forecast word, the latest year is the forecast and the rest are measured.
/// A forecast word without a later year asks for the period after the end.
pub fn detect_growth_question(question: &str) -> Option<GrowthRequest> {
    let forecast_at = FORECAST_WORDS.find(question).map(|m| m.start());
    if !GROWTH_WORDS.is_match(question) && forecast_at.is_none() {
        return None;
    }

    let years: Vec<(usize, i32)> = YEAR
        .find_iter(question)
        .filter_map(|m| m.as_str().parse().ok().map(|y| (m.start(), y)))
        .collect();

    let (mut measured, mut forecast): (Vec<i32>, Vec<i32>) = match forecast_at {
        Some(at) => {
            let (before, after): (Vec<&(usize, i32)>, Vec<&(usize, i32)>) = years.iter().partition(|(pos, _)| *pos < at);
            (
                before.into_iter().map(|(_, y)| *y).collect(),
                after.into_iter().map(|(_, y)| *y).collect(),
            )
        }
        None => (years.iter().map(|(_, y)| *y).collect(), Vec::new()),
    };

    if measured.len() < 2 && forecast_at.is_some() {
        let mut all: Vec<i32> = years.iter().map(|(_, y)| *y).collect();
        all.sort_unstable();
        all.dedup();
        if all.len() >= 3 {
            let latest = all.pop()?;
            measured = all;
            forecast = vec![latest];
        }
    }

    measured.sort_unstable();
    measured.dedup();
    let start_period = *measured.first()?;
    let end_period = *measured.last()?;
    if start_period == end_period {
        return None;
    }

    forecast.retain(|y| *y > end_period);
    forecast.sort_unstable();
    forecast.dedup();
    if forecast.is_empty() && forecast_at.is_some() {
        forecast.push(end_period + 1);
    }

    Some(GrowthRequest {
        start_period,
        end_period,
        forecast_periods: forecast,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: i32, end: i32, forecasts: &[i32]) -> Option<GrowthRequest> {
        Some(GrowthRequest {
            start_period: start,
            end_period: end,
            forecast_periods: forecasts.to_vec(),
        })
    }

    #[test]
    fn test_growth_with_forecast() {
        assert_eq!(
            detect_growth_question("What was revenue growth from 2023 to 2024, and forecast 2025 and 2026?"),
            request(2023, 2024, &[2025, 2026])
        );
    }

    #[test]
    fn test_growth_only() {
        assert_eq!(
            detect_growth_question("What is the CAGR between 2020 and 2024?"),
            request(2020, 2024, &[])
        );
    }

    #[test]
    fn test_forecast_without_year_means_next_period() {
        assert_eq!(
            detect_growth_question("Sales grew from 2022 to 2024, what is the projection?"),
            request(2022, 2024, &[2025])
        );
    }

    #[test]
    fn test_leading_forecast_word() {
        assert_eq!(
            detect_growth_question("Forecast 2026 revenue based on 2022 and 2024"),
            request(2022, 2024, &[2026])
        );
    }

    #[test]
    fn test_not_a_growth_question() {
        assert_eq!(detect_growth_question("Top 10 customers in 2024"), None);
        assert_eq!(detect_growth_question("How did revenue grow in 2024?"), None);
        assert_eq!(detect_growth_question("Show growth by region"), None);
    }
}
