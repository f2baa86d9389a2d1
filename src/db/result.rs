//! Tabular result returned by every engine

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rows are positional and aligned with `columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms: 0,
        }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, Vec::new())
    }

    pub fn with_execution_time(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in the first row.
    pub fn first_value(&self, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.first()?.get(idx)
    }

    /// Numeric value of `column` in the first row. Numbers serialized as
    /// strings (e.g. NUMERIC in text form) are parsed too.
    pub fn first_row_f64(&self, column: &str) -> Option<f64> {
        match self.first_value(column)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Short human-readable description used by the query cache.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return format!("0 rows ({})", self.columns.join(", "));
        }

        let preview: Vec<String> = self
            .rows
            .first()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .take(4)
                    .map(|(c, v)| format!("{}={}", c, render_value(v)))
                    .collect()
            })
            .unwrap_or_default();

        format!(
            "{} row{}; first: {}",
            self.row_count,
            if self.row_count == 1 { "" } else { "s" },
            preview.join(", ")
        )
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
