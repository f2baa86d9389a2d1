//! Error Classifier
//!
//! Classifies engine errors into a taxonomy for recovery. SQLSTATE codes are
//! consulted first; messages are pattern-matched when no code is available.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// SQL error classification taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    Syntax,
    UnknownTable,
    UnknownColumn,
    Connectivity,
    Other(String),
}

impl SqlErrorClass {
    /// Only unknown columns are repaired by rewriting the query; connectivity
    /// failures are retried as-is.
    pub fn is_correctable(&self) -> bool {
        matches!(self, SqlErrorClass::UnknownColumn)
    }
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::Syntax => write!(f, "Syntax"),
            SqlErrorClass::UnknownTable => write!(f, "UnknownTable"),
            SqlErrorClass::UnknownColumn => write!(f, "UnknownColumn"),
            SqlErrorClass::Connectivity => write!(f, "Connectivity"),
            SqlErrorClass::Other(msg) => write!(f, "Other({})", msg),
        }
    }
}

lazy_static! {
    static ref MISSING_COLUMN_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bunknown column\s+'([^']+)'").unwrap(),
        Regex::new(r"(?i)\bcolumn\s+(\S+)\s+(?:of relation\s+\S+\s+)?does not exist").unwrap(),
        Regex::new(r"(?i)\bno such column:\s*(\S+)").unwrap(),
        Regex::new(r"(?i)\binvalid column name\s+'([^']+)'").unwrap(),
    ];
    static ref MISSING_TABLE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)relation\s+(\S+)\s+does not exist").unwrap(),
        Regex::new(r"(?i)table\s+'([^']+)'\s+doesn't exist").unwrap(),
        Regex::new(r"(?i)no such table:\s*(\S+)").unwrap(),
        Regex::new(r"(?i)unknown table\s+'([^']+)'").unwrap(),
    ];
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an error into the taxonomy
    pub fn classify(&self, error: &EngineError) -> SqlErrorClass {
        match error {
            EngineError::Connectivity(_) => SqlErrorClass::Connectivity,
            EngineError::Database { code, message } => code
                .as_deref()
                .and_then(classify_code)
                .unwrap_or_else(|| self.classify_message(message)),
            other => SqlErrorClass::Other(other.to_string()),
        }
    }

    /// Pattern matching on error messages
    pub fn classify_message(&self, message: &str) -> SqlErrorClass {
        let msg = message.to_lowercase();

        // Checked before tables: "column x of relation y does not exist".
        if MISSING_COLUMN_PATTERNS.iter().any(|re| re.is_match(message)) {
            return SqlErrorClass::UnknownColumn;
        }

        if (msg.contains("relation") && msg.contains("does not exist"))
            || (msg.contains("table") && (msg.contains("doesn't exist") || msg.contains("does not exist")))
            || msg.contains("no such table")
            || msg.contains("unknown table")
            || msg.contains("invalid object name")
        {
            return SqlErrorClass::UnknownTable;
        }

        if msg.contains("syntax error")
            || msg.contains("error in your sql syntax")
            || msg.contains("parse error")
        {
            return SqlErrorClass::Syntax;
        }

        let connectivity_markers = [
            "connection refused",
            "connection reset",
            "connection closed",
            "lost connection",
            "server has gone away",
            "could not connect",
            "timed out",
            "broken pipe",
        ];
        if connectivity_markers.iter().any(|m| msg.contains(m)) {
            return SqlErrorClass::Connectivity;
        }

        SqlErrorClass::Other(message.to_string())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Postgres SQLSTATE codes plus the MySQL ones the engine may pass through.
fn classify_code(code: &str) -> Option<SqlErrorClass> {
    match code {
        "42703" | "42S22" => Some(SqlErrorClass::UnknownColumn),
        "42P01" | "42S02" => Some(SqlErrorClass::UnknownTable),
        "42601" | "42000" => Some(SqlErrorClass::Syntax),
        "57P01" | "57P02" | "57P03" | "53300" => Some(SqlErrorClass::Connectivity),
        c if c.starts_with("08") => Some(SqlErrorClass::Connectivity),
        _ => None,
    }
}

fn first_capture(patterns: &[Regex], message: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| bare_identifier(m.as_str()))
        .filter(|name| !name.is_empty())
}

/// Drop quoting and any qualifier: `"c"."fullname"` → `fullname`.
fn bare_identifier(raw: &str) -> String {
    let unquoted: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '[' | ']'))
        .collect();
    unquoted
        .rsplit('.')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Name of the missing column mentioned in an engine error message.
pub fn extract_missing_column(message: &str) -> Option<String> {
    first_capture(&MISSING_COLUMN_PATTERNS, message)
}

/// Name of the missing table mentioned in an engine error message.
pub fn extract_missing_table(message: &str) -> Option<String> {
    first_capture(&MISSING_TABLE_PATTERNS, message)
}
