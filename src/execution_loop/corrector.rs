//! Unknown-column correction
//!
//! Repairs a query after the engine rejected one of its column references.
//! The missing identifier is looked up across every table in the schema; the
//! first table that has it wins. Without an exact match, a close spelling in
//! a table the query already uses is accepted (`fullname` → `name`). Each
//! occurrence is then rewritten to a qualified reference.

use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::debug;

use crate::execution_loop::error_classifier::{extract_missing_column, ErrorClassifier};
use crate::schema::{SchemaCatalog, SchemaSnapshot};
use crate::validation::scanner::{apply_replacements, scan, QueryScan, Token};

const SUGGESTION_THRESHOLD: f64 = 0.8;
const MAX_SUGGESTIONS: usize = 3;
const NEAR_MATCH_THRESHOLD: f64 = 0.9;
/// Shortest column name accepted as contained in another (`id` is too short).
const MIN_CONTAINED_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub corrected_query: Option<String>,
    pub success: bool,
    pub explanation: String,
}

impl CorrectionResult {
    fn failed(explanation: impl Into<String>) -> Self {
        Self {
            corrected_query: None,
            success: false,
            explanation: explanation.into(),
        }
    }
}

pub struct ErrorCorrector {
    catalog: Arc<SchemaCatalog>,
    classifier: ErrorClassifier,
}

impl ErrorCorrector {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            catalog,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn correct(&self, query: &str, error_message: &str) -> CorrectionResult {
        let class = self.classifier.classify_message(error_message);
        if !class.is_correctable() {
            return CorrectionResult::failed(format!("{} errors are not auto-correctable", class));
        }

        let Some(missing) = extract_missing_column(error_message) else {
            return CorrectionResult::failed(format!(
                "Could not identify the missing column in: {}",
                error_message
            ));
        };

        let snapshot = self.catalog.snapshot();
        let scanned = scan(query);

        let matches = snapshot.find_column(&missing);
        let chosen = match matches.first() {
            Some(exact) => Some(exact.clone()),
            None => near_match(&snapshot, &scanned, &missing),
        };
        let Some((table, column)) = chosen else {
            let suggestions = self.suggest(&missing);
            let mut explanation = format!("Column '{}' does not exist in any table", missing);
            if !suggestions.is_empty() {
                explanation.push_str(&format!(". Did you mean: {}?", suggestions.join(", ")));
            }
            return CorrectionResult::failed(explanation);
        };

        let qualifier = scanned.alias_for_table(&table).unwrap_or_else(|| table.clone());
        let replacement = format!("{}.{}", qualifier, column);

        let edits = column_edits(&scanned.tokens, &missing, &replacement);
        if edits.is_empty() {
            return CorrectionResult::failed(format!(
                "Column '{}' does not appear in the query",
                missing
            ));
        }

        let corrected = apply_replacements(query, edits);
        if corrected == query {
            return CorrectionResult::failed(format!(
                "Correcting '{}' to '{}' leaves the query unchanged",
                missing, replacement
            ));
        }

        let mut explanation = format!(
            "Replaced unknown column '{}' with '{}' ({}.{})",
            missing, replacement, table, column
        );
        if matches.len() > 1 {
            let others = matches[1..].iter().map(|(t, _)| t).join(", ");
            explanation.push_str(&format!("; also present in {}", others));
        }
        debug!("{}", explanation);

        CorrectionResult {
            corrected_query: Some(corrected),
            success: true,
            explanation,
        }
    }

    /// Closest `table.column` names by Jaro-Winkler similarity.
    fn suggest(&self, missing: &str) -> Vec<String> {
        let snapshot = self.catalog.snapshot();
        let lowered = missing.to_lowercase();
        let needle = lowered.as_str();

        snapshot
            .tables()
            .iter()
            .flat_map(|(table, cols)| {
                cols.iter()
                    .map(move |c| (jaro_winkler(needle, &c.name.to_lowercase()), format!("{}.{}", table, c.name)))
            })
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .sorted_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal))
            .take(MAX_SUGGESTIONS)
            .map(|(_, name)| name)
            .collect()
    }
}

/// Column of a table the query references whose name is close to
/// `missing`: one contains the other, or they are near-identical spellings.
/// A qualified reference only looks at its own table.
fn near_match(snapshot: &SchemaSnapshot, scanned: &QueryScan, missing: &str) -> Option<(String, String)> {
    let aliases = scanned.alias_map();
    let qualified_table = scanned
        .qualified
        .iter()
        .find(|r| r.column.eq_ignore_ascii_case(missing))
        .and_then(|r| {
            aliases
                .get(&r.qualifier.to_lowercase())
                .map(String::as_str)
                .or(Some(r.qualifier.as_str()))
                .and_then(|t| snapshot.canonical_table(t))
                .map(str::to_string)
        });

    let candidates: Vec<String> = match qualified_table {
        Some(table) => vec![table],
        None => scanned
            .referenced_tables()
            .iter()
            .filter_map(|t| snapshot.canonical_table(t).map(str::to_string))
            .collect(),
    };

    let needle = missing.to_lowercase();
    let mut best: Option<(f64, String, String)> = None;
    for table in candidates {
        for col in snapshot.column_info(&table).unwrap_or(&[]) {
            let name = col.name.to_lowercase();
            let (short, long) = if name.len() <= needle.len() {
                (&name, &needle)
            } else {
                (&needle, &name)
            };
            let contains = short.len() >= MIN_CONTAINED_LEN && long.contains(short.as_str());
            let score = jaro_winkler(&needle, &name);
            if !contains && score < NEAR_MATCH_THRESHOLD {
                continue;
            }
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, table.clone(), col.name.clone()));
            }
        }
    }

    best.map(|(_, table, column)| (table, column))
}

fn adjacent_dot_before(tokens: &[Token], i: usize) -> bool {
    i >= 1 && tokens[i - 1].is_symbol('.') && tokens[i - 1].end == tokens[i].start
}

fn adjacent_dot_after(tokens: &[Token], i: usize) -> bool {
    tokens
        .get(i + 1)
        .map_or(false, |t| t.is_symbol('.') && t.start == tokens[i].end)
}

/// Every reference to `missing`, qualified (`x.missing`, `s.x.missing`) or
/// bare, rewritten to `replacement`. Output aliases (`AS missing`), function
/// names and prefixes of longer dotted names are left alone.
fn column_edits(tokens: &[Token], missing: &str, replacement: &str) -> Vec<(usize, usize, String)> {
    let mut edits = Vec::new();

    for (i, tok) in tokens.iter().enumerate() {
        if !tok.is_ident() || !tok.text.eq_ignore_ascii_case(missing) {
            continue;
        }
        if adjacent_dot_after(tokens, i) || tokens.get(i + 1).map_or(false, |t| t.is_symbol('(')) {
            continue;
        }

        if adjacent_dot_before(tokens, i) {
            // walk back to the first part of the dotted name
            let mut first = i;
            while adjacent_dot_before(tokens, first)
                && first >= 2
                && tokens[first - 2].is_ident()
                && tokens[first - 2].end == tokens[first - 1].start
            {
                first -= 2;
            }
            if first != i {
                edits.push((tokens[first].start, tok.end, replacement.to_string()));
            }
            continue;
        }

        if i >= 1 && tokens[i - 1].is_word("as") {
            continue;
        }

        edits.push((tok.start, tok.end, replacement.to_string()));
    }

    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_support::snapshot;
    use std::collections::HashMap;

    fn corrector() -> ErrorCorrector {
        let snap = snapshot(&[
            ("customers", &["id", "name", "email"]),
            ("orders", &["id", "customer_id", "total", "year"]),
        ]);
        let catalog = SchemaCatalog::from_tables(snap.tables().clone(), HashMap::new());
        ErrorCorrector::new(Arc::new(catalog))
    }

    #[test]
    fn test_close_spelling_in_referenced_table_uses_query_alias() {
        let fix = corrector().correct(
            "select c.fullname from customers c",
            "column c.fullname does not exist",
        );
        assert!(fix.success, "{}", fix.explanation);
        assert_eq!(fix.corrected_query.as_deref(), Some("select c.name from customers c"));
    }

    #[test]
    fn test_absent_column_fails_without_rewrite() {
        let fix = corrector().correct(
            "select c.shoe_size, c.name from customers c",
            "column c.shoe_size does not exist",
        );
        assert!(!fix.success);
        assert!(fix.corrected_query.is_none());
        assert!(fix.explanation.contains("does not exist in any table"));
    }

    #[test]
    fn test_bare_column_is_qualified_with_owning_table() {
        let fix = corrector().correct(
            "select o.id, total from orders o join customers c on c.id = o.customer_id",
            "Unknown column 'total' in 'field list'",
        );
        assert!(fix.success, "{}", fix.explanation);
        assert_eq!(
            fix.corrected_query.as_deref(),
            Some("select o.id, o.total from orders o join customers c on c.id = o.customer_id")
        );
    }

    #[test]
    fn test_wrong_qualifier_is_rewritten() {
        let fix = corrector().correct(
            "select c.name, c.total from customers c join orders o on o.customer_id = c.id",
            "column c.total does not exist",
        );
        assert!(fix.success);
        assert_eq!(
            fix.corrected_query.as_deref(),
            Some("select c.name, o.total from customers c join orders o on o.customer_id = c.id")
        );
    }

    #[test]
    fn test_first_match_wins_and_others_are_noted() {
        let fix = corrector().correct("select id from things", "column \"id\" does not exist");
        assert!(fix.success);
        assert_eq!(fix.corrected_query.as_deref(), Some("select customers.id from things"));
        assert!(fix.explanation.contains("also present in orders"));
    }

    #[test]
    fn test_output_alias_and_functions_untouched() {
        let fix = corrector().correct(
            "select sum(amount) as total from orders",
            "column \"total\" does not exist",
        );
        assert!(!fix.success);
    }

    #[test]
    fn test_non_column_errors_are_not_corrected() {
        let fix = corrector().correct("select * from nope", "relation \"nope\" does not exist");
        assert!(!fix.success);
        assert!(fix.explanation.contains("UnknownTable"));
    }

    #[test]
    fn test_typo_is_fixed_only_within_referenced_tables() {
        let fix = corrector().correct("select emial from customers", "column \"emial\" does not exist");
        assert!(fix.success);
        assert_eq!(fix.corrected_query.as_deref(), Some("select customers.email from customers"));

        // customers is not part of this query, so the match is only suggested
        let fix = corrector().correct("select emial from orders", "column \"emial\" does not exist");
        assert!(!fix.success);
        assert!(fix.explanation.contains("customers.email"), "{}", fix.explanation);
    }
}
