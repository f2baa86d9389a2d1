//! Query Validator
//!
//! Checks a candidate query against the current schema snapshot before it is
//! sent to the engine: unknown tables are either substituted through the
//! alias/fallback resolver or reported, and `qualifier.column` references
//! against known tables are checked for column existence.

use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::SchemaCatalog;
use crate::validation::scanner::{apply_replacements, scan, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionReport {
    pub valid: bool,
    pub tables_referenced: Vec<String>,
    /// `qualifier.column` references whose column is missing from the table.
    pub invalid_qualified_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSubstitution {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValidation {
    pub valid: bool,
    pub missing_tables: Vec<String>,
    /// Present only when at least one table name was substituted.
    pub rewritten_query: Option<String>,
    pub substitutions: Vec<TableSubstitution>,
}

impl SchemaValidation {
    pub fn describe_substitutions(&self) -> String {
        self.substitutions
            .iter()
            .map(|s| format!("Replaced table '{}' with '{}'", s.from, s.to))
            .join("; ")
    }
}

pub struct QueryValidator {
    catalog: Arc<SchemaCatalog>,
    strict_aliases: bool,
}

impl QueryValidator {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            catalog,
            strict_aliases: false,
        }
    }

    /// Also check references qualified by a table alias (`c.name` for
    /// `customers c`), not only those qualified by a table name.
    pub fn with_strict_aliases(mut self, strict: bool) -> Self {
        self.strict_aliases = strict;
        self
    }

    pub fn introspect(&self, query: &str) -> IntrospectionReport {
        let snapshot = self.catalog.snapshot();
        let scan = scan(query);
        let tables_referenced = scan.referenced_tables();

        if snapshot.is_empty() {
            debug!("Schema snapshot is empty, introspection fails closed");
            return IntrospectionReport {
                valid: false,
                tables_referenced,
                invalid_qualified_columns: Vec::new(),
            };
        }

        let aliases = scan.alias_map();
        let mut seen = HashSet::new();
        let mut invalid = Vec::new();

        for reference in &scan.qualified {
            let qualifier = reference.qualifier.to_lowercase();

            // A declared alias shadows a table of the same name.
            let table = match aliases.get(&qualifier) {
                Some(aliased) if self.strict_aliases => snapshot.canonical_table(aliased),
                Some(_) => None,
                None => snapshot.canonical_table(&reference.qualifier),
            };
            let Some(table) = table else {
                continue;
            };

            if !snapshot.has_column(table, &reference.column) {
                let display = reference.display();
                if seen.insert(display.to_lowercase()) {
                    invalid.push(display);
                }
            }
        }

        IntrospectionReport {
            valid: invalid.is_empty(),
            tables_referenced,
            invalid_qualified_columns: invalid,
        }
    }

    pub fn validate_against_schema(&self, query: &str) -> SchemaValidation {
        let snapshot = self.catalog.snapshot();
        let scan = scan(query);
        let referenced = scan.referenced_tables();

        if snapshot.is_empty() {
            return SchemaValidation {
                valid: false,
                missing_tables: referenced,
                rewritten_query: None,
                substitutions: Vec::new(),
            };
        }

        let mut missing = Vec::new();
        let mut substitutions = Vec::new();
        for name in referenced {
            if snapshot.table_exists(&name) {
                continue;
            }
            match snapshot.resolve_table_fallback(&name) {
                Some(real) => {
                    debug!("Resolved table '{}' to '{}'", name, real);
                    substitutions.push(TableSubstitution { from: name, to: real });
                }
                None => missing.push(name),
            }
        }

        let rewritten_query = if substitutions.is_empty() {
            None
        } else {
            let edits = scan
                .tokens
                .iter()
                .filter(|t| t.is_ident())
                .filter_map(|t| {
                    let sub = substitutions
                        .iter()
                        .find(|s| s.from.eq_ignore_ascii_case(&t.text))?;
                    let replacement = match t.kind {
                        TokenKind::QuotedIdent => format!("\"{}\"", sub.to),
                        _ => sub.to.clone(),
                    };
                    Some((t.start, t.end, replacement))
                })
                .collect();
            Some(apply_replacements(query, edits))
        };

        SchemaValidation {
            valid: missing.is_empty(),
            missing_tables: missing,
            rewritten_query,
            substitutions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_support::snapshot;
    use std::collections::HashMap;

    fn validator() -> QueryValidator {
        let snap = snapshot(&[
            ("customers", &["id", "name", "email"]),
            ("orders", &["id", "customer_id", "total", "year"]),
        ]);
        let catalog = SchemaCatalog::from_tables(snap.tables().clone(), HashMap::new());
        QueryValidator::new(Arc::new(catalog))
    }

    #[test]
    fn test_introspect_reports_missing_columns_on_known_tables() {
        let v = validator();
        let report = v.introspect(
            "select customers.fullname, orders.total, x.whatever from customers join orders on orders.customer_id = customers.id",
        );
        assert!(!report.valid);
        assert_eq!(report.tables_referenced, vec!["customers", "orders"]);
        assert_eq!(report.invalid_qualified_columns, vec!["customers.fullname"]);
    }

    #[test]
    fn test_aliases_are_only_checked_in_strict_mode() {
        let query = "select c.fullname from customers c";
        assert!(validator().introspect(query).valid);

        let strict = validator().with_strict_aliases(true);
        let report = strict.introspect(query);
        assert!(!report.valid);
        assert_eq!(report.invalid_qualified_columns, vec!["c.fullname"]);
    }

    #[test]
    fn test_empty_catalog_fails_closed() {
        let v = QueryValidator::new(Arc::new(SchemaCatalog::new(HashMap::new())));
        assert!(!v.introspect("select 1").valid);

        let result = v.validate_against_schema("select * from orders");
        assert!(!result.valid);
        assert_eq!(result.missing_tables, vec!["orders"]);
    }

    #[test]
    fn test_fallback_rewrites_whole_words_only() {
        let v = validator();
        let result = v.validate_against_schema(
            "SELECT SUM(orders_2023.total) AS orders_2023_total, 'orders_2023' FROM orders_2023",
        );
        assert!(result.valid);
        assert_eq!(
            result.rewritten_query.as_deref(),
            Some("SELECT SUM(orders.total) AS orders_2023_total, 'orders_2023' FROM orders")
        );
        assert_eq!(result.describe_substitutions(), "Replaced table 'orders_2023' with 'orders'");
    }

    #[test]
    fn test_unresolvable_table_is_missing() {
        let result = validator().validate_against_schema("select * from suppliers s join orders o on o.id = s.id");
        assert!(!result.valid);
        assert_eq!(result.missing_tables, vec!["suppliers"]);
        assert_eq!(result.rewritten_query, None);
    }

    #[test]
    fn test_ctes_are_not_missing_tables() {
        let result = validator().validate_against_schema(
            "with totals as (select customer_id, sum(total) t from orders group by 1) select * from totals",
        );
        assert!(result.valid);
        assert!(result.missing_tables.is_empty());
    }
}
