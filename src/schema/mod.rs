//! Schema metadata: the immutable snapshot, the catalog that swaps it, table
//! alias resolution and the declared relationship graph.

pub mod aliases;
pub mod catalog;
pub mod relationships;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use aliases::AliasIndex;
pub use catalog::{LoadReport, LoadSource, SchemaCatalog};
pub use relationships::{JoinKind, Relationship, RelationshipEdge, RelationshipGraph};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Table name → ordered columns, as loaded from the engine.
///
/// A snapshot is never mutated after construction. Refresh builds a new one
/// and the catalog swaps it in whole, together with its derived alias index.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
    by_lower: HashMap<String, String>,
    aliases: AliasIndex,
    loaded_at: Option<DateTime<Utc>>,
}

impl SchemaSnapshot {
    pub fn new(
        tables: BTreeMap<String, Vec<ColumnInfo>>,
        renames: &HashMap<String, String>,
        loaded_at: Option<DateTime<Utc>>,
    ) -> Self {
        let by_lower = tables
            .keys()
            .map(|name| (name.to_lowercase(), name.clone()))
            .collect();
        let aliases = AliasIndex::build(tables.keys().map(String::as_str), renames);

        Self {
            tables,
            by_lower,
            aliases,
            loaded_at,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn tables(&self) -> &BTreeMap<String, Vec<ColumnInfo>> {
        &self.tables
    }

    /// Table names in catalog iteration order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Real spelling of `name` when a table matches case-insensitively.
    pub fn canonical_table(&self, name: &str) -> Option<&str> {
        self.by_lower
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.canonical_table(name).is_some()
    }

    pub fn column_info(&self, table: &str) -> Option<&[ColumnInfo]> {
        let real = self.canonical_table(table)?;
        self.tables.get(real).map(Vec::as_slice)
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        self.column_info(table)
            .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.column_info(table)
            .map(|cols| cols.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }

    /// Every `(table, column)` whose column name equals `column`
    /// case-insensitively, in catalog iteration order.
    pub fn find_column(&self, column: &str) -> Vec<(String, String)> {
        self.tables
            .iter()
            .flat_map(|(table, cols)| {
                cols.iter()
                    .filter(|c| c.name.eq_ignore_ascii_case(column))
                    .map(move |c| (table.clone(), c.name.clone()))
            })
            .collect()
    }

    /// Exact table, then alias variants, then historical renames.
    pub fn resolve_table_fallback(&self, name: &str) -> Option<String> {
        if let Some(real) = self.canonical_table(name) {
            return Some(real.to_string());
        }
        self.aliases
            .resolve(name, |candidate| self.canonical_table(candidate).map(str::to_string))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Snapshot built from `(table, [columns])` pairs with text columns.
    pub fn snapshot(tables: &[(&str, &[&str])]) -> SchemaSnapshot {
        snapshot_with_renames(tables, &HashMap::new())
    }

    pub fn snapshot_with_renames(
        tables: &[(&str, &[&str])],
        renames: &HashMap<String, String>,
    ) -> SchemaSnapshot {
        let map = tables
            .iter()
            .map(|(table, cols)| {
                (
                    table.to_string(),
                    cols.iter().map(|c| ColumnInfo::new(*c, "text", true)).collect(),
                )
            })
            .collect();
        SchemaSnapshot::new(map, renames, None)
    }
}
