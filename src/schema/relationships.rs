//! Relationship graph
//!
//! Foreign-key-like edges are declared statically (configuration, not
//! discovered from the engine) and expanded into a bidirectional adjacency
//! map. Every forward edge gets a mirrored reverse edge; a forward INNER
//! edge becomes LEFT in reverse so the "many" side is preserved.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::schema::SchemaSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn reversed(self) -> Self {
        match self {
            JoinKind::Inner => JoinKind::Left,
            JoinKind::Left => JoinKind::Left,
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => write!(f, "INNER"),
            JoinKind::Left => write!(f, "LEFT"),
        }
    }
}

/// `source_table.source_column = target_table.target_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    #[serde(default = "default_join_kind")]
    pub join_kind: JoinKind,
}

fn default_join_kind() -> JoinKind {
    JoinKind::Inner
}

impl RelationshipEdge {
    pub fn new(
        source_table: impl Into<String>,
        source_column: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
        join_kind: JoinKind,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            source_column: source_column.into(),
            target_table: target_table.into(),
            target_column: target_column.into(),
            join_kind,
        }
    }

    /// Parse `"orders.customer_id = customers.id"`.
    pub fn parse(declaration: &str, join_kind: JoinKind) -> Result<Self> {
        let invalid = || {
            EngineError::Config(format!(
                "Invalid relationship '{}', expected 'table.column = table.column'",
                declaration
            ))
        };

        let (left, right) = declaration.split_once('=').ok_or_else(invalid)?;
        let (source_table, source_column) = left.trim().split_once('.').ok_or_else(invalid)?;
        let (target_table, target_column) = right.trim().split_once('.').ok_or_else(invalid)?;

        let parts = [source_table, source_column, target_table, target_column];
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid());
        }

        Ok(Self::new(
            source_table.trim(),
            source_column.trim(),
            target_table.trim(),
            target_column.trim(),
            join_kind,
        ))
    }
}

/// One traversable edge out of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub target_table: String,
    pub source_column: String,
    pub target_column: String,
    pub join_kind: JoinKind,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    edges: Vec<RelationshipEdge>,
    /// lower-cased table → outgoing relationships in declaration order
    adjacency: HashMap<String, Vec<Relationship>>,
}

impl RelationshipGraph {
    pub fn new(edges: Vec<RelationshipEdge>) -> Self {
        let mut adjacency: HashMap<String, Vec<Relationship>> = HashMap::new();

        for edge in &edges {
            adjacency
                .entry(edge.source_table.to_lowercase())
                .or_default()
                .push(Relationship {
                    target_table: edge.target_table.clone(),
                    source_column: edge.source_column.clone(),
                    target_column: edge.target_column.clone(),
                    join_kind: edge.join_kind,
                });
            adjacency
                .entry(edge.target_table.to_lowercase())
                .or_default()
                .push(Relationship {
                    target_table: edge.source_table.clone(),
                    source_column: edge.target_column.clone(),
                    target_column: edge.source_column.clone(),
                    join_kind: edge.join_kind.reversed(),
                });
        }

        Self { edges, adjacency }
    }

    /// Load edge declarations from a JSON array.
    pub fn load_edges(path: &Path) -> Result<Vec<RelationshipEdge>> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Rebuild against a refreshed schema. The declarations are unchanged;
    /// edges naming tables or columns the schema lacks are reported.
    pub fn rebuild(&self, snapshot: &SchemaSnapshot) -> Self {
        if !snapshot.is_empty() {
            for edge in &self.edges {
                let ends = [
                    (&edge.source_table, &edge.source_column),
                    (&edge.target_table, &edge.target_column),
                ];
                for (table, column) in ends {
                    if !snapshot.has_column(table, column) {
                        warn!(
                            "Declared relationship references unknown column {}.{}",
                            table, column
                        );
                    }
                }
            }
        }
        Self::new(self.edges.clone())
    }

    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    pub fn relationships_for(&self, table: &str) -> Vec<Relationship> {
        self.adjacency
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Join fragment from `from_table` to `to_table` using the first matching
    /// edge, or an empty string when the tables are not directly related.
    pub fn build_join_clause(&self, from_table: &str, to_table: &str) -> String {
        let Some(rel) = self
            .adjacency
            .get(&from_table.to_lowercase())
            .and_then(|rels| {
                rels.iter()
                    .find(|r| r.target_table.eq_ignore_ascii_case(to_table))
            })
        else {
            return String::new();
        };

        format!(
            "{} JOIN {} ON {}.{} = {}.{}",
            rel.join_kind,
            rel.target_table,
            from_table,
            rel.source_column,
            rel.target_table,
            rel.target_column
        )
    }
}
