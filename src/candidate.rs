//! Candidate enumeration.
//!
//! For every table, the columns that look relevant to the workload are combined
//! into every ordered 1-, 2- and 3-column key per index method. Candidates that
//! already exist as real indexes are removed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::catalog::{ExistingIndex, TableSchema};
use crate::config::AdvisorConfig;
use crate::database::{qualified_name, quote_identifier};

/// PostgreSQL index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMethod {
    Btree,
    Brin,
    Hash,
    Gist,
    Gin,
    Spgist,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::Btree => "btree",
            IndexMethod::Brin => "brin",
            IndexMethod::Hash => "hash",
            IndexMethod::Gist => "gist",
            IndexMethod::Gin => "gin",
            IndexMethod::Spgist => "spgist",
        }
    }

    /// Methods the advisor may propose for plain column keys.
    pub fn is_candidate_method(&self) -> bool {
        matches!(self, IndexMethod::Btree | IndexMethod::Brin | IndexMethod::Hash)
    }

    /// Hash indexes cannot have more than one key column.
    pub fn max_columns(&self) -> usize {
        match self {
            IndexMethod::Hash => 1,
            _ => 3,
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btree" => Ok(IndexMethod::Btree),
            "brin" => Ok(IndexMethod::Brin),
            "hash" => Ok(IndexMethod::Hash),
            "gist" => Ok(IndexMethod::Gist),
            "gin" => Ok(IndexMethod::Gin),
            "spgist" => Ok(IndexMethod::Spgist),
            other => Err(format!("unknown index method '{}'", other)),
        }
    }
}

/// An index that could be added: table, ordered key columns, method.
///
/// Ordering is table, then columns, then method, which makes probing order
/// (and therefore tie-breaking) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexCandidate {
    table: String,
    columns: Vec<String>,
    method: IndexMethod,
}

impl IndexCandidate {
    /// Returns `None` unless there are 1 to 3 distinct columns and the method
    /// allows that many (hash takes exactly one).
    pub fn new<S: Into<String>>(
        table: impl Into<String>,
        columns: Vec<S>,
        method: IndexMethod,
    ) -> Option<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();

        if columns.is_empty() || columns.len() > method.max_columns() {
            return None;
        }
        let distinct: BTreeSet<&String> = columns.iter().collect();
        if distinct.len() != columns.len() {
            return None;
        }

        Some(Self {
            table: table.into(),
            columns,
            method,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn method(&self) -> IndexMethod {
        self.method
    }

    /// `CREATE INDEX ON <table> USING <method> (<columns>)`
    pub fn create_sql(&self, schema: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE INDEX ON {} USING {} ({})",
            qualified_name(schema, &self.table),
            self.method,
            columns
        )
    }
}

impl fmt::Display for IndexCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) using {}", self.table, self.columns.join(", "), self.method)
    }
}

/// Decides whether a column of a table matters to the workload.
pub trait ColumnRelevance {
    fn is_relevant(&self, table: &str, column: &str, statement: &str) -> bool;
}

/// Table and column identifiers both appear, as substrings, in the same statement.
///
/// This admits false positives when identifiers collide across tables or
/// aliases; a candidate it lets through may simply never win.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualCooccurrence;

impl ColumnRelevance for TextualCooccurrence {
    fn is_relevant(&self, table: &str, column: &str, statement: &str) -> bool {
        // Unquoted identifiers fold to lower case.
        let statement = statement.to_lowercase();
        statement.contains(&table.to_lowercase()) && statement.contains(&column.to_lowercase())
    }
}

/// Produces addable candidates and droppable indexes for one round.
#[derive(Debug, Clone)]
pub struct CandidateEnumerator<R = TextualCooccurrence> {
    relevance: R,
    methods: Vec<IndexMethod>,
    max_columns: usize,
}

impl CandidateEnumerator<TextualCooccurrence> {
    pub fn from_config(config: &AdvisorConfig) -> Self {
        Self::with_relevance(TextualCooccurrence, config)
    }
}

impl<R: ColumnRelevance> CandidateEnumerator<R> {
    pub fn with_relevance(relevance: R, config: &AdvisorConfig) -> Self {
        Self {
            relevance,
            methods: config.methods.clone(),
            max_columns: config.max_columns.clamp(1, 3),
        }
    }

    fn relevant_columns<'t>(&self, table: &'t TableSchema, workload: &[String]) -> Vec<&'t str> {
        table
            .columns
            .iter()
            .filter(|column| {
                workload
                    .iter()
                    .any(|statement| self.relevance.is_relevant(&table.name, column, statement))
            })
            .map(String::as_str)
            .collect()
    }

    /// Every candidate over workload-relevant columns that is not already a real index.
    pub fn enumerate_add_candidates(
        &self,
        tables: &[TableSchema],
        workload: &[String],
        existing: &[ExistingIndex],
    ) -> BTreeSet<IndexCandidate> {
        let mut candidates = BTreeSet::new();

        for table in tables {
            let columns = self.relevant_columns(table, workload);
            if columns.is_empty() {
                continue;
            }

            for &method in &self.methods {
                let width = self.max_columns.min(method.max_columns());
                for key in ordered_keys(&columns, width) {
                    if let Some(candidate) = IndexCandidate::new(table.name.as_str(), key, method) {
                        candidates.insert(candidate);
                    }
                }
            }
        }

        candidates.retain(|candidate| !existing.iter().any(|index| index.matches(candidate)));
        candidates
    }

    /// Existing indexes that are neither unique nor constraint-backed.
    pub fn enumerate_drop_candidates<'e>(&self, existing: &'e [ExistingIndex]) -> Vec<&'e ExistingIndex> {
        existing.iter().filter(|index| index.droppable).collect()
    }
}

/// Ordered selections of 1..=width distinct columns.
fn ordered_keys<'c>(columns: &[&'c str], width: usize) -> Vec<Vec<&'c str>> {
    let mut keys = Vec::new();
    let mut current = Vec::with_capacity(width);
    extend_keys(columns, width, &mut current, &mut keys);
    keys
}

fn extend_keys<'c>(
    columns: &[&'c str],
    width: usize,
    current: &mut Vec<&'c str>,
    keys: &mut Vec<Vec<&'c str>>,
) {
    if current.len() == width {
        return;
    }
    for &column in columns {
        if current.contains(&column) {
            continue;
        }
        current.push(column);
        keys.push(current.clone());
        extend_keys(columns, width, current, keys);
        current.pop();
    }
}
