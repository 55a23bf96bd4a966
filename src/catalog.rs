//! Schema inspection.
//!
//! Reads tables, columns and existing indexes of one schema through a
//! [`Database`], and parses each index definition into structured form.

use crate::candidate::{IndexCandidate, IndexMethod};
use crate::database::{qualified_name, Database, IndexRow};
use crate::error::Result;

/// Table definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

/// A real index parsed from catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingIndex {
    pub name: String,
    pub table: String,
    /// Key columns in index order. Expression keys are kept verbatim.
    pub columns: Vec<String>,
    pub method: IndexMethod,
    /// Not unique and not backing any constraint
    pub droppable: bool,
}

impl ExistingIndex {
    /// Same table, same key columns in the same order, same method.
    pub fn matches(&self, candidate: &IndexCandidate) -> bool {
        self.table == candidate.table()
            && self.method == candidate.method()
            && self.columns.iter().map(String::as_str).eq(candidate.columns().iter().map(String::as_str))
    }

    pub fn drop_sql(&self, schema: &str) -> String {
        format!("DROP INDEX {}", qualified_name(schema, &self.name))
    }
}

/// Snapshot of one schema, re-read every round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub tables: Vec<TableSchema>,
    pub indexes: Vec<ExistingIndex>,
}

/// Reads database schema metadata (tables, columns, indexes)
pub struct SchemaInspector<'a> {
    schema: &'a str,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(schema: &'a str) -> Self {
        Self { schema }
    }

    /// Read all tables with their columns, in name order.
    pub async fn read_tables<D: Database>(&self, db: &mut D) -> Result<Vec<TableSchema>> {
        let names = db.list_tables(self.schema).await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = db.list_columns(self.schema, &name).await?;
            tables.push(TableSchema { name, columns });
        }

        Ok(tables)
    }

    /// Read and parse every index. Definitions that cannot be parsed are skipped.
    pub async fn read_indexes<D: Database>(&self, db: &mut D) -> Result<Vec<ExistingIndex>> {
        let rows = db.list_indexes(self.schema).await?;
        Ok(rows.iter().filter_map(parse_index_row).collect())
    }

    pub async fn inspect<D: Database>(&self, db: &mut D) -> Result<Schema> {
        let tables = self.read_tables(db).await?;
        let indexes = self.read_indexes(db).await?;
        Ok(Schema { tables, indexes })
    }
}

fn parse_index_row(row: &IndexRow) -> Option<ExistingIndex> {
    match parse_index_definition(&row.definition) {
        Some((method, columns)) => Some(ExistingIndex {
            name: row.name.clone(),
            table: row.table.clone(),
            columns,
            method,
            droppable: row.droppable,
        }),
        None => {
            tracing::warn!(
                index = %row.name,
                definition = %row.definition,
                "skipping index with unparseable definition"
            );
            None
        }
    }
}

/// Extract the method and key columns from a definition such as
/// `CREATE INDEX t_a_b_idx ON public.t USING btree (a, b DESC)`.
///
/// The method is read after the first standalone `USING` outside double
/// quotes; anything later belongs to the `WHERE` predicate of a partial index.
///
/// Returns `None` when there is no `USING` clause, the method is unknown, or the
/// key list is unbalanced or empty.
pub fn parse_index_definition(definition: &str) -> Option<(IndexMethod, Vec<String>)> {
    let after_using = &definition[find_keyword(definition, "using")? + "using".len()..];
    let rest = after_using.trim_start();

    let method_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let method: IndexMethod = rest[..method_end].parse().ok()?;

    let keys = rest[method_end..].trim_start().strip_prefix('(')?;
    let body = &keys[..matching_paren(keys)?];

    let columns = split_top_level(body)
        .into_iter()
        .map(key_column)
        .collect::<Option<Vec<_>>>()?;

    if columns.is_empty() {
        None
    } else {
        Some((method, columns))
    }
}

/// Byte offset of the first standalone `keyword` outside double quotes.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut in_quotes = false;

    for (idx, &b) in bytes.iter().enumerate() {
        if b == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes || idx + keyword.len() > bytes.len() {
            continue;
        }
        let candidate = &bytes[idx..idx + keyword.len()];
        let starts_word = idx == 0 || !is_word(bytes[idx - 1]);
        let ends_word = bytes.get(idx + keyword.len()).map_or(true, |&next| !is_word(next));
        if starts_word && ends_word && candidate.eq_ignore_ascii_case(keyword.as_bytes()) {
            return Some(idx);
        }
    }

    None
}

/// Offset of the `)` closing a list whose `(` was already consumed.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') if depth == 0 => return Some(idx),
            (None, ')') => depth -= 1,
            _ => {}
        }
    }

    None
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);

    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Column name of one index key, dropping ordering and operator class words.
fn key_column(key: &str) -> Option<String> {
    if key.starts_with('(') || key.contains('(') {
        return Some(key.to_string());
    }

    if let Some(quoted) = key.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    name.push('"');
                } else {
                    return Some(name);
                }
            } else {
                name.push(c);
            }
        }
        return None;
    }

    key.split_whitespace().next().map(str::to_string)
}
