// Database capability
//
// Everything the advisor needs from the live database: catalog introspection,
// cost estimation (EXPLAIN without execution), hypothetical indexes, and the
// validity toggle used to simulate dropping a real index.

mod postgres;

pub use postgres::PgDatabase;

use std::fmt;
use std::future::Future;

use crate::error::Result;

/// Opaque handle of a hypothetical index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HypoId(pub u32);

impl fmt::Display for HypoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One index as listed by the catalog, before its definition is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub table: String,
    pub name: String,
    /// Full definition, e.g. `CREATE INDEX t_a_idx ON public.t USING btree (a)`
    pub definition: String,
    /// Not unique, not backing a constraint, currently valid and ready
    pub droppable: bool,
}

/// Catalog, planner and hypothetical-index operations over one session.
pub trait Database {
    /// Tables of `schema`, in name order.
    fn list_tables(&mut self, schema: &str) -> impl Future<Output = Result<Vec<String>>>;

    /// Columns of `schema.table`, in ordinal order.
    fn list_columns(&mut self, schema: &str, table: &str) -> impl Future<Output = Result<Vec<String>>>;

    /// Every index of `schema`.
    fn list_indexes(&mut self, schema: &str) -> impl Future<Output = Result<Vec<IndexRow>>>;

    /// Top-level line of the estimated plan for `statement`. The statement is not executed.
    fn explain(&mut self, statement: &str) -> impl Future<Output = Result<String>>;

    /// Create a hypothetical index from its `CREATE INDEX` text.
    fn create_hypothetical(&mut self, ddl: &str) -> impl Future<Output = Result<HypoId>>;

    fn drop_hypothetical(&mut self, id: HypoId) -> impl Future<Output = Result<()>>;

    /// Remove every hypothetical index of the session.
    fn reset_hypothetical(&mut self) -> impl Future<Output = Result<()>>;

    /// Set both validity and readiness of a real index. `false` hides it from the planner.
    fn set_index_enabled(
        &mut self,
        schema: &str,
        name: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<()>>;

    /// Bumped every time the underlying session is replaced. Hypothetical
    /// indexes created under an older generation no longer exist.
    fn session_generation(&self) -> usize;
}

/// Quote an identifier unless it is a plain lower-case identifier.
pub fn quote_identifier(identifier: &str) -> String {
    let plain = identifier
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase() || c == '_')
        && identifier
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if plain {
        identifier.to_string()
    } else {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }
}

/// `schema.name`, leaving the default `public` schema implicit.
pub fn qualified_name(schema: &str, name: &str) -> String {
    if schema == "public" {
        quote_identifier(name)
    } else {
        format!("{}.{}", quote_identifier(schema), quote_identifier(name))
    }
}

/// Escape a value for use inside a single-quoted SQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
