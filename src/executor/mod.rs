// SQL Executor
//
// Runs one statement at a time over a single connection. Reads (SELECT, EXPLAIN,
// SHOW) return their rows, everything else is executed and committed. A failed
// statement gets exactly one recovery attempt: reset the session, then retry.

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PgConnectionHandle;

use std::future::Future;

use crate::error::{AdvisorError, Result};

/// A result row. Every column is fetched as text; callers cast in SQL.
pub type Row = Vec<Option<String>>;

/// Whether a statement returns rows or is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    pub fn classify(statement: &str) -> Self {
        let head = statement
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or("");

        if ["select", "explain", "show"]
            .iter()
            .any(|kw| head.eq_ignore_ascii_case(kw))
        {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }
}

/// Raw connection seam: run a statement once, or throw the session away and open a new one.
pub trait SqlConnection {
    /// Run `statement`. Reads return `Some(rows)`, writes are committed and return `None`.
    fn run(
        &mut self,
        statement: &str,
        kind: StatementKind,
    ) -> impl Future<Output = Result<Option<Vec<Row>>>>;

    /// Discard the current session and acquire a fresh one.
    fn reset(&mut self) -> impl Future<Output = Result<()>>;
}

/// Executes statements with the single-retry policy.
pub struct SqlExecutor<C> {
    conn: C,
    resets: usize,
}

impl<C: SqlConnection> SqlExecutor<C> {
    pub fn new(conn: C) -> Self {
        Self { conn, resets: 0 }
    }

    /// Number of session resets performed so far.
    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Execute a statement, resetting the session and retrying once on failure.
    pub async fn execute(&mut self, statement: &str) -> Result<Option<Vec<Row>>> {
        let kind = StatementKind::classify(statement);

        #[cfg(feature = "log_sql")]
        tracing::debug!(target: "sqlx_index_advisor::sql", ?kind, statement, "executing");

        let first = match self.conn.run(statement, kind).await {
            Ok(rows) => return Ok(rows),
            Err(err) => err,
        };

        tracing::warn!(
            error = %first,
            statement,
            "statement failed, resetting session and retrying once"
        );
        self.resets += 1;
        self.conn.reset().await.map_err(|err| AdvisorError::Connection {
            statement: statement.to_string(),
            message: format!("session reset failed: {}", err),
        })?;
        tracing::warn!("session reset discards hypothetical indexes created on the old session");

        self.conn
            .run(statement, kind)
            .await
            .map_err(|err| AdvisorError::Connection {
                statement: statement.to_string(),
                message: err.to_string(),
            })
    }

    /// Execute a read statement and return its rows.
    pub async fn fetch(&mut self, statement: &str) -> Result<Vec<Row>> {
        self.execute(statement)
            .await?
            .ok_or_else(|| AdvisorError::unexpected(statement, "statement returned no rows"))
    }
}
