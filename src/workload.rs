//! Workload input and action-script output.
//!
//! A workload is the ordered list of SQL statements sampled from a trace, one
//! statement per line. The session's result is rendered back as a script with
//! one terminated statement per line.

use std::path::Path;

use crate::engine::Action;
use crate::error::Result;

/// Ordered SQL statements to tune for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    statements: Vec<String>,
}

impl Workload {
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }

    /// One statement per non-blank line.
    pub fn from_text(text: &str) -> Self {
        let statements = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { statements }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::from_text(&text))
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// One terminated statement per line, in the given order.
pub fn render_actions(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|action| format!("{}\n", action.to_statement()))
        .collect()
}
