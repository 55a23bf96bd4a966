//! Error taxonomy for the advisor.
//!
//! Connection faults are retried once by the executor before they reach this
//! type. Everything that does surface here is fatal for the current session;
//! the session still reverts its hypothetical configuration before returning it.

use thiserror::Error;

pub type Result<T, E = AdvisorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("database error: {0}")]
    Database(String),

    #[error("statement failed after session reset '{statement}': {message}")]
    Connection { statement: String, message: String },

    #[error("no cost annotation in plan for '{query}': {plan}")]
    CostParse { query: String, plan: String },

    #[error("unexpected result for '{statement}': {message}")]
    UnexpectedResult { statement: String, message: String },

    #[error("failed to revert hypothetical configuration: {0}")]
    Revert(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "json")]
    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdvisorError {
    pub(crate) fn unexpected(statement: &str, message: impl Into<String>) -> Self {
        AdvisorError::UnexpectedResult {
            statement: statement.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AdvisorError {
    fn from(err: sqlx::Error) -> Self {
        AdvisorError::Database(err.to_string())
    }
}
