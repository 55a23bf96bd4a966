//! Workload-driven index advisor for PostgreSQL.
//!
//! Given a sampled workload, the advisor proposes `CREATE INDEX` and
//! `DROP INDEX` statements that lower the planner's estimated cost of that
//! workload. Candidates are evaluated with hypothetical indexes (the `hypopg`
//! extension) and by temporarily hiding real indexes from the planner; nothing
//! is materialized, and every hypothetical change is reverted before a session
//! returns.
//!
//! # Example
//!
//! ```ignore
//! use sqlx_index_advisor::{AdvisorConfig, PgConnectionHandle, PgDatabase, TuningSession, Workload};
//!
//! let conn = PgConnectionHandle::connect("postgres://postgres@127.0.0.1/app").await?;
//! let mut db = PgDatabase::new(conn);
//! db.install_hypopg().await?;
//!
//! let workload = Workload::from_file("sample_workload").await?;
//! let session = TuningSession::new(AdvisorConfig::default())?;
//! let report = session.run(&mut db, workload.statements()).await?;
//!
//! print!("{}", sqlx_index_advisor::render_actions(&report.actions));
//! ```

pub mod candidate;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod database;
pub mod engine;
pub mod error;
pub mod executor;
pub mod probe;
pub mod session;
pub mod workload;

pub use candidate::{CandidateEnumerator, ColumnRelevance, IndexCandidate, IndexMethod, TextualCooccurrence};
pub use catalog::{ExistingIndex, Schema, SchemaInspector, TableSchema};
pub use config::AdvisorConfig;
pub use cost::{CostOracle, CostReport};
pub use database::{Database, HypoId, IndexRow, PgDatabase};
pub use engine::{Action, ActionKind, AdvisorState, IndexAdvisor};
pub use error::{AdvisorError, Result};
pub use executor::{SqlConnection, SqlExecutor, StatementKind};
pub use session::{SessionReport, TuningSession};
pub use workload::{render_actions, Workload};

#[cfg(feature = "postgres")]
pub use executor::PgConnectionHandle;
