//! Iteration controller.
//!
//! A session grows the index set round by round until no candidate improves the
//! workload or the deadline passes. Only a session that added nothing moves on
//! to shrinking. Whatever happens, the hypothetical configuration is reverted
//! before the session returns.

use std::time::Duration;
use tokio::time::Instant;

use crate::candidate::{ColumnRelevance, TextualCooccurrence};
use crate::config::AdvisorConfig;
use crate::database::Database;
use crate::engine::{Action, AdvisorState, IndexAdvisor};
use crate::error::{AdvisorError, Result};

/// Outcome of a completed session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Additions in discovery order, then drops in discovery order
    pub actions: Vec<Action>,
    /// Engine invocations, including the final empty one
    pub rounds: usize,
    pub elapsed: Duration,
    pub deadline_reached: bool,
}

/// Runs the add and drop engines under a deadline.
pub struct TuningSession<R = TextualCooccurrence> {
    advisor: IndexAdvisor<R>,
}

impl TuningSession<TextualCooccurrence> {
    pub fn new(config: AdvisorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            advisor: IndexAdvisor::new(config),
        })
    }
}

impl<R: ColumnRelevance> TuningSession<R> {
    pub fn with_advisor(advisor: IndexAdvisor<R>) -> Result<Self> {
        advisor.config().validate()?;
        Ok(Self { advisor })
    }

    pub fn advisor(&self) -> &IndexAdvisor<R> {
        &self.advisor
    }

    /// Run one session with fresh state.
    pub async fn run<D: Database>(&self, db: &mut D, queries: &[String]) -> Result<SessionReport> {
        let mut state = AdvisorState::new();
        self.run_with_state(db, queries, &mut state).await
    }

    /// Run one session with caller-provided state. `state.added` is
    /// materialized and `state.dropped` hidden before the first round, and
    /// neither is proposed again; the state is left clean.
    #[tracing::instrument(skip_all, fields(queries = queries.len(), schema = %self.advisor.config().schema))]
    pub async fn run_with_state<D: Database>(
        &self,
        db: &mut D,
        queries: &[String],
        state: &mut AdvisorState,
    ) -> Result<SessionReport> {
        // The deadline comes from a monotonic clock read before anything else.
        let started = Instant::now();
        let deadline = started + self.advisor.config().deadline_budget();
        tracing::info!(budget = ?self.advisor.config().deadline_budget(), "tuning session started");

        let outcome = match self.advisor.apply_state(db, state).await {
            Ok(()) => self.iterate(db, queries, state, deadline).await,
            Err(err) => Err(err),
        };
        let reverted = revert(db, &self.advisor.config().schema, state).await;

        let (actions, rounds) = match (outcome, reverted) {
            (Ok(done), Ok(())) => done,
            (Err(err), Ok(())) => {
                tracing::error!(error = %err, "tuning session failed");
                return Err(err);
            }
            (Ok(_), Err(revert_err)) => return Err(revert_err),
            (Err(err), Err(revert_err)) => {
                tracing::error!(error = %err, revert_error = %revert_err, "tuning session failed and could not revert");
                return Err(err);
            }
        };

        let report = SessionReport {
            actions,
            rounds,
            elapsed: started.elapsed(),
            deadline_reached: Instant::now() >= deadline,
        };
        tracing::info!(
            actions = report.actions.len(),
            rounds = report.rounds,
            elapsed = ?report.elapsed,
            deadline_reached = report.deadline_reached,
            "tuning session finished"
        );
        Ok(report)
    }

    async fn iterate<D: Database>(
        &self,
        db: &mut D,
        queries: &[String],
        state: &mut AdvisorState,
        deadline: Instant,
    ) -> Result<(Vec<Action>, usize)> {
        let mut actions = Vec::new();
        let mut rounds = 0;

        while Instant::now() < deadline {
            rounds += 1;
            let added = self
                .advisor
                .propose_add(db, queries, state, Some(deadline))
                .await?;
            if added.is_empty() {
                break;
            }
            actions.extend(added);
        }

        if !actions.is_empty() {
            return Ok((actions, rounds));
        }

        tracing::info!("no index to add, looking for indexes to drop");
        while Instant::now() < deadline {
            rounds += 1;
            let dropped = self
                .advisor
                .propose_drop(db, queries, state, Some(deadline))
                .await?;
            if dropped.is_empty() {
                break;
            }
            actions.extend(dropped);
        }

        Ok((actions, rounds))
    }
}

/// Remove every hypothetical index and unhide every index hidden by the session.
///
/// Every step is attempted even when an earlier one fails.
pub async fn revert<D: Database>(db: &mut D, schema: &str, state: &mut AdvisorState) -> Result<()> {
    let mut failures = Vec::new();

    match db.reset_hypothetical().await {
        Ok(()) => state.hypothetical.clear(),
        Err(err) => failures.push(format!("hypothetical indexes: {}", err)),
    }

    for name in state.hidden.clone() {
        match db.set_index_enabled(schema, &name, true).await {
            Ok(()) => {
                state.hidden.remove(&name);
            }
            Err(err) => failures.push(format!("{}: {}", name, err)),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        let message = failures.join("; ");
        tracing::error!(%message, "hypothetical configuration left behind");
        Err(AdvisorError::Revert(message))
    }
}
