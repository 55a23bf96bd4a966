//! Add and drop engines.
//!
//! Each call probes every remaining candidate of one round, picks the one with
//! the lowest workload total, and accepts it only if the policy in
//! [`AdvisorConfig`] says so. An accepted change is left applied
//! hypothetically so later rounds of the same session see it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::time::Instant;

use crate::candidate::{CandidateEnumerator, ColumnRelevance, IndexCandidate, TextualCooccurrence};
use crate::catalog::{ExistingIndex, SchemaInspector};
use crate::config::AdvisorConfig;
use crate::cost::{CostOracle, CostReport};
use crate::database::{Database, HypoId};
use crate::error::{AdvisorError, Result};
use crate::probe::{evaluate_under, HypotheticalChange};

/// Kind of a recommended action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Add,
    Drop,
}

/// A recommended DDL statement, the only durable output of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Statement text without the terminating semicolon
    pub ddl: String,
}

impl Action {
    pub fn add(ddl: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Add,
            ddl: ddl.into(),
        }
    }

    pub fn drop(ddl: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Drop,
            ddl: ddl.into(),
        }
    }

    /// The terminated statement, e.g. `DROP INDEX t_a_idx;`
    pub fn to_statement(&self) -> String {
        format!("{};", self.ddl)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.ddl)
    }
}

/// Hypothetical configuration accumulated during one session.
#[derive(Debug, Clone, Default)]
pub struct AdvisorState {
    /// Accepted additions, kept materialized as hypothetical indexes
    pub added: BTreeSet<IndexCandidate>,
    /// Accepted drops (index names), kept hidden from the planner
    pub dropped: BTreeSet<String>,
    /// Real indexes currently hidden by this session, including any whose probe could not restore them
    pub hidden: BTreeSet<String>,
    /// Handles of the hypothetical indexes behind `added`
    pub hypothetical: Vec<HypoId>,
    /// Session generation the handles in `hypothetical` belong to
    pub generation: usize,
}

impl AdvisorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session still has hypothetical configuration to revert.
    pub fn is_clean(&self) -> bool {
        self.hidden.is_empty() && self.hypothetical.is_empty()
    }
}

/// Why an addition was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddRule {
    /// Workload total dropped below `(1 - threshold) * baseline`
    GlobalImprovement,
    /// One query at least reached `factor * baseline` and the total improved
    PerQueryImprovement { query: usize },
}

/// Why a drop was rejected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropRejection {
    /// The workload total would grow
    CostIncrease { baseline: f64, cost: f64 },
    /// One query's cost would grow past `baseline / factor`
    QueryRegression { query: usize, baseline: f64, cost: f64 },
}

/// Accept rule for additions: either condition admits the winner.
pub fn accept_addition(config: &AdvisorConfig, baseline: &CostReport, best: &CostReport) -> Option<AddRule> {
    if best.total < (1.0 - config.global_improvement_threshold) * baseline.total {
        return Some(AddRule::GlobalImprovement);
    }
    if best.total >= baseline.total {
        return None;
    }

    baseline
        .per_query
        .iter()
        .zip(&best.per_query)
        .position(|(&base, &cost)| cost < base && cost <= config.per_query_improvement_factor * base)
        .map(|query| AddRule::PerQueryImprovement { query })
}

/// Accept rule for drops: the total must not grow and no single query may regress.
pub fn accept_drop(config: &AdvisorConfig, baseline: &CostReport, best: &CostReport) -> Result<(), DropRejection> {
    if best.total > baseline.total {
        return Err(DropRejection::CostIncrease {
            baseline: baseline.total,
            cost: best.total,
        });
    }

    let regression = baseline
        .per_query
        .iter()
        .zip(&best.per_query)
        .position(|(&base, &cost)| cost > base && cost >= base / config.per_query_regression_factor);

    match regression {
        Some(query) => Err(DropRejection::QueryRegression {
            query,
            baseline: baseline.per_query[query],
            cost: best.per_query[query],
        }),
        None => Ok(()),
    }
}

/// Evaluations interrupted by a session reset are redone at most this many times.
const SESSION_RESET_RETRIES: usize = 2;

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |deadline| Instant::now() >= deadline)
}

/// Candidate enumeration plus the add/drop decision policy.
#[derive(Debug, Clone)]
pub struct IndexAdvisor<R = TextualCooccurrence> {
    config: AdvisorConfig,
    enumerator: CandidateEnumerator<R>,
}

impl IndexAdvisor<TextualCooccurrence> {
    pub fn new(config: AdvisorConfig) -> Self {
        let enumerator = CandidateEnumerator::from_config(&config);
        Self { config, enumerator }
    }
}

impl<R: ColumnRelevance> IndexAdvisor<R> {
    /// Use a custom column relevance predicate for enumeration.
    pub fn with_relevance(config: AdvisorConfig, relevance: R) -> Self {
        let enumerator = CandidateEnumerator::with_relevance(relevance, &config);
        Self { config, enumerator }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Make the planner see the configuration `state` describes: every
    /// `added` candidate as a hypothetical index, every `dropped` index hidden.
    ///
    /// Hypothetical indexes already present in the session are discarded first.
    pub async fn apply_state<D: Database>(&self, db: &mut D, state: &mut AdvisorState) -> Result<()> {
        let schema = self.config.schema.as_str();
        for name in &state.dropped {
            if state.hidden.insert(name.clone()) {
                db.set_index_enabled(schema, name, false).await?;
            }
        }
        self.materialize_added(db, state).await
    }

    /// Recreate the hypothetical indexes behind `state.added` in the current session.
    async fn materialize_added<D: Database>(&self, db: &mut D, state: &mut AdvisorState) -> Result<()> {
        let generation = db.session_generation();
        db.reset_hypothetical().await?;
        state.hypothetical.clear();
        for candidate in &state.added {
            let id = db.create_hypothetical(&candidate.create_sql(&self.config.schema)).await?;
            state.hypothetical.push(id);
        }
        // A reset during the loop leaves `generation` stale, so the next check redoes this.
        state.generation = generation;
        Ok(())
    }

    /// Evaluate the workload, optionally under one more hypothetical change,
    /// against the configuration in `state`.
    ///
    /// A session reset drops every hypothetical index, so when one happens
    /// during the evaluation the accepted additions are recreated and the
    /// evaluation is redone.
    async fn evaluate<D: Database>(
        &self,
        db: &mut D,
        queries: &[String],
        state: &mut AdvisorState,
        change: Option<HypotheticalChange<'_>>,
    ) -> Result<CostReport> {
        for _ in 0..=SESSION_RESET_RETRIES {
            if db.session_generation() != state.generation {
                tracing::warn!(
                    added = state.added.len(),
                    "session was reset, recreating hypothetical indexes"
                );
                self.materialize_added(db, state).await?;
            }

            let outcome = match change {
                Some(change) => {
                    evaluate_under(db, &self.config.schema, queries, change, &mut state.hidden).await
                }
                None => CostOracle::evaluate(db, queries).await,
            };
            if db.session_generation() == state.generation {
                return outcome;
            }
            if let Err(err) = outcome {
                tracing::debug!(error = %err, "discarding evaluation interrupted by a session reset");
            }
        }

        Err(AdvisorError::Connection {
            statement: "EXPLAIN".to_string(),
            message: "session kept resetting while the workload was evaluated".to_string(),
        })
    }

    /// Addable candidates for the current schema, minus what this session already added.
    pub async fn add_candidates<D: Database>(
        &self,
        db: &mut D,
        queries: &[String],
        state: &AdvisorState,
    ) -> Result<BTreeSet<IndexCandidate>> {
        let schema = SchemaInspector::new(&self.config.schema).inspect(db).await?;
        let mut candidates =
            self.enumerator
                .enumerate_add_candidates(&schema.tables, queries, &schema.indexes);
        candidates.retain(|candidate| !state.added.contains(candidate));
        Ok(candidates)
    }

    /// Droppable indexes, minus what this session already dropped.
    pub async fn drop_candidates<D: Database>(
        &self,
        db: &mut D,
        state: &AdvisorState,
    ) -> Result<Vec<ExistingIndex>> {
        let existing = SchemaInspector::new(&self.config.schema).read_indexes(db).await?;
        Ok(self
            .enumerator
            .enumerate_drop_candidates(&existing)
            .into_iter()
            .filter(|index| !state.dropped.contains(&index.name))
            .cloned()
            .collect())
    }

    /// Probe every remaining addable candidate and return at most one ADD action.
    ///
    /// When `deadline` passes between probes, the candidates probed so far are
    /// judged under the same rules.
    pub async fn propose_add<D: Database>(
        &self,
        db: &mut D,
        queries: &[String],
        state: &mut AdvisorState,
        deadline: Option<Instant>,
    ) -> Result<Vec<Action>> {
        let schema = self.config.schema.as_str();
        let candidates = self.add_candidates(db, queries, state).await?;
        if candidates.is_empty() {
            tracing::debug!("no index candidates left to add");
            return Ok(Vec::new());
        }

        let baseline = self.evaluate(db, queries, state, None).await?;
        tracing::debug!(
            candidates = candidates.len(),
            baseline = baseline.total,
            "probing add candidates"
        );

        let mut best: Option<(IndexCandidate, CostReport)> = None;
        for candidate in candidates {
            if deadline_passed(deadline) {
                tracing::warn!("deadline reached while probing add candidates");
                break;
            }

            let report = self
                .evaluate(db, queries, state, Some(HypotheticalChange::Add(&candidate)))
                .await?;
            tracing::debug!(%candidate, cost = report.total, "probed add candidate");

            if best.as_ref().map_or(true, |(_, current)| report.total < current.total) {
                best = Some((candidate, report));
            }
        }

        let Some((candidate, report)) = best else {
            return Ok(Vec::new());
        };

        let Some(rule) = accept_addition(&self.config, &baseline, &report) else {
            tracing::debug!(
                %candidate,
                baseline = baseline.total,
                cost = report.total,
                "best add candidate is not a significant improvement"
            );
            return Ok(Vec::new());
        };

        let ddl = candidate.create_sql(schema);
        let id = db.create_hypothetical(&ddl).await?;
        state.hypothetical.push(id);
        state.added.insert(candidate);

        tracing::info!(
            ddl = %ddl,
            ?rule,
            baseline = baseline.total,
            cost = report.total,
            "recommending index"
        );
        Ok(vec![Action::add(ddl)])
    }

    /// Probe every remaining droppable index and return at most one DROP action.
    pub async fn propose_drop<D: Database>(
        &self,
        db: &mut D,
        queries: &[String],
        state: &mut AdvisorState,
        deadline: Option<Instant>,
    ) -> Result<Vec<Action>> {
        let schema = self.config.schema.as_str();
        let candidates = self.drop_candidates(db, state).await?;
        if candidates.is_empty() {
            tracing::debug!("no droppable indexes left");
            return Ok(Vec::new());
        }

        let baseline = self.evaluate(db, queries, state, None).await?;
        tracing::debug!(
            candidates = candidates.len(),
            baseline = baseline.total,
            "probing drop candidates"
        );

        let mut best: Option<(&ExistingIndex, CostReport)> = None;
        for index in &candidates {
            if deadline_passed(deadline) {
                tracing::warn!("deadline reached while probing drop candidates");
                break;
            }

            let report = self
                .evaluate(db, queries, state, Some(HypotheticalChange::Hide(index)))
                .await?;
            tracing::debug!(index = %index.name, cost = report.total, "probed drop candidate");

            if best.as_ref().map_or(true, |(_, current)| report.total < current.total) {
                best = Some((index, report));
            }
        }

        let Some((index, report)) = best else {
            return Ok(Vec::new());
        };

        if let Err(rejection) = accept_drop(&self.config, &baseline, &report) {
            tracing::debug!(index = %index.name, ?rejection, "best drop candidate rejected");
            return Ok(Vec::new());
        }

        state.hidden.insert(index.name.clone());
        db.set_index_enabled(schema, &index.name, false).await?;
        state.dropped.insert(index.name.clone());

        let ddl = index.drop_sql(schema);
        tracing::info!(
            ddl = %ddl,
            baseline = baseline.total,
            cost = report.total,
            "recommending index removal"
        );
        Ok(vec![Action::drop(ddl)])
    }
}
