//! Scoped hypothetical changes.
//!
//! A probe applies one hypothetical change, evaluates the workload, and reverts
//! the change on every exit path before returning. Callers never pair the two
//! halves by hand.

use std::collections::BTreeSet;

use crate::candidate::IndexCandidate;
use crate::catalog::ExistingIndex;
use crate::cost::{CostOracle, CostReport};
use crate::database::{Database, HypoId};
use crate::error::Result;

/// One change to the planner's view of the schema.
#[derive(Debug, Clone, Copy)]
pub enum HypotheticalChange<'a> {
    /// Materialize a hypothetical index
    Add(&'a IndexCandidate),
    /// Hide a real index from the planner
    Hide(&'a ExistingIndex),
}

/// How to undo an applied change.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    DropHypothetical(HypoId),
    Unhide(String),
}

impl HypotheticalChange<'_> {
    /// Apply the change. Hidden index names are recorded in `unrestored` until undone.
    pub async fn apply<D: Database>(
        &self,
        db: &mut D,
        schema: &str,
        unrestored: &mut BTreeSet<String>,
    ) -> Result<Undo> {
        match self {
            HypotheticalChange::Add(candidate) => {
                let id = db.create_hypothetical(&candidate.create_sql(schema)).await?;
                Ok(Undo::DropHypothetical(id))
            }
            HypotheticalChange::Hide(index) => {
                unrestored.insert(index.name.clone());
                db.set_index_enabled(schema, &index.name, false).await?;
                Ok(Undo::Unhide(index.name.clone()))
            }
        }
    }
}

impl Undo {
    pub async fn revert<D: Database>(
        self,
        db: &mut D,
        schema: &str,
        unrestored: &mut BTreeSet<String>,
    ) -> Result<()> {
        match self {
            Undo::DropHypothetical(id) => db.drop_hypothetical(id).await,
            Undo::Unhide(name) => {
                db.set_index_enabled(schema, &name, true).await?;
                unrestored.remove(&name);
                Ok(())
            }
        }
    }
}

/// Evaluate `queries` with `change` applied, then revert it.
///
/// If the evaluation fails the change is still reverted first. If only the
/// revert fails, its error is returned; if both fail, the evaluation error wins
/// and the revert failure is logged. An index that could not be unhidden stays
/// in `unrestored` for the session-level revert.
pub async fn evaluate_under<D: Database>(
    db: &mut D,
    schema: &str,
    queries: &[String],
    change: HypotheticalChange<'_>,
    unrestored: &mut BTreeSet<String>,
) -> Result<CostReport> {
    let undo = change.apply(db, schema, unrestored).await?;
    let outcome = CostOracle::evaluate(db, queries).await;
    let restored = undo.revert(db, schema, unrestored).await;

    match (outcome, restored) {
        (Ok(report), Ok(())) => Ok(report),
        (Err(err), Ok(())) => Err(err),
        (Ok(_), Err(revert_err)) => Err(revert_err),
        (Err(err), Err(revert_err)) => {
            tracing::error!(?change, error = %revert_err, "failed to revert probe after evaluation error");
            Err(err)
        }
    }
}
