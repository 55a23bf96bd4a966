//! Workload cost evaluation.
//!
//! Each statement is explained (never executed) and the planner's total cost is
//! read from the top plan line, e.g.
//! `Seq Scan on t  (cost=0.00..35.50 rows=2550 width=8)`.

use crate::database::Database;
use crate::error::{AdvisorError, Result};

/// Estimated cost of a workload under one index configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CostReport {
    pub total: f64,
    /// Aligned index-for-index with the evaluated statements
    pub per_query: Vec<f64>,
}

impl CostReport {
    pub fn from_costs(per_query: Vec<f64>) -> Self {
        Self {
            total: per_query.iter().sum(),
            per_query,
        }
    }
}

/// Total cost from the `(cost=<startup>..<total> ...)` annotation of a plan line.
pub fn parse_total_cost(plan_line: &str) -> Option<f64> {
    let annotation = &plan_line[plan_line.find("cost=")? + "cost=".len()..];
    let total = &annotation[annotation.find("..")? + 2..];
    let end = total
        .find(|c: char| c.is_whitespace() || c == ')')
        .unwrap_or(total.len());
    total[..end].parse::<f64>().ok().filter(|cost| cost.is_finite())
}

/// Computes workload cost under whatever hypothetical configuration is active.
pub struct CostOracle;

impl CostOracle {
    /// Explain every statement in order. A plan without a cost annotation is fatal.
    pub async fn evaluate<D: Database>(db: &mut D, queries: &[String]) -> Result<CostReport> {
        let mut per_query = Vec::with_capacity(queries.len());

        for query in queries {
            let plan = db.explain(query).await?;
            let cost = parse_total_cost(&plan).ok_or_else(|| AdvisorError::CostParse {
                query: query.clone(),
                plan: plan.clone(),
            })?;
            per_query.push(cost);
        }

        Ok(CostReport::from_costs(per_query))
    }
}
