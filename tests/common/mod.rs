//! In-memory database with a deterministic planner, for engine and session tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use sqlx_index_advisor::executor::Row;
use sqlx_index_advisor::{AdvisorError, Database, HypoId, IndexRow, Result, SqlConnection, StatementKind};

/// What the planner sees when it costs a statement.
pub struct PlannerView<'a> {
    hypothetical: Vec<&'a str>,
    enabled: Vec<&'a str>,
}

impl PlannerView<'_> {
    /// Whether any hypothetical index DDL contains `fragment`, e.g. `"USING btree (a)"`.
    pub fn has_hypothetical(&self, fragment: &str) -> bool {
        self.hypothetical.iter().any(|ddl| ddl.contains(fragment))
    }

    pub fn hypothetical_count(&self) -> usize {
        self.hypothetical.len()
    }

    /// Whether a real index is visible to the planner.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(&name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIndex {
    pub table: String,
    pub name: String,
    pub definition: String,
    pub droppable: bool,
    pub valid: bool,
}

type CostFn = Box<dyn Fn(&str, &PlannerView<'_>) -> f64>;

pub struct FakeDatabase {
    pub tables: Vec<(String, Vec<String>)>,
    pub indexes: Vec<FakeIndex>,
    pub hypothetical: BTreeMap<u32, String>,
    next_oid: u32,
    cost: CostFn,
    pub explain_calls: usize,
    /// Fail the explain call with this 1-based number
    pub fail_explain_at: Option<usize>,
    /// Return a plan line without cost annotation while a hypothetical index exists
    pub broken_plan_with_hypothetical: bool,
    /// Return a plan line without cost annotation while any real index is hidden
    pub broken_plan_while_hidden: bool,
    /// Fail every attempt to re-enable an index
    pub fail_restore: bool,
    /// Simulated planner latency per explain
    pub explain_delay: Option<Duration>,
    /// Replace the session right before these 1-based explain calls, dropping every hypothetical index
    pub reset_before_explain: Vec<usize>,
    pub generation: usize,
    /// Every index name passed to `set_index_enabled`
    pub toggled: Vec<(String, bool)>,
    pub created_ddl: Vec<String>,
}

impl FakeDatabase {
    pub fn new(cost: impl Fn(&str, &PlannerView<'_>) -> f64 + 'static) -> Self {
        Self {
            tables: Vec::new(),
            indexes: Vec::new(),
            hypothetical: BTreeMap::new(),
            next_oid: 16384,
            cost: Box::new(cost),
            explain_calls: 0,
            fail_explain_at: None,
            broken_plan_with_hypothetical: false,
            broken_plan_while_hidden: false,
            fail_restore: false,
            explain_delay: None,
            reset_before_explain: Vec::new(),
            generation: 0,
            toggled: Vec::new(),
            created_ddl: Vec::new(),
        }
    }

    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables.push((
            name.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        ));
        self
    }

    pub fn with_index(mut self, table: &str, name: &str, definition: &str, droppable: bool) -> Self {
        self.indexes.push(FakeIndex {
            table: table.to_string(),
            name: name.to_string(),
            definition: definition.to_string(),
            droppable,
            valid: true,
        });
        self
    }

    pub fn index(&self, name: &str) -> &FakeIndex {
        self.indexes.iter().find(|index| index.name == name).unwrap()
    }

    /// No hypothetical index and no hidden real index.
    pub fn is_pristine(&self) -> bool {
        self.hypothetical.is_empty() && self.indexes.iter().all(|index| index.valid)
    }

    fn view(&self) -> PlannerView<'_> {
        PlannerView {
            hypothetical: self.hypothetical.values().map(String::as_str).collect(),
            enabled: self
                .indexes
                .iter()
                .filter(|index| index.valid)
                .map(|index| index.name.as_str())
                .collect(),
        }
    }
}

/// `Seq Scan on t  (cost=0.00..<total> rows=10 width=8)`
pub fn plan_line(total: f64) -> String {
    format!("Seq Scan on t  (cost=0.00..{:.2} rows=10 width=8)", total)
}

pub fn queries(statements: &[&str]) -> Vec<String> {
    statements.iter().map(|s| s.to_string()).collect()
}

impl Database for FakeDatabase {
    async fn list_tables(&mut self, _schema: &str) -> Result<Vec<String>> {
        Ok(self.tables.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn list_columns(&mut self, _schema: &str, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, columns)| columns.clone())
            .unwrap_or_default())
    }

    async fn list_indexes(&mut self, _schema: &str) -> Result<Vec<IndexRow>> {
        Ok(self
            .indexes
            .iter()
            .map(|index| IndexRow {
                table: index.table.clone(),
                name: index.name.clone(),
                definition: index.definition.clone(),
                droppable: index.droppable && index.valid,
            })
            .collect())
    }

    async fn explain(&mut self, statement: &str) -> Result<String> {
        self.explain_calls += 1;
        if let Some(delay) = self.explain_delay {
            tokio::time::sleep(delay).await;
        }
        if self.reset_before_explain.contains(&self.explain_calls) {
            self.hypothetical.clear();
            self.generation += 1;
        }
        if self.fail_explain_at == Some(self.explain_calls) {
            return Err(AdvisorError::Connection {
                statement: format!("EXPLAIN {}", statement),
                message: "server closed the connection unexpectedly".to_string(),
            });
        }
        if self.broken_plan_with_hypothetical && !self.hypothetical.is_empty() {
            return Ok("Seq Scan on t".to_string());
        }
        if self.broken_plan_while_hidden && self.indexes.iter().any(|index| !index.valid) {
            return Ok("Seq Scan on t".to_string());
        }

        let total = (self.cost)(statement, &self.view());
        Ok(plan_line(total))
    }

    async fn create_hypothetical(&mut self, ddl: &str) -> Result<HypoId> {
        let oid = self.next_oid;
        self.next_oid += 1;
        self.hypothetical.insert(oid, ddl.to_string());
        self.created_ddl.push(ddl.to_string());
        Ok(HypoId(oid))
    }

    async fn drop_hypothetical(&mut self, id: HypoId) -> Result<()> {
        // Unknown ids are a no-op, as with hypopg_drop_index.
        self.hypothetical.remove(&id.0);
        Ok(())
    }

    async fn reset_hypothetical(&mut self) -> Result<()> {
        self.hypothetical.clear();
        Ok(())
    }

    async fn set_index_enabled(&mut self, _schema: &str, name: &str, enabled: bool) -> Result<()> {
        self.toggled.push((name.to_string(), enabled));
        if enabled && self.fail_restore {
            return Err(AdvisorError::Database("permission denied for table pg_index".to_string()));
        }
        let index = self
            .indexes
            .iter_mut()
            .find(|index| index.name == name)
            .ok_or_else(|| AdvisorError::Database(format!("relation \"{}\" does not exist", name)))?;
        index.valid = enabled;
        Ok(())
    }

    fn session_generation(&self) -> usize {
        self.generation
    }
}

/// A PostgreSQL backend behind the raw connection seam: one table `t(a)`, no
/// real indexes, and hypopg indexes that vanish with the session, as they do
/// on a new backend. Every plan costs 40 with a hypothetical index, 100 without.
pub struct HypopgBackend {
    pub hypothetical: BTreeMap<u32, String>,
    next_oid: u32,
    pub explains: usize,
    /// Fail this 1-based EXPLAIN once, like a dropped connection
    pub fail_explain_at: Option<usize>,
    pub resets: usize,
}

impl HypopgBackend {
    pub fn new() -> Self {
        Self {
            hypothetical: BTreeMap::new(),
            next_oid: 16384,
            explains: 0,
            fail_explain_at: None,
            resets: 0,
        }
    }
}

fn single_column(values: &[&str]) -> Option<Vec<Row>> {
    Some(values.iter().map(|value| vec![Some(value.to_string())]).collect())
}

impl SqlConnection for HypopgBackend {
    async fn run(&mut self, statement: &str, kind: StatementKind) -> Result<Option<Vec<Row>>> {
        if statement.starts_with("EXPLAIN") {
            self.explains += 1;
            if self.fail_explain_at == Some(self.explains) {
                return Err(AdvisorError::Database(
                    "server closed the connection unexpectedly".to_string(),
                ));
            }
            let total = if self.hypothetical.is_empty() { 100.0 } else { 40.0 };
            return Ok(single_column(&[plan_line(total).as_str()]));
        }
        if statement.contains("FROM pg_catalog.pg_tables") {
            return Ok(single_column(&["t"]));
        }
        if statement.contains("FROM information_schema.columns") {
            return Ok(single_column(&["a"]));
        }
        if statement.contains("FROM pg_catalog.pg_indexes") {
            return Ok(Some(Vec::new()));
        }
        if let Some(rest) = statement.strip_prefix("SELECT indexrelid::text FROM hypopg_create_index('") {
            let ddl = rest.trim_end_matches("')").replace("''", "'");
            let oid = self.next_oid;
            self.next_oid += 1;
            self.hypothetical.insert(oid, ddl);
            return Ok(single_column(&[oid.to_string().as_str()]));
        }
        if let Some(rest) = statement.strip_prefix("SELECT hypopg_drop_index(") {
            let oid = rest.split(')').next().and_then(|id| id.parse::<u32>().ok());
            let existed = oid.map_or(false, |oid| self.hypothetical.remove(&oid).is_some());
            return Ok(single_column(&[existed.to_string().as_str()]));
        }
        if statement.starts_with("SELECT hypopg_reset()") {
            self.hypothetical.clear();
            return Ok(single_column(&[""]));
        }

        match kind {
            StatementKind::Write => Ok(None),
            StatementKind::Read => Err(AdvisorError::Database(format!(
                "unexpected statement: {}",
                statement
            ))),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        self.hypothetical.clear();
        Ok(())
    }
}
