// PostgreSQL + hypopg implementation of the Database capability.

use crate::database::{escape_literal, qualified_name, Database, HypoId, IndexRow};
use crate::error::{AdvisorError, Result};
use crate::executor::{Row, SqlConnection, SqlExecutor};

/// Catalog and planner access over one executor session.
///
/// Hypothetical indexes are provided by the `hypopg` extension and only live
/// in the session that created them.
pub struct PgDatabase<C> {
    executor: SqlExecutor<C>,
}

impl<C: SqlConnection> PgDatabase<C> {
    pub fn new(conn: C) -> Self {
        Self {
            executor: SqlExecutor::new(conn),
        }
    }

    pub fn executor(&self) -> &SqlExecutor<C> {
        &self.executor
    }

    pub fn into_inner(self) -> C {
        self.executor.into_inner()
    }

    /// Make sure the hypothetical-index extension is available.
    pub async fn install_hypopg(&mut self) -> Result<()> {
        self.executor
            .execute("CREATE EXTENSION IF NOT EXISTS hypopg")
            .await?;
        Ok(())
    }

    async fn fetch_column(&mut self, statement: &str) -> Result<Vec<String>> {
        let rows = self.executor.fetch(statement).await?;
        rows.into_iter()
            .map(|row| first_value(statement, row))
            .collect()
    }
}

fn first_value(statement: &str, row: Row) -> Result<String> {
    row.into_iter()
        .next()
        .flatten()
        .ok_or_else(|| AdvisorError::unexpected(statement, "missing value in first column"))
}

impl<C: SqlConnection> Database for PgDatabase<C> {
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        let statement = format!(
            "SELECT tablename::text FROM pg_catalog.pg_tables \
             WHERE schemaname = '{}' ORDER BY tablename",
            escape_literal(schema)
        );
        self.fetch_column(&statement).await
    }

    async fn list_columns(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let statement = format!(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' ORDER BY ordinal_position",
            escape_literal(schema),
            escape_literal(table)
        );
        self.fetch_column(&statement).await
    }

    async fn list_indexes(&mut self, schema: &str) -> Result<Vec<IndexRow>> {
        let statement = format!(
            r#"SELECT
                s.tablename::text,
                s.indexname::text,
                s.indexdef::text,
                (NOT x.indisunique
                    AND x.indisvalid
                    AND x.indisready
                    AND NOT EXISTS (
                        SELECT 1 FROM pg_catalog.pg_constraint c WHERE c.conindid = x.indexrelid
                    ))::text AS droppable
            FROM pg_catalog.pg_indexes s
            JOIN pg_catalog.pg_namespace n ON n.nspname = s.schemaname
            JOIN pg_catalog.pg_class i ON i.relname = s.indexname AND i.relnamespace = n.oid
            JOIN pg_catalog.pg_index x ON x.indexrelid = i.oid
            WHERE s.schemaname = '{}'
            ORDER BY s.tablename, s.indexname"#,
            escape_literal(schema)
        );

        let rows = self.executor.fetch(&statement).await?;
        rows.into_iter()
            .map(|row| {
                let mut values = row.into_iter();
                let mut next = |what: &str| {
                    values.next().flatten().ok_or_else(|| {
                        AdvisorError::unexpected(&statement, format!("missing {}", what))
                    })
                };
                let table = next("tablename")?;
                let name = next("indexname")?;
                let definition = next("indexdef")?;
                let droppable = next("droppable")? == "true";
                Ok(IndexRow {
                    table,
                    name,
                    definition,
                    droppable,
                })
            })
            .collect()
    }

    async fn explain(&mut self, statement: &str) -> Result<String> {
        let explain = format!("EXPLAIN {}", statement.trim().trim_end_matches(';'));
        let rows = self.executor.fetch(&explain).await?;
        let top = rows
            .into_iter()
            .next()
            .ok_or_else(|| AdvisorError::unexpected(&explain, "empty plan"))?;
        first_value(&explain, top)
    }

    async fn create_hypothetical(&mut self, ddl: &str) -> Result<HypoId> {
        let statement = format!(
            "SELECT indexrelid::text FROM hypopg_create_index('{}')",
            escape_literal(ddl)
        );
        let values = self.fetch_column(&statement).await?;
        let oid = values
            .first()
            .ok_or_else(|| AdvisorError::unexpected(&statement, "no hypothetical index created"))?;
        oid.parse::<u32>()
            .map(HypoId)
            .map_err(|err| AdvisorError::unexpected(&statement, format!("bad oid '{}': {}", oid, err)))
    }

    async fn drop_hypothetical(&mut self, id: HypoId) -> Result<()> {
        let statement = format!("SELECT hypopg_drop_index({})::text", id);
        self.executor.fetch(&statement).await?;
        Ok(())
    }

    async fn reset_hypothetical(&mut self) -> Result<()> {
        self.executor.fetch("SELECT hypopg_reset()::text").await?;
        Ok(())
    }

    async fn set_index_enabled(&mut self, schema: &str, name: &str, enabled: bool) -> Result<()> {
        let statement = format!(
            "UPDATE pg_catalog.pg_index SET indisvalid = {enabled}, indisready = {enabled} \
             WHERE indexrelid = '{}'::regclass",
            escape_literal(&qualified_name(schema, name)),
        );
        self.executor.execute(&statement).await?;
        Ok(())
    }

    fn session_generation(&self) -> usize {
        self.executor.resets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StatementKind;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Recorder {
        replies: VecDeque<Option<Vec<Row>>>,
        statements: Vec<String>,
    }

    impl SqlConnection for Recorder {
        async fn run(&mut self, statement: &str, _kind: StatementKind) -> Result<Option<Vec<Row>>> {
            self.statements.push(statement.to_string());
            Ok(self.replies.pop_front().flatten())
        }

        async fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn text_rows(rows: &[&[&str]]) -> Option<Vec<Row>> {
        Some(
            rows.iter()
                .map(|row| row.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        )
    }

    fn database(replies: Vec<Option<Vec<Row>>>) -> PgDatabase<Recorder> {
        PgDatabase::new(Recorder {
            replies: replies.into(),
            statements: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_list_tables_and_columns() {
        let mut db = database(vec![
            text_rows(&[&["orders"], &["users"]]),
            text_rows(&[&["id"], &["user_id"]]),
        ]);

        assert_eq!(db.list_tables("public").await.unwrap(), vec!["orders", "users"]);
        assert_eq!(db.list_columns("public", "orders").await.unwrap(), vec!["id", "user_id"]);

        let statements = &db.executor().connection().statements;
        assert!(statements[0].contains("pg_catalog.pg_tables"));
        assert!(statements[0].contains("schemaname = 'public'"));
        assert!(statements[1].contains("table_name = 'orders'"));
    }

    #[tokio::test]
    async fn test_list_indexes_decodes_droppable_flag() {
        let mut db = database(vec![text_rows(&[
            &["t", "t_pkey", "CREATE UNIQUE INDEX t_pkey ON public.t USING btree (id)", "false"],
            &["t", "t_a_idx", "CREATE INDEX t_a_idx ON public.t USING btree (a)", "true"],
        ])]);

        let rows = db.list_indexes("public").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].droppable);
        assert!(rows[1].droppable);
        assert_eq!(rows[1].name, "t_a_idx");
    }

    #[tokio::test]
    async fn test_explain_returns_top_line() {
        let mut db = database(vec![text_rows(&[
            &["Seq Scan on t  (cost=0.00..35.50 rows=10 width=8)"],
            &["  Filter: (a = 1)"],
        ])]);

        let line = db.explain("SELECT * FROM t WHERE a = 1;").await.unwrap();
        assert_eq!(line, "Seq Scan on t  (cost=0.00..35.50 rows=10 width=8)");
        assert_eq!(
            db.executor().connection().statements[0],
            "EXPLAIN SELECT * FROM t WHERE a = 1"
        );
    }

    #[tokio::test]
    async fn test_explain_empty_plan_is_an_error() {
        let mut db = database(vec![Some(vec![])]);
        assert!(db.explain("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_hypothetical_lifecycle_statements() {
        let mut db = database(vec![
            text_rows(&[&["13543"]]),
            text_rows(&[&["true"]]),
            text_rows(&[&[""]]),
        ]);

        let id = db
            .create_hypothetical("CREATE INDEX ON \"Weird'Name\" USING btree (a)")
            .await
            .unwrap();
        assert_eq!(id, HypoId(13543));
        db.drop_hypothetical(id).await.unwrap();
        db.reset_hypothetical().await.unwrap();

        let statements = &db.executor().connection().statements;
        assert_eq!(
            statements[0],
            "SELECT indexrelid::text FROM hypopg_create_index('CREATE INDEX ON \"Weird''Name\" USING btree (a)')"
        );
        assert_eq!(statements[1], "SELECT hypopg_drop_index(13543)::text");
        assert_eq!(statements[2], "SELECT hypopg_reset()::text");
    }

    #[tokio::test]
    async fn test_set_index_enabled_toggles_both_flags() {
        let mut db = database(vec![None, None]);

        db.set_index_enabled("public", "t_a_idx", false).await.unwrap();
        db.set_index_enabled("sales", "T_idx", true).await.unwrap();

        let statements = &db.executor().connection().statements;
        assert!(statements[0].contains("SET indisvalid = false, indisready = false"));
        assert!(statements[0].contains("indexrelid = 't_a_idx'::regclass"));
        assert!(statements[1].contains("SET indisvalid = true, indisready = true"));
        assert!(statements[1].contains("indexrelid = 'sales.\"T_idx\"'::regclass"));
    }
}
