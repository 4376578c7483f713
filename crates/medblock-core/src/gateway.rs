//! Guarded query gateway
//!
//! Single entry point for SQL text, whether it comes from the repository or
//! from the query console:
//! 1. classify, rejecting destructive statements before the engine sees them
//! 2. reject text holding more than one statement
//! 3. record the text in the execution log
//! 4. execute on the view's engine, rebuilt first if another writer saved
//!    a newer image and this is a mutation
//! 5. persist and announce mutations

use rusqlite::types::Value;
use std::sync::Arc;

use medblock_bus::ChangeKind;
use medblock_query::{
    has_multiple_statements, DeletePolicy, QueryError, QueryLog, QueryResult, Statement,
    StatementClass,
};
use medblock_storage::{BlobStore, Database};

use crate::engine::EngineAdapter;
use crate::persistence::WriteThrough;
use crate::Result;

pub struct QueryGateway {
    engine: Arc<EngineAdapter>,
    write_through: WriteThrough,
    log: QueryLog,
    log_store: Arc<dyn BlobStore>,
    log_key: String,
    policy: DeletePolicy,
}

impl QueryGateway {
    pub fn new(
        engine: Arc<EngineAdapter>,
        write_through: WriteThrough,
        log: QueryLog,
        log_key: impl Into<String>,
        policy: DeletePolicy,
    ) -> Self {
        let log_store = Arc::clone(write_through.writer().store());
        Self {
            engine,
            write_through,
            log,
            log_store,
            log_key: log_key.into(),
            policy,
        }
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }

    pub fn query_log(&self) -> &QueryLog {
        &self.log
    }

    /// Run console SQL. Mutations are announced as [`ChangeKind::SqlExecuted`].
    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.execute_with(sql, Vec::new(), ChangeKind::SqlExecuted)
            .await
    }

    /// Run one statement with positional parameters (`?1`, `?2`, ...).
    pub async fn execute_with(
        &self,
        sql: &str,
        params: Vec<Value>,
        kind: ChangeKind,
    ) -> Result<QueryResult> {
        let statement = Statement::parse(sql, self.policy)?;

        if statement.class().is_mutating() {
            self.engine.refresh_if_stale().await;
        }
        let db = self.engine.engine().await?;
        ensure_single_statements(&db, &[&statement])?;
        self.record(&[&statement]).await;

        let result = db.with_connection(|conn| {
            Ok(QueryResult::collect(
                conn,
                statement.sql(),
                rusqlite::params_from_iter(params),
            ))
        })??;

        tracing::debug!(
            keyword = statement.keyword(),
            class = %statement.class(),
            columns = result.columns.len(),
            rows = result.rows.len(),
            "Executed statement"
        );

        self.write_through
            .after_statement(statement.class(), kind, &db)
            .await;

        Ok(result)
    }

    /// Run several statements in one transaction, persisting and announcing
    /// once at the end if any of them mutated. Nothing runs if any statement
    /// is rejected.
    pub async fn execute_many(
        &self,
        batch: Vec<(String, Vec<Value>)>,
        kind: ChangeKind,
    ) -> Result<Vec<QueryResult>> {
        let statements = batch
            .iter()
            .map(|(sql, _)| Statement::parse(sql, self.policy))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let class = if statements.iter().any(|s| s.class().is_mutating()) {
            StatementClass::Mutating
        } else {
            StatementClass::Read
        };

        if class.is_mutating() {
            self.engine.refresh_if_stale().await;
        }
        let db = self.engine.engine().await?;

        let refs: Vec<&Statement> = statements.iter().collect();
        ensure_single_statements(&db, &refs)?;
        self.record(&refs).await;

        let results = db.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            let results = statements
                .iter()
                .zip(batch)
                .map(|(statement, (_, params))| {
                    QueryResult::collect(&tx, statement.sql(), rusqlite::params_from_iter(params))
                })
                .collect::<rusqlite::Result<Vec<_>>>();
            // Dropping the transaction without commit rolls the batch back
            if results.is_ok() {
                tx.commit()?;
            }
            Ok(results)
        })??;

        self.write_through.after_statement(class, kind, &db).await;

        Ok(results)
    }

    /// Merge in records other views have saved since this log was loaded.
    pub async fn sync_query_log(&self) -> &QueryLog {
        match self.log_store.load(&self.log_key).await {
            Ok(Some(bytes)) => match QueryLog::from_slice(&bytes) {
                Ok(stored) => self.log.merge(&stored),
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable stored query log"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %self.log_key, error = %e, "Failed to load query log"),
        }
        &self.log
    }

    /// Record `statements` and save the log. Other views save to the same
    /// key, so their stored records are merged in first.
    async fn record(&self, statements: &[&Statement]) {
        self.sync_query_log().await;

        for statement in statements {
            self.log.record(statement.sql());
        }

        let json = match self.log.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize query log");
                return;
            }
        };

        if let Err(e) = self.log_store.save(&self.log_key, json.as_bytes()).await {
            tracing::error!(key = %self.log_key, error = %e, "Failed to save query log");
        }
    }
}

/// Each text must compile to exactly one statement; anything after the first
/// would otherwise be dropped without a word.
fn ensure_single_statements(db: &Database, statements: &[&Statement]) -> Result<()> {
    let multiple = db.with_connection(|conn| {
        Ok(statements
            .iter()
            .any(|statement| has_multiple_statements(conn, statement.sql())))
    })?;

    if multiple {
        return Err(QueryError::MultipleStatements.into());
    }
    Ok(())
}
