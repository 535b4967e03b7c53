//! Query execution service
//!
//! Executes single statements, batches and transactions through the
//! manager's current adapter and keeps a bounded execution history for
//! statistics. Every execution is recorded regardless of outcome.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventBus, GatewayEvent};
use crate::manager::ConnectionManager;
use crate::metrics::MetricsCollector;
use crate::types::{QueryHistoryEntry, QueryOptions, QueryResult, QueryStats};

/// Statement execution with bounded history
pub struct QueryExecutionService {
    manager: Arc<ConnectionManager>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    history: RwLock<VecDeque<QueryHistoryEntry>>,
    max_history: usize,
}

impl QueryExecutionService {
    pub fn new(
        manager: Arc<ConnectionManager>,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
        max_history: usize,
    ) -> Self {
        Self {
            manager,
            metrics,
            events,
            history: RwLock::new(VecDeque::new()),
            max_history,
        }
    }

    /// Execute one statement through the current adapter.
    ///
    /// The outcome is recorded into the history either way; a failed
    /// statement is re-raised as a `QueryExecution` error after recording.
    pub async fn execute_query(
        &self,
        query: &str,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let adapter = self.manager.get_current_connection().await?;
        if let Some(id) = self.manager.current_id().await {
            self.manager.touch(&id).await;
        }

        match adapter.execute_query(query, options).await {
            Ok(result) => {
                self.record(query, result.execution_time_ms, result.success, result.error.clone())
                    .await;
                if result.success {
                    Ok(result)
                } else {
                    let message = result
                        .error
                        .unwrap_or_else(|| "statement failed".to_string());
                    Err(GatewayError::query(message))
                }
            }
            Err(e) => {
                self.record(query, 0, false, Some(e.to_string())).await;
                Err(e)
            }
        }
    }

    /// Execute statements sequentially, aggregating per-statement results.
    /// One statement's failure does not stop later statements.
    pub async fn execute_batch(&self, statements: &[String]) -> GatewayResult<Vec<QueryResult>> {
        // no current connection is a caller error, not a per-statement one
        self.manager.get_current_connection().await?;

        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.execute_query(statement, &QueryOptions::default()).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    debug!("batch statement failed: {}", e);
                    results.push(QueryResult::failed(e.to_string(), 0));
                }
            }
        }
        Ok(results)
    }

    /// Execute statements inside one explicit transaction.
    ///
    /// Issues the dialect's begin, then each statement in order. The first
    /// failure triggers a rollback and re-raises the original error; later
    /// statements are never attempted. Rollback failures are logged and
    /// never mask the triggering error.
    pub async fn execute_in_transaction(
        &self,
        statements: &[String],
    ) -> GatewayResult<Vec<QueryResult>> {
        let adapter = self.manager.get_current_connection().await?;
        let dialect = adapter.database_type();

        let begin = adapter
            .execute_query(dialect.begin_statement(), &QueryOptions::default())
            .await?;
        if !begin.success {
            return Err(GatewayError::query(format!(
                "failed to begin transaction: {}",
                begin.error.unwrap_or_default()
            )));
        }

        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.execute_query(statement, &QueryOptions::default()).await {
                Ok(result) => results.push(result),
                Err(original) => {
                    match adapter
                        .execute_query(dialect.rollback_statement(), &QueryOptions::default())
                        .await
                    {
                        Ok(rollback) if !rollback.success => {
                            warn!(
                                "rollback failed after statement error: {}",
                                rollback.error.unwrap_or_default()
                            );
                        }
                        Err(rollback_err) => {
                            warn!("rollback failed after statement error: {}", rollback_err);
                        }
                        Ok(_) => {}
                    }
                    return Err(original);
                }
            }
        }

        let commit = adapter
            .execute_query(dialect.commit_statement(), &QueryOptions::default())
            .await?;
        if !commit.success {
            let message = commit.error.unwrap_or_default();
            match adapter
                .execute_query(dialect.rollback_statement(), &QueryOptions::default())
                .await
            {
                Ok(rollback) if !rollback.success => {
                    warn!(
                        "rollback failed after commit error: {}",
                        rollback.error.unwrap_or_default()
                    );
                }
                Err(rollback_err) => {
                    warn!("rollback failed after commit error: {}", rollback_err);
                }
                Ok(_) => {}
            }
            return Err(GatewayError::query(format!(
                "failed to commit transaction: {}",
                message
            )));
        }

        Ok(results)
    }

    /// Aggregate the history into totals and extremes. Ties keep the entry
    /// seen first in the traversal (most-recent-first).
    pub async fn get_query_stats(&self) -> QueryStats {
        let history = self.history.read().await;
        if history.is_empty() {
            return QueryStats::default();
        }

        let mut stats = QueryStats {
            total: history.len(),
            ..Default::default()
        };
        let mut total_ms: u64 = 0;
        let mut slowest: Option<&QueryHistoryEntry> = None;
        let mut fastest: Option<&QueryHistoryEntry> = None;

        for entry in history.iter().rev() {
            if entry.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            total_ms += entry.duration_ms;

            match slowest {
                Some(s) if entry.duration_ms <= s.duration_ms => {}
                _ => slowest = Some(entry),
            }
            match fastest {
                Some(f) if entry.duration_ms >= f.duration_ms => {}
                _ => fastest = Some(entry),
            }
        }

        stats.avg_time_ms = total_ms as f64 / history.len() as f64;
        stats.slowest = slowest.cloned();
        stats.fastest = fastest.cloned();
        stats
    }

    /// Recorded executions, most recent first
    pub async fn history(&self) -> Vec<QueryHistoryEntry> {
        self.history.read().await.iter().rev().cloned().collect()
    }

    /// Empty the bounded history
    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }

    async fn record(&self, query: &str, duration_ms: u64, success: bool, error: Option<String>) {
        {
            let mut history = self.history.write().await;
            if history.len() == self.max_history {
                history.pop_front();
            }
            history.push_back(QueryHistoryEntry {
                query: query.to_string(),
                timestamp: Utc::now(),
                duration_ms,
                success,
                error,
            });
        }

        self.metrics.record_query(duration_ms, success).await;
        self.events.publish(GatewayEvent::QueryExecuted {
            query: query.to_string(),
            duration_ms,
            success,
            timestamp: Utc::now(),
        });
    }
}
