//! Batch processors
//!
//! The execution loop only knows the `BatchProcessor` trait. The Postgres
//! implementation pulls `pending` rows from `trigger_documents` and hands each
//! one to a `DocumentHandler`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::error::Result;

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Documents processed successfully
    pub documents: u64,
    /// Documents marked failed
    pub failures: u64,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.documents == 0 && self.failures == 0
    }
}

/// One unit of business work
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Pull and process one batch; an error counts as a single batch failure
    async fn process_batch(&self) -> Result<BatchReport>;
}

/// Per-document business logic
#[async_trait]
pub trait DocumentHandler: Send + Sync {
    async fn handle(&self, id: i64, payload: &Value) -> Result<()>;
}

/// Default handler that just logs
pub struct LoggingHandler;

#[async_trait]
impl DocumentHandler for LoggingHandler {
    async fn handle(&self, id: i64, payload: &Value) -> Result<()> {
        debug!("Processing document {}: {}", id, payload);
        Ok(())
    }
}

/// Processor for the in-memory backend, which has no work table
pub struct IdleProcessor;

#[async_trait]
impl BatchProcessor for IdleProcessor {
    async fn process_batch(&self) -> Result<BatchReport> {
        debug!("No work source configured");
        Ok(BatchReport::default())
    }
}

/// Claims pending rows with `FOR UPDATE SKIP LOCKED` so instances never share a row
pub struct PostgresTriggerProcessor {
    pool: PgPool,
    batch_size: i64,
    handler: Arc<dyn DocumentHandler>,
}

impl PostgresTriggerProcessor {
    pub fn new(pool: PgPool, batch_size: i64) -> Self {
        Self {
            pool,
            batch_size,
            handler: Arc::new(LoggingHandler),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn DocumentHandler>) -> Self {
        self.handler = handler;
        self
    }
}

#[async_trait]
impl BatchProcessor for PostgresTriggerProcessor {
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    async fn process_batch(&self) -> Result<BatchReport> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, payload
            FROM trigger_documents
            WHERE status = 'pending'
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            debug!("No pending documents found");
            tx.commit().await?;
            return Ok(BatchReport::default());
        }

        info!("Processing batch of {} documents", rows.len());
        let mut report = BatchReport::default();

        for row in rows {
            let id: i64 = row.get("id");
            let payload: Value = row.get("payload");

            match self.handler.handle(id, &payload).await {
                Ok(()) => {
                    sqlx::query(
                        r#"
                        UPDATE trigger_documents
                        SET status = 'processed', processed_at = NOW(), error = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    report.documents += 1;
                }
                Err(e) => {
                    error!("Failed to process document {}: {}", id, e);
                    sqlx::query(
                        r#"
                        UPDATE trigger_documents
                        SET status = 'failed', failed_at = NOW(), error = $2
                        WHERE id = $1
                        "#,
                    )
                    .bind(id)
                    .bind(e.to_string())
                    .execute(&mut *tx)
                    .await?;
                    report.failures += 1;
                }
            }
        }

        tx.commit().await?;
        info!(
            "Batch completed: {} processed, {} failed",
            report.documents, report.failures
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_processor_reports_nothing() {
        let report = IdleProcessor.process_batch().await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_logging_handler_accepts_any_payload() {
        let payload = serde_json::json!({"trigger": "ping"});
        assert!(LoggingHandler.handle(1, &payload).await.is_ok());
    }
}
