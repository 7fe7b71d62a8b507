//! Webhook delivery log

use crate::db::{db_err, DatabasePool};
use crate::models::{NewWebhookLog, WebhookLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use whatsgate_common::types::WebhookOutcome;
use whatsgate_common::Result;

/// Webhook log repository trait
#[async_trait]
pub trait WebhookLogRepository: Send + Sync {
    async fn record(&self, input: NewWebhookLog) -> Result<WebhookLog>;

    /// Deliveries newest first, optionally only those with `outcome`
    async fn list(
        &self,
        outcome: Option<WebhookOutcome>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookLog>>;

    /// Delete deliveries received before `cutoff`; returns how many went
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Database webhook log repository
pub struct DbWebhookLogRepository {
    pool: DatabasePool,
}

impl DbWebhookLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookLogRepository for DbWebhookLogRepository {
    async fn record(&self, input: NewWebhookLog) -> Result<WebhookLog> {
        sqlx::query_as::<_, WebhookLog>(
            r#"
            INSERT INTO webhook_logs (id, object, outcome, events, error, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.object)
        .bind(input.outcome.as_str())
        .bind(input.events)
        .bind(&input.error)
        .bind(&input.payload)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list(
        &self,
        outcome: Option<WebhookOutcome>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookLog>> {
        sqlx::query_as::<_, WebhookLog>(
            r#"
            SELECT * FROM webhook_logs
            WHERE ($1::TEXT IS NULL OR outcome = $1)
            ORDER BY received_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(outcome.map(|o| o.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM webhook_logs WHERE received_at < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
