//! Campaign repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Campaign, CampaignRecipient, CreateCampaign, NewRecipient, RecipientOutcome};
use async_trait::async_trait;
use uuid::Uuid;
use whatsgate_common::types::{CampaignId, CampaignStatus, RecipientId, RecipientState};
use whatsgate_common::{Error, Result};

/// Campaign repository trait
///
/// Every counter mutation keeps `queued + sent + failed = total`.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Create a draft campaign
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;

    /// Get a campaign by ID
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// List campaigns, newest first, optionally filtered by status
    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;

    /// Set the campaign status unconditionally
    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<Option<Campaign>>;

    /// Set the campaign status only if it currently equals `expected`
    async fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        status: CampaignStatus,
    ) -> Result<bool>;

    /// Replace the recipients of a campaign and mark it queued.
    ///
    /// Sets total = queued = number of recipients, sent = failed = 0.
    async fn enqueue(&self, id: CampaignId, recipients: Vec<NewRecipient>) -> Result<Campaign>;

    /// All recipients of a campaign
    async fn recipients(&self, id: CampaignId) -> Result<Vec<CampaignRecipient>>;

    /// Recipients still waiting to be sent
    async fn queued_recipients(&self, id: CampaignId) -> Result<Vec<CampaignRecipient>>;

    /// Record the outcome of sending to one queued recipient.
    ///
    /// Moves one count from queued to sent or failed. Returns `false`, and
    /// changes nothing, if the recipient was not queued.
    async fn record_outcome(
        &self,
        id: CampaignId,
        recipient_id: RecipientId,
        outcome: RecipientOutcome,
    ) -> Result<bool>;

    /// Move retryable failed recipients back to queued; returns how many
    async fn requeue_retryable(&self, id: CampaignId) -> Result<u64>;
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let common_variables = serde_json::to_value(&input.common_variables).unwrap_or_default();
        let recipients = serde_json::to_value(&input.recipients).unwrap_or_default();

        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, account_id, name, template_name, template_language, text_body,
                variable_mode, common_variables, recipient_list_id, explicit_recipients
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.account_id)
        .bind(&input.name)
        .bind(&input.template_name)
        .bind(&input.template_language)
        .bind(&input.text_body)
        .bind(input.variable_mode.as_str())
        .bind(&common_variables)
        .bind(input.recipient_list_id)
        .bind(&recipients)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list(
        &self,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        if let Some(status) = status {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(status.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
        } else {
            sqlx::query_as::<_, Campaign>(
                r#"
                SELECT * FROM campaigns
                ORDER BY created_at DESC
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
        }
    }

    async fn set_status(&self, id: CampaignId, status: CampaignStatus) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = CASE WHEN $2 = 'in_progress' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE
                    WHEN $2 IN ('completed', 'partially_failed', 'stopped') THEN NOW()
                    WHEN $2 IN ('queued', 'in_progress') THEN NULL
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn compare_and_set_status(
        &self,
        id: CampaignId,
        expected: CampaignStatus,
        status: CampaignStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET
                status = $3,
                started_at = CASE WHEN $3 = 'in_progress' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE
                    WHEN $3 IN ('completed', 'partially_failed', 'stopped') THEN NOW()
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(status.as_str())
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn enqueue(&self, id: CampaignId, recipients: Vec<NewRecipient>) -> Result<Campaign> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM campaign_recipients WHERE campaign_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for recipient in &recipients {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (id, campaign_id, phone, name, data)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(&recipient.phone)
            .bind(&recipient.name)
            .bind(&recipient.data)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = 'queued',
                total_count = $2,
                queued_count = $2,
                sent_count = 0,
                failed_count = 0,
                completed_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(recipients.len() as i32)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("Campaign {}", id)))?;

        tx.commit().await.map_err(db_err)?;
        Ok(campaign)
    }

    async fn recipients(&self, id: CampaignId) -> Result<Vec<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE campaign_id = $1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn queued_recipients(&self, id: CampaignId) -> Result<Vec<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE campaign_id = $1 AND state = $2 ORDER BY id",
        )
        .bind(id)
        .bind(RecipientState::Queued.as_str())
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn record_outcome(
        &self,
        id: CampaignId,
        recipient_id: RecipientId,
        outcome: RecipientOutcome,
    ) -> Result<bool> {
        let (state, message_id, error, retryable) = match outcome {
            RecipientOutcome::Sent { message_id } => {
                (RecipientState::Sent, Some(message_id), None, false)
            }
            RecipientOutcome::Failed {
                message_id,
                error,
                retryable,
            } => (RecipientState::Failed, message_id, Some(error), retryable),
        };

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                state = $3,
                attempts = attempts + 1,
                message_id = COALESCE($4, message_id),
                last_error = $5,
                retryable = $6,
                updated_at = NOW()
            WHERE id = $2 AND campaign_id = $1 AND state = 'queued'
            "#,
        )
        .bind(id)
        .bind(recipient_id)
        .bind(state.as_str())
        .bind(message_id)
        .bind(&error)
        .bind(retryable)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        let counter = match state {
            RecipientState::Sent => "sent_count",
            _ => "failed_count",
        };
        sqlx::query(&format!(
            r#"
            UPDATE campaigns SET
                queued_count = queued_count - 1,
                {counter} = {counter} + 1,
                updated_at = NOW()
            WHERE id = $1
            "#
        ))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn requeue_retryable(&self, id: CampaignId) -> Result<u64> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let moved = sqlx::query(
            r#"
            UPDATE campaign_recipients SET
                state = 'queued',
                retryable = FALSE,
                updated_at = NOW()
            WHERE campaign_id = $1 AND state = 'failed' AND retryable
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();

        if moved > 0 {
            sqlx::query(
                r#"
                UPDATE campaigns SET
                    failed_count = failed_count - $2,
                    queued_count = queued_count + $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(moved as i32)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(moved)
    }
}
