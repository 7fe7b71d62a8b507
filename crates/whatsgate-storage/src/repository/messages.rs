//! Message repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateMessage, Message, StatusChange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use whatsgate_common::types::{AccountId, Direction, MessageId, MessageStatus};
use whatsgate_common::Result;

/// Message repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a message; a duplicate remote id fails with `Conflict`
    async fn create(&self, input: CreateMessage) -> Result<Message>;

    /// Store an inbound message unless its remote id is already known.
    ///
    /// Returns `None` when the message was a duplicate.
    async fn insert_if_absent(&self, input: CreateMessage) -> Result<Option<Message>>;

    /// Get a message by ID
    async fn get(&self, id: MessageId) -> Result<Option<Message>>;

    /// Find a message by its remote (Cloud API) id
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Message>>;

    /// Apply a status change if the stored status still equals `expected`.
    ///
    /// Returns `false` when another writer changed the status first.
    async fn update_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        change: StatusChange,
    ) -> Result<bool>;

    /// Time of the latest inbound message from `phone` to the account
    async fn last_inbound_at(&self, account_id: AccountId, phone: &str)
        -> Result<Option<DateTime<Utc>>>;

    /// Conversation history with one phone number, newest first
    async fn list_by_phone(
        &self,
        account_id: AccountId,
        phone: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>>;
}

/// Database message repository
pub struct DbMessageRepository {
    pool: DatabasePool,
}

impl DbMessageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, input: CreateMessage, skip_duplicate: bool) -> Result<Option<Message>> {
        let params = serde_json::to_value(&input.template_params).unwrap_or_default();
        let sent_at = (input.status == MessageStatus::Sent).then(Utc::now);
        let conflict = if skip_duplicate {
            "ON CONFLICT (remote_id) WHERE remote_id IS NOT NULL DO NOTHING"
        } else {
            ""
        };

        let query = format!(
            r#"
            INSERT INTO messages (
                id, account_id, direction, phone, content_type, body, template_name,
                template_language, template_params, media_id, media_link, media_filename,
                remote_id, reply_to_remote_id, campaign_id, status, error_code,
                error_message, created_at, sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20)
            {}
            RETURNING *
            "#,
            conflict
        );

        sqlx::query_as::<_, Message>(&query)
            .bind(Uuid::now_v7())
            .bind(input.account_id)
            .bind(input.direction.as_str())
            .bind(&input.phone)
            .bind(input.content_type.as_str())
            .bind(&input.body)
            .bind(&input.template_name)
            .bind(&input.template_language)
            .bind(&params)
            .bind(&input.media_id)
            .bind(&input.media_link)
            .bind(&input.media_filename)
            .bind(&input.remote_id)
            .bind(&input.reply_to_remote_id)
            .bind(input.campaign_id)
            .bind(input.status.as_str())
            .bind(input.error_code)
            .bind(&input.error_message)
            .bind(input.created_at)
            .bind(sent_at)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }
}

#[async_trait]
impl MessageRepository for DbMessageRepository {
    async fn create(&self, input: CreateMessage) -> Result<Message> {
        self.insert(input, false)
            .await?
            .ok_or_else(|| whatsgate_common::Error::Database("Insert returned no row".to_string()))
    }

    async fn insert_if_absent(&self, input: CreateMessage) -> Result<Option<Message>> {
        self.insert(input, true).await
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Message>> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE remote_id = $1")
            .bind(remote_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn update_status(
        &self,
        id: MessageId,
        expected: MessageStatus,
        change: StatusChange,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                status = $3,
                sent_at = CASE WHEN $3 = 'sent' THEN COALESCE(sent_at, $4) ELSE sent_at END,
                delivered_at = CASE WHEN $3 = 'delivered' THEN $4 ELSE delivered_at END,
                read_at = CASE WHEN $3 = 'read' THEN $4 ELSE read_at END,
                error_code = COALESCE($5, error_code),
                error_message = COALESCE($6, error_message),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(change.status.as_str())
        .bind(change.at)
        .bind(change.error_code)
        .bind(&change.error_message)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn last_inbound_at(
        &self,
        account_id: AccountId,
        phone: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT created_at FROM messages
            WHERE account_id = $1 AND phone = $2 AND direction = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(phone)
        .bind(Direction::Inbound.as_str())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(|(at,)| at))
    }

    async fn list_by_phone(
        &self,
        account_id: AccountId,
        phone: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE account_id = $1 AND phone = $2
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(account_id)
        .bind(phone)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
