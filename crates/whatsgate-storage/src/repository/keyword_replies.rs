//! Keyword auto-reply repository

use crate::db::{db_err, DatabasePool};
use crate::models::{normalize_keyword, KeywordReply, UpsertKeywordReply};
use async_trait::async_trait;
use uuid::Uuid;
use whatsgate_common::types::AccountId;
use whatsgate_common::Result;

/// Keyword reply repository trait
#[async_trait]
pub trait KeywordReplyRepository: Send + Sync {
    /// Insert or replace the reply for (account, keyword)
    async fn upsert(&self, input: UpsertKeywordReply) -> Result<KeywordReply>;

    /// The reply configured for `text`, matched after normalising
    async fn find(&self, account_id: AccountId, text: &str) -> Result<Option<KeywordReply>>;

    async fn list(&self, account_id: AccountId) -> Result<Vec<KeywordReply>>;

    /// Returns whether a reply was removed
    async fn delete(&self, account_id: AccountId, keyword: &str) -> Result<bool>;
}

/// Database keyword reply repository
pub struct DbKeywordReplyRepository {
    pool: DatabasePool,
}

impl DbKeywordReplyRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeywordReplyRepository for DbKeywordReplyRepository {
    async fn upsert(&self, input: UpsertKeywordReply) -> Result<KeywordReply> {
        sqlx::query_as::<_, KeywordReply>(
            r#"
            INSERT INTO keyword_replies (id, account_id, keyword, content, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id, keyword) DO UPDATE SET
                content = EXCLUDED.content,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.account_id)
        .bind(normalize_keyword(&input.keyword))
        .bind(&input.content)
        .bind(input.enabled)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn find(&self, account_id: AccountId, text: &str) -> Result<Option<KeywordReply>> {
        sqlx::query_as::<_, KeywordReply>(
            "SELECT * FROM keyword_replies WHERE account_id = $1 AND keyword = $2",
        )
        .bind(account_id)
        .bind(normalize_keyword(text))
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list(&self, account_id: AccountId) -> Result<Vec<KeywordReply>> {
        sqlx::query_as::<_, KeywordReply>(
            "SELECT * FROM keyword_replies WHERE account_id = $1 ORDER BY keyword",
        )
        .bind(account_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn delete(&self, account_id: AccountId, keyword: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM keyword_replies WHERE account_id = $1 AND keyword = $2")
                .bind(account_id)
                .bind(normalize_keyword(keyword))
                .execute(self.pool.pool())
                .await
                .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
