//! Template repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Template, UpsertTemplate};
use async_trait::async_trait;
use uuid::Uuid;
use whatsgate_common::types::{AccountId, TemplateId, TemplateStatus};
use whatsgate_common::Result;

/// Template repository trait
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Insert or replace a template keyed by (account, name, language).
    ///
    /// Returns the stored template and whether it was newly created.
    async fn upsert(&self, input: UpsertTemplate) -> Result<(Template, bool)>;

    /// Get a template by ID
    async fn get(&self, id: TemplateId) -> Result<Option<Template>>;

    /// Find a template by account, name and language
    async fn find(&self, account_id: AccountId, name: &str, language: &str)
        -> Result<Option<Template>>;

    /// List templates of an account
    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Template>>;

    /// Set the approval status of a template
    async fn update_status(
        &self,
        id: TemplateId,
        status: TemplateStatus,
        reason: Option<String>,
    ) -> Result<Option<Template>>;
}

/// Database template repository
pub struct DbTemplateRepository {
    pool: DatabasePool,
}

impl DbTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for DbTemplateRepository {
    async fn upsert(&self, input: UpsertTemplate) -> Result<(Template, bool)> {
        let variables = input
            .variables
            .as_ref()
            .map(|names| serde_json::to_value(names).unwrap_or_default());
        let sample_values = serde_json::to_value(&input.sample_values).unwrap_or_default();
        let buttons = if input.buttons.is_null() {
            serde_json::json!([])
        } else {
            input.buttons.clone()
        };

        // xmax = 0 only for rows written by the INSERT branch
        let row: (Uuid, bool) = sqlx::query_as(
            r#"
            INSERT INTO templates (
                id, account_id, name, language, category, body, variables, sample_values,
                header_type, header_text, footer, buttons, status, remote_id, rejection_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, '[]'::jsonb), $8, $9, $10, $11, $12,
                    $13, $14, $15)
            ON CONFLICT (account_id, name, language) DO UPDATE SET
                category = EXCLUDED.category,
                body = EXCLUDED.body,
                variables = COALESCE($7, templates.variables),
                sample_values = EXCLUDED.sample_values,
                header_type = EXCLUDED.header_type,
                header_text = EXCLUDED.header_text,
                footer = EXCLUDED.footer,
                buttons = EXCLUDED.buttons,
                status = EXCLUDED.status,
                remote_id = COALESCE(EXCLUDED.remote_id, templates.remote_id),
                rejection_reason = EXCLUDED.rejection_reason,
                updated_at = NOW()
            RETURNING id, (xmax = 0) AS created
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.account_id)
        .bind(&input.name)
        .bind(&input.language)
        .bind(&input.category)
        .bind(&input.body)
        .bind(&variables)
        .bind(&sample_values)
        .bind(input.header_type.as_str())
        .bind(&input.header_text)
        .bind(&input.footer)
        .bind(&buttons)
        .bind(input.status.as_str())
        .bind(&input.remote_id)
        .bind(&input.rejection_reason)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        let template = self.get(row.0).await?.ok_or_else(|| {
            whatsgate_common::Error::Database("Upserted template vanished".to_string())
        })?;
        Ok((template, row.1))
    }

    async fn get(&self, id: TemplateId) -> Result<Option<Template>> {
        sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn find(
        &self,
        account_id: AccountId,
        name: &str,
        language: &str,
    ) -> Result<Option<Template>> {
        sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE account_id = $1 AND name = $2 AND language = $3",
        )
        .bind(account_id)
        .bind(name)
        .bind(language)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Template>> {
        sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE account_id = $1 ORDER BY name, language",
        )
        .bind(account_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn update_status(
        &self,
        id: TemplateId,
        status: TemplateStatus,
        reason: Option<String>,
    ) -> Result<Option<Template>> {
        sqlx::query_as::<_, Template>(
            r#"
            UPDATE templates SET
                status = $2,
                rejection_reason = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&reason)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
