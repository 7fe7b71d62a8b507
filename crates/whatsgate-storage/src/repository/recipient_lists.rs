//! Recipient list repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateRecipientList, ListRecipient, NewRecipient, RecipientList};
use async_trait::async_trait;
use uuid::Uuid;
use whatsgate_common::types::RecipientListId;
use whatsgate_common::{Error, Result};

/// Recipient list repository trait
#[async_trait]
pub trait RecipientListRepository: Send + Sync {
    /// Create an empty list
    async fn create(&self, input: CreateRecipientList) -> Result<RecipientList>;

    /// Get a list by ID
    async fn get(&self, id: RecipientListId) -> Result<Option<RecipientList>>;

    /// Import recipients into a list.
    ///
    /// Phone numbers are reduced to digits and `+`; entries left empty are
    /// skipped. Returns the number of recipients added.
    async fn add_recipients(&self, id: RecipientListId, recipients: Vec<NewRecipient>)
        -> Result<usize>;

    /// Recipients of a list in import order
    async fn recipients(&self, id: RecipientListId) -> Result<Vec<ListRecipient>>;
}

/// Clean imported recipients, dropping those without a usable phone number
pub(crate) fn clean_import(recipients: Vec<NewRecipient>) -> Vec<NewRecipient> {
    recipients
        .into_iter()
        .filter_map(|r| {
            let phone = r.cleaned_phone();
            if phone.trim_start_matches('+').is_empty() {
                None
            } else {
                Some(NewRecipient {
                    phone,
                    name: r.name,
                    data: if r.data.is_null() {
                        serde_json::json!({})
                    } else {
                        r.data
                    },
                })
            }
        })
        .collect()
}

/// Database recipient list repository
pub struct DbRecipientListRepository {
    pool: DatabasePool,
}

impl DbRecipientListRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientListRepository for DbRecipientListRepository {
    async fn create(&self, input: CreateRecipientList) -> Result<RecipientList> {
        sqlx::query_as::<_, RecipientList>(
            r#"
            INSERT INTO recipient_lists (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.description)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: RecipientListId) -> Result<Option<RecipientList>> {
        sqlx::query_as::<_, RecipientList>("SELECT * FROM recipient_lists WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn add_recipients(
        &self,
        id: RecipientListId,
        recipients: Vec<NewRecipient>,
    ) -> Result<usize> {
        let cleaned = clean_import(recipients);
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM recipient_lists WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("Recipient list {}", id)));
        }

        for recipient in &cleaned {
            sqlx::query(
                r#"
                INSERT INTO list_recipients (id, list_id, phone, name, data)
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

        sqlx::query(
            r#"
            UPDATE recipient_lists SET
                recipient_count = recipient_count + $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(cleaned.len() as i32)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(cleaned.len())
    }

    async fn recipients(&self, id: RecipientListId) -> Result<Vec<ListRecipient>> {
        sqlx::query_as::<_, ListRecipient>(
            "SELECT * FROM list_recipients WHERE list_id = $1 ORDER BY created_at, id",
        )
        .bind(id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
