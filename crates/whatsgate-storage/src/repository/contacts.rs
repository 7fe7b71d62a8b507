//! Contact repository

use crate::db::{db_err, DatabasePool};
use crate::models::Contact;
use async_trait::async_trait;
use whatsgate_common::types::AccountId;
use whatsgate_common::Result;

/// Contact repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Record that `phone` wrote to the account now.
    ///
    /// A `None` profile name keeps the one already stored.
    async fn touch(
        &self,
        account_id: AccountId,
        phone: &str,
        profile_name: Option<&str>,
    ) -> Result<Contact>;

    async fn get(&self, account_id: AccountId, phone: &str) -> Result<Option<Contact>>;

    /// Contacts of an account, most recently seen first
    async fn list(&self, account_id: AccountId, limit: i64, offset: i64) -> Result<Vec<Contact>>;
}

/// Database contact repository
pub struct DbContactRepository {
    pool: DatabasePool,
}

impl DbContactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for DbContactRepository {
    async fn touch(
        &self,
        account_id: AccountId,
        phone: &str,
        profile_name: Option<&str>,
    ) -> Result<Contact> {
        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (account_id, phone, profile_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id, phone) DO UPDATE SET
                profile_name = COALESCE(EXCLUDED.profile_name, contacts.profile_name),
                last_seen = NOW()
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(phone)
        .bind(profile_name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, account_id: AccountId, phone: &str) -> Result<Option<Contact>> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE account_id = $1 AND phone = $2")
            .bind(account_id)
            .bind(phone)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list(&self, account_id: AccountId, limit: i64, offset: i64) -> Result<Vec<Contact>> {
        sqlx::query_as::<_, Contact>(
            r#"
            SELECT * FROM contacts
            WHERE account_id = $1
            ORDER BY last_seen DESC, phone
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
