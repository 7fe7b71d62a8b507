//! Account repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Account, CreateAccount, UpdateAccount};
use async_trait::async_trait;
use uuid::Uuid;
use whatsgate_common::types::AccountId;
use whatsgate_common::{Error, Result};

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create a new account
    async fn create(&self, input: CreateAccount) -> Result<Account>;

    /// Get an account by ID
    async fn get(&self, id: AccountId) -> Result<Option<Account>>;

    /// Find the account owning a Cloud API phone number id
    async fn find_by_phone_number_id(&self, phone_number_id: &str) -> Result<Option<Account>>;

    /// The enabled account flagged as default for outgoing messages
    async fn find_default_outgoing(&self) -> Result<Option<Account>>;

    /// List all accounts
    async fn list(&self) -> Result<Vec<Account>>;

    /// Update an account
    async fn update(&self, id: AccountId, input: UpdateAccount) -> Result<Option<Account>>;

    /// Delete an account; fails with `Conflict` while messages reference it
    async fn delete(&self, id: AccountId) -> Result<bool>;
}

/// Database account repository
pub struct DbAccountRepository {
    pool: DatabasePool,
}

impl DbAccountRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for DbAccountRepository {
    async fn create(&self, input: CreateAccount) -> Result<Account> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        if input.is_default_outgoing {
            sqlx::query("UPDATE accounts SET is_default_outgoing = FALSE, updated_at = NOW()")
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (
                id, name, access_token, phone_number_id, business_account_id, app_id,
                webhook_verify_token, is_default_outgoing, is_default_incoming,
                auto_read_receipt, enabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.name)
        .bind(&input.access_token)
        .bind(&input.phone_number_id)
        .bind(&input.business_account_id)
        .bind(&input.app_id)
        .bind(&input.webhook_verify_token)
        .bind(input.is_default_outgoing)
        .bind(input.is_default_incoming)
        .bind(input.auto_read_receipt)
        .bind(input.enabled)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(account)
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn find_by_phone_number_id(&self, phone_number_id: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE phone_number_id = $1")
            .bind(phone_number_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn find_default_outgoing(&self) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT * FROM accounts
            WHERE is_default_outgoing AND enabled
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list(&self) -> Result<Vec<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY name")
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn update(&self, id: AccountId, input: UpdateAccount) -> Result<Option<Account>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        if input.is_default_outgoing == Some(true) {
            sqlx::query(
                "UPDATE accounts SET is_default_outgoing = FALSE, updated_at = NOW() WHERE id <> $1",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET
                name = COALESCE($2, name),
                access_token = COALESCE($3, access_token),
                phone_number_id = COALESCE($4, phone_number_id),
                business_account_id = COALESCE($5, business_account_id),
                app_id = COALESCE($6, app_id),
                webhook_verify_token = COALESCE($7, webhook_verify_token),
                is_default_outgoing = COALESCE($8, is_default_outgoing),
                is_default_incoming = COALESCE($9, is_default_incoming),
                auto_read_receipt = COALESCE($10, auto_read_receipt),
                enabled = COALESCE($11, enabled),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.access_token)
        .bind(&input.phone_number_id)
        .bind(&input.business_account_id)
        .bind(&input.app_id)
        .bind(&input.webhook_verify_token)
        .bind(input.is_default_outgoing)
        .bind(input.is_default_incoming)
        .bind(input.auto_read_receipt)
        .bind(input.enabled)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(account)
    }

    async fn delete(&self, id: AccountId) -> Result<bool> {
        let (referencing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE account_id = $1")
                .bind(id)
                .fetch_one(self.pool.pool())
                .await
                .map_err(db_err)?;

        if referencing > 0 {
            return Err(Error::Conflict(format!(
                "Account {} is referenced by {} messages",
                id, referencing
            )));
        }

        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }
}
