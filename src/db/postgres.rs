use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use super::{
    Account, AccountStore, InfoUpdate, Message, NewAccount, StoreError, StoreResult, UniqueField,
};
use crate::config::DbConfig;

pub type DbPool = Pool<Postgres>;

const ACCOUNT_COLUMNS: &str = r#"
    id, name, email, password_hash, full_name, gender, date_of_birth, profile,
    is_email_verified, is_guest, is_ai_bot, reset_password_token, reset_password_expires,
    last_welcome_email_sent, last_login, friends, created_at
"#;

/// Opens the connection pool. Connection attempts are bounded by
/// `acquire_timeout_secs` so startup fails fast when the database is down.
pub async fn create_pool(database_url: &str, config: &DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(pool)
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                match db_err.constraint() {
                    Some("accounts_email_key") => StoreError::Conflict(UniqueField::Email),
                    _ => StoreError::Conflict(UniqueField::Name),
                }
            }
            // string_data_right_truncation
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("22001") => {
                StoreError::TooLong("value")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// PostgreSQL implementation of [`AccountStore`]
pub struct PgAccountStore {
    pool: DbPool,
}

impl PgAccountStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn find_one(&self, column: &str, value: &str) -> StoreResult<Option<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE {} = $1", ACCOUNT_COLUMNS, column);
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }
}

#[async_trait::async_trait]
impl AccountStore for PgAccountStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_account(&self, account: NewAccount) -> StoreResult<Account> {
        account.check_widths()?;
        let query = format!(
            r#"
            INSERT INTO accounts (
                id, name, email, password_hash, full_name, gender, date_of_birth,
                profile, is_guest, is_ai_bot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let created = sqlx::query_as::<_, Account>(&query)
            .bind(account.id.unwrap_or_else(Uuid::new_v4))
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(&account.full_name)
            .bind(&account.gender)
            .bind(account.date_of_birth)
            .bind(&account.profile)
            .bind(account.is_guest)
            .bind(account.is_ai_bot)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<Account>> {
        self.find_one("name", name).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        self.find_one("email", email).await
    }

    async fn mark_email_verified(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET is_email_verified = TRUE
            WHERE id = $1 AND is_email_verified = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_reset_mirror(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET reset_password_token = $2, reset_password_expires = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_reset_mirror(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET reset_password_token = NULL, reset_password_expires = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $3,
                reset_password_token = NULL,
                reset_password_expires = NULL
            WHERE id = $1
              AND reset_password_token = $2
              AND reset_password_expires > $4
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(new_password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_first_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET last_welcome_email_sent = $2, last_login = $2
            WHERE id = $1 AND last_welcome_email_sent IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_last_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE accounts SET last_login = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_profile_image(&self, id: Uuid, url: &str) -> StoreResult<Option<Account>> {
        let query = format!(
            "UPDATE accounts SET profile = $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn update_info(&self, id: Uuid, update: InfoUpdate) -> StoreResult<Option<Account>> {
        update.check_widths()?;
        let query = format!(
            r#"
            UPDATE accounts
            SET full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                gender = COALESCE($4, gender),
                date_of_birth = COALESCE($5, date_of_birth)
            WHERE id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .bind(update.full_name)
            .bind(update.email)
            .bind(update.gender)
            .bind(update.date_of_birth)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn add_friendship(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let mut linked = false;
        for (owner, friend) in [(a, b), (b, a)] {
            let result = sqlx::query(
                r#"
                UPDATE accounts
                SET friends = array_append(friends, $2)
                WHERE id = $1 AND NOT ($2 = ANY(friends))
                "#,
            )
            .bind(owner)
            .bind(friend)
            .execute(&mut *tx)
            .await?;
            linked |= result.rows_affected() == 1;
        }
        tx.commit().await?;
        Ok(linked)
    }

    async fn insert_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> StoreResult<Message> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING id, sender_id, recipient_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(recipient_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    async fn messages_between(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, sender_id, recipient_id, content, created_at
            FROM messages
            WHERE (sender_id = $1 AND recipient_id = $2)
               OR (sender_id = $2 AND recipient_id = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}
