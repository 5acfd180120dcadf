//! Account persistence.
//!
//! Every conditional update the account lifecycle depends on (first-login
//! detection, email verification, password reset, friendship linking) is a
//! single atomic store operation, so two concurrent requests cannot both
//! observe the pre-update state and repeat a side effect.

mod memory;
mod postgres;

pub use memory::MemoryAccountStore;
pub use postgres::{DbPool, PgAccountStore, create_pool};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Field carrying a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Name,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Name => f.write_str("name"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

/// Column widths of the `accounts` table, in characters.
pub const MAX_NAME_CHARS: usize = 64;
pub const MAX_EMAIL_CHARS: usize = 255;
pub const MAX_FULL_NAME_CHARS: usize = 128;
pub const MAX_GENDER_CHARS: usize = 32;

fn check_width(column: &'static str, value: &str, max: usize) -> StoreResult<()> {
    if value.chars().count() > max {
        return Err(StoreError::TooLong(column));
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{0} already exists")]
    Conflict(UniqueField),

    /// A value does not fit its column.
    #[error("{0} is too long")]
    TooLong(&'static str),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub profile: Option<String>,
    pub is_email_verified: bool,
    pub is_guest: bool,
    pub is_ai_bot: bool,
    pub reset_password_token: Option<String>,
    pub reset_password_expires: Option<DateTime<Utc>>,
    pub last_welcome_email_sent: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub friends: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

// Hand-written so credentials never reach the logs.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("is_email_verified", &self.is_email_verified)
            .field("is_guest", &self.is_guest)
            .field("is_ai_bot", &self.is_ai_bot)
            .field(
                "reset_password_token",
                &self.reset_password_token.as_ref().map(|_| "<redacted>"),
            )
            .field("last_welcome_email_sent", &self.last_welcome_email_sent)
            .field("friends", &self.friends)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Display name used when addressing the account owner.
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.name
        } else {
            &self.full_name
        }
    }

    /// Projection safe to return to clients: no hash, no reset mirror.
    pub fn to_view(&self) -> AccountView {
        AccountView {
            id: self.id,
            name: self.name.clone(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            gender: self.gender.clone(),
            date_of_birth: self.date_of_birth,
            profile: self.profile.clone(),
            is_email_verified: self.is_email_verified,
            is_guest: self.is_guest,
            is_ai_bot: self.is_ai_bot,
            friends: self.friends.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: Uuid,
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub profile: Option<String>,
    pub is_email_verified: bool,
    pub is_guest: bool,
    pub is_ai_bot: bool,
    pub friends: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`AccountStore::insert_account`]. The password must already be hashed.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    /// Preassigned id; the store generates one when absent.
    pub id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub profile: Option<String>,
    pub is_guest: bool,
    pub is_ai_bot: bool,
}

impl NewAccount {
    pub(crate) fn check_widths(&self) -> StoreResult<()> {
        check_width("name", &self.name, MAX_NAME_CHARS)?;
        check_width("email", &self.email, MAX_EMAIL_CHARS)?;
        check_width("full name", &self.full_name, MAX_FULL_NAME_CHARS)?;
        if let Some(gender) = self.gender.as_deref() {
            check_width("gender", gender, MAX_GENDER_CHARS)?;
        }
        Ok(())
    }
}

/// Partial profile update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct InfoUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl InfoUpdate {
    pub(crate) fn check_widths(&self) -> StoreResult<()> {
        if let Some(email) = self.email.as_deref() {
            check_width("email", email, MAX_EMAIL_CHARS)?;
        }
        if let Some(full_name) = self.full_name.as_deref() {
            check_width("full name", full_name, MAX_FULL_NAME_CHARS)?;
        }
        if let Some(gender) = self.gender.as_deref() {
            check_width("gender", gender, MAX_GENDER_CHARS)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> StoreResult<()>;

    /// Inserts a new account. Fails with [`StoreError::Conflict`] when the
    /// name or email is already taken.
    async fn insert_account(&self, account: NewAccount) -> StoreResult<Account>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// Flips `is_email_verified` false -> true. Returns `false` when the
    /// account is missing or already verified.
    async fn mark_email_verified(&self, id: Uuid) -> StoreResult<bool>;

    /// Stores the reset token mirror, replacing any earlier token.
    async fn set_reset_mirror(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Clears the reset token mirror, revoking any outstanding reset token.
    async fn clear_reset_mirror(&self, id: Uuid) -> StoreResult<()>;

    /// Replaces the password hash and clears the mirror, but only while the
    /// mirror still holds `token` and has not expired at `now`.
    async fn complete_password_reset(
        &self,
        id: Uuid,
        token: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Stamps `last_welcome_email_sent` and `last_login` if the welcome stamp
    /// is unset. Returns `true` only for the caller that set it.
    async fn claim_first_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    async fn touch_last_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;

    async fn update_profile_image(&self, id: Uuid, url: &str) -> StoreResult<Option<Account>>;

    async fn update_info(&self, id: Uuid, update: InfoUpdate) -> StoreResult<Option<Account>>;

    /// Links two accounts in both directions. Returns `true` if either side
    /// gained a new edge.
    async fn add_friendship(&self, a: Uuid, b: Uuid) -> StoreResult<bool>;

    async fn insert_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> StoreResult<Message>;

    /// Messages exchanged between two accounts, oldest first.
    async fn messages_between(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>>;
}
