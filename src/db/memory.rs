use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    Account, AccountStore, InfoUpdate, Message, NewAccount, StoreError, StoreResult, UniqueField,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    messages: Vec<Message>,
}

impl Tables {
    fn taken(&self, field: UniqueField, value: &str, except: Option<Uuid>) -> bool {
        self.accounts.values().any(|a| {
            Some(a.id) != except
                && match field {
                    UniqueField::Name => a.name == value,
                    UniqueField::Email => a.email == value,
                }
        })
    }
}

/// In-process [`AccountStore`]. One mutex guards every table so each
/// operation observes and mutates a consistent snapshot.
#[derive(Default)]
pub struct MemoryAccountStore {
    tables: Mutex<Tables>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("account table lock poisoned".to_string()))
    }

    pub fn account_count(&self) -> usize {
        self.lock().map(|t| t.accounts.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn insert_account(&self, account: NewAccount) -> StoreResult<Account> {
        account.check_widths()?;
        let mut tables = self.lock()?;
        if tables.taken(UniqueField::Name, &account.name, None) {
            return Err(StoreError::Conflict(UniqueField::Name));
        }
        if tables.taken(UniqueField::Email, &account.email, None) {
            return Err(StoreError::Conflict(UniqueField::Email));
        }

        let created = Account {
            id: account.id.unwrap_or_else(Uuid::new_v4),
            name: account.name,
            email: account.email,
            password_hash: account.password_hash,
            full_name: account.full_name,
            gender: account.gender,
            date_of_birth: account.date_of_birth,
            profile: account.profile,
            is_email_verified: false,
            is_guest: account.is_guest,
            is_ai_bot: account.is_ai_bot,
            reset_password_token: None,
            reset_password_expires: None,
            last_welcome_email_sent: None,
            last_login: None,
            friends: Vec::new(),
            created_at: Utc::now(),
        };
        tables.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn mark_email_verified(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.accounts.get_mut(&id) {
            Some(account) if !account.is_email_verified => {
                account.is_email_verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_reset_mirror(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(account) = tables.accounts.get_mut(&id) {
            account.reset_password_token = Some(token.to_string());
            account.reset_password_expires = Some(expires_at);
        }
        Ok(())
    }

    async fn clear_reset_mirror(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(account) = tables.accounts.get_mut(&id) {
            account.reset_password_token = None;
            account.reset_password_expires = None;
        }
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        token: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let Some(account) = tables.accounts.get_mut(&id) else {
            return Ok(false);
        };
        let mirror_matches = account.reset_password_token.as_deref() == Some(token);
        let unexpired = account.reset_password_expires.is_some_and(|exp| exp > now);
        if !(mirror_matches && unexpired) {
            return Ok(false);
        }
        account.password_hash = new_password_hash.to_string();
        account.reset_password_token = None;
        account.reset_password_expires = None;
        Ok(true)
    }

    async fn claim_first_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        match tables.accounts.get_mut(&id) {
            Some(account) if account.last_welcome_email_sent.is_none() => {
                account.last_welcome_email_sent = Some(now);
                account.last_login = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_last_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if let Some(account) = tables.accounts.get_mut(&id) {
            account.last_login = Some(now);
        }
        Ok(())
    }

    async fn update_profile_image(&self, id: Uuid, url: &str) -> StoreResult<Option<Account>> {
        let mut tables = self.lock()?;
        Ok(tables.accounts.get_mut(&id).map(|account| {
            account.profile = Some(url.to_string());
            account.clone()
        }))
    }

    async fn update_info(&self, id: Uuid, update: InfoUpdate) -> StoreResult<Option<Account>> {
        update.check_widths()?;
        let mut tables = self.lock()?;
        if let Some(email) = update.email.as_deref() {
            if tables.taken(UniqueField::Email, email, Some(id)) {
                return Err(StoreError::Conflict(UniqueField::Email));
            }
        }
        Ok(tables.accounts.get_mut(&id).map(|account| {
            if let Some(full_name) = update.full_name {
                account.full_name = full_name;
            }
            if let Some(email) = update.email {
                account.email = email;
            }
            if let Some(gender) = update.gender {
                account.gender = Some(gender);
            }
            if let Some(dob) = update.date_of_birth {
                account.date_of_birth = Some(dob);
            }
            account.clone()
        }))
    }

    async fn add_friendship(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        if !tables.accounts.contains_key(&a) || !tables.accounts.contains_key(&b) {
            return Ok(false);
        }
        let mut linked = false;
        for (owner, friend) in [(a, b), (b, a)] {
            if let Some(account) = tables.accounts.get_mut(&owner) {
                if !account.friends.contains(&friend) {
                    account.friends.push(friend);
                    linked = true;
                }
            }
        }
        Ok(linked)
    }

    async fn insert_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> StoreResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.lock()?.messages.push(message.clone());
        Ok(message)
    }

    async fn messages_between(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>> {
        Ok(self
            .lock()?
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.recipient_id == b) || (m.sender_id == b && m.recipient_id == a)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MAX_FULL_NAME_CHARS, MAX_GENDER_CHARS};
    use chrono::Duration;

    fn new_account(name: &str, email: &str) -> NewAccount {
        NewAccount {
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            full_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name_and_email() {
        let store = MemoryAccountStore::new();
        store.insert_account(new_account("bob", "bob@x.com")).await.unwrap();

        let err = store
            .insert_account(new_account("bob", "other@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::Name)));

        let err = store
            .insert_account(new_account("robert", "bob@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::Email)));
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_email_verified_flips_once() {
        let store = MemoryAccountStore::new();
        let account = store.insert_account(new_account("amy", "amy@x.com")).await.unwrap();
        assert!(store.mark_email_verified(account.id).await.unwrap());
        assert!(!store.mark_email_verified(account.id).await.unwrap());
        assert!(!store.mark_email_verified(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_first_login_only_once() {
        let store = MemoryAccountStore::new();
        let account = store.insert_account(new_account("cat", "cat@x.com")).await.unwrap();
        let now = Utc::now();
        assert!(store.claim_first_login(account.id, now).await.unwrap());
        assert!(!store.claim_first_login(account.id, now).await.unwrap());

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.last_welcome_email_sent, Some(now));
        assert_eq!(stored.last_login, Some(now));
    }

    #[tokio::test]
    async fn test_password_reset_requires_matching_unexpired_mirror() {
        let store = MemoryAccountStore::new();
        let account = store.insert_account(new_account("dan", "dan@x.com")).await.unwrap();
        let now = Utc::now();
        store
            .set_reset_mirror(account.id, "tok-1", now + Duration::minutes(60))
            .await
            .unwrap();

        assert!(!store
            .complete_password_reset(account.id, "tok-2", "new", now)
            .await
            .unwrap());
        assert!(!store
            .complete_password_reset(account.id, "tok-1", "new", now + Duration::minutes(61))
            .await
            .unwrap());
        assert!(store
            .complete_password_reset(account.id, "tok-1", "new", now)
            .await
            .unwrap());
        // Mirror is cleared, so replaying the same token fails
        assert!(!store
            .complete_password_reset(account.id, "tok-1", "newer", now)
            .await
            .unwrap());

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "new");
        assert!(stored.reset_password_token.is_none());
        assert!(stored.reset_password_expires.is_none());
    }

    #[tokio::test]
    async fn test_friendship_is_symmetric_and_idempotent() {
        let store = MemoryAccountStore::new();
        let a = store.insert_account(new_account("a", "a@x.com")).await.unwrap();
        let b = store.insert_account(new_account("b", "b@x.com")).await.unwrap();

        assert!(store.add_friendship(a.id, b.id).await.unwrap());
        assert!(!store.add_friendship(b.id, a.id).await.unwrap());

        let a = store.find_by_id(a.id).await.unwrap().unwrap();
        let b = store.find_by_id(b.id).await.unwrap().unwrap();
        assert_eq!(a.friends, vec![b.id]);
        assert_eq!(b.friends, vec![a.id]);
    }

    #[tokio::test]
    async fn test_update_info_keeps_email_unique() {
        let store = MemoryAccountStore::new();
        let a = store.insert_account(new_account("a", "a@x.com")).await.unwrap();
        store.insert_account(new_account("b", "b@x.com")).await.unwrap();

        let err = store
            .update_info(
                a.id,
                InfoUpdate {
                    email: Some("b@x.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::Email)));

        let updated = store
            .update_info(
                a.id,
                InfoUpdate {
                    email: Some("a@x.com".to_string()),
                    full_name: Some("Alice A".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.full_name, "Alice A");
    }

    #[tokio::test]
    async fn test_values_wider_than_columns_are_rejected() {
        let store = MemoryAccountStore::new();
        let mut wide = new_account("wide", "wide@x.com");
        wide.full_name = "A".repeat(MAX_FULL_NAME_CHARS + 1);
        assert!(matches!(
            store.insert_account(wide).await,
            Err(StoreError::TooLong("full name"))
        ));

        let a = store.insert_account(new_account("a", "a@x.com")).await.unwrap();
        let err = store
            .update_info(
                a.id,
                InfoUpdate {
                    gender: Some("x".repeat(MAX_GENDER_CHARS + 1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TooLong("gender")));
    }

    #[tokio::test]
    async fn test_preassigned_id_is_kept() {
        let store = MemoryAccountStore::new();
        let id = Uuid::new_v4();
        let mut account = new_account("pre", "pre@x.com");
        account.id = Some(id);
        assert_eq!(store.insert_account(account).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_messages_between_filters_conversation() {
        let store = MemoryAccountStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.insert_message(a, b, "hi").await.unwrap();
        store.insert_message(b, a, "hello").await.unwrap();
        store.insert_message(a, c, "elsewhere").await.unwrap();

        let convo = store.messages_between(a, b).await.unwrap();
        let contents: Vec<_> = convo.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello"]);
    }
}
