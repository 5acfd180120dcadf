//! The companion account ("ChatterBot").
//!
//! The bot is an ordinary account flagged `is_ai_bot`, created once and
//! found by its reserved name afterwards. It greets new users, befriends
//! guests and answers messages, using the generative backend when one is
//! configured and the rule-based [`FallbackResponder`] otherwise.

pub mod fallback;
pub mod generative;

pub use fallback::FallbackResponder;
pub use generative::{GeminiBackend, HistoryTurn, ReplyBackend};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::LoggingConfig;
use crate::db::{Account, AccountStore, Message, NewAccount, StoreError};
use crate::error::{AppError, AppResult};
use crate::media::DEFAULT_AVATAR;
use crate::metrics;
use crate::utils::{generate_account_secret, loggable_id};

pub const BOT_NAME: &str = "ChatterBot";
pub const BOT_EMAIL: &str = "chatterbot@chatter.local";
pub const BOT_FULL_NAME: &str = "ChatterBot - Chatter AI Assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Generative,
    Fallback,
}

impl ReplySource {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplySource::Generative => "generative",
            ReplySource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

pub struct CompanionManager {
    store: Arc<dyn AccountStore>,
    backend: Option<Arc<dyn ReplyBackend>>,
    fallback: FallbackResponder,
    backend_timeout: Duration,
    onboarding_delay: Duration,
    bcrypt_cost: u32,
    logging: LoggingConfig,
    bot_id: OnceCell<Uuid>,
}

impl CompanionManager {
    pub fn new(
        store: Arc<dyn AccountStore>,
        backend: Option<Arc<dyn ReplyBackend>>,
        fallback: FallbackResponder,
        backend_timeout: Duration,
        onboarding_delay: Duration,
        bcrypt_cost: u32,
        logging: LoggingConfig,
    ) -> Self {
        Self {
            store,
            backend,
            fallback,
            backend_timeout,
            onboarding_delay,
            bcrypt_cost,
            logging,
            bot_id: OnceCell::new(),
        }
    }

    pub fn has_generative_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Finds the bot account, creating it on first use. A concurrent creator
    /// losing the race on the unique name gets the winner's account.
    pub async fn ensure_bot(&self) -> AppResult<Account> {
        if let Some(bot) = self.store.find_by_name(BOT_NAME).await? {
            return check_is_bot(bot);
        }

        let password_hash = bcrypt::hash(generate_account_secret(), self.bcrypt_cost)?;
        let created = self
            .store
            .insert_account(NewAccount {
                name: BOT_NAME.to_string(),
                email: BOT_EMAIL.to_string(),
                password_hash,
                full_name: BOT_FULL_NAME.to_string(),
                profile: Some(DEFAULT_AVATAR.to_string()),
                is_ai_bot: true,
                ..Default::default()
            })
            .await;

        match created {
            Ok(bot) => {
                tracing::info!(bot_id = %bot.id, "Companion bot account created");
                Ok(bot)
            }
            Err(StoreError::Conflict(_)) => {
                tracing::debug!("Companion bot created concurrently; reusing it");
                let bot = self
                    .store
                    .find_by_name(BOT_NAME)
                    .await?
                    .ok_or_else(|| AppError::internal("Bot name taken but bot not found"))?;
                check_is_bot(bot)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn bot_id(&self) -> AppResult<Uuid> {
        self.bot_id
            .get_or_try_init(|| async { self.ensure_bot().await.map(|bot| bot.id) })
            .await
            .copied()
    }

    /// Records a personalized welcome from the bot to `account_id`. Calling
    /// it twice sends two messages; callers decide when it is due.
    pub async fn send_onboarding(&self, account_id: Uuid) -> AppResult<Message> {
        let bot_id = self.bot_id().await?;
        let account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let message = self
            .store
            .insert_message(bot_id, account.id, &onboarding_text(account.display_name()))
            .await?;

        metrics::ONBOARDING_MESSAGES_TOTAL.inc();
        tracing::info!(
            account = %loggable_id(&account.id.to_string(), &self.logging),
            "Companion onboarding message sent"
        );
        Ok(message)
    }

    /// Sends the onboarding message after the configured delay, giving the
    /// client time to open its real-time connection. Failures are logged.
    pub fn schedule_onboarding(self: &Arc<Self>, account_id: Uuid) -> tokio::task::JoinHandle<()> {
        let companion = Arc::clone(self);
        tokio::spawn(async move {
            if !companion.onboarding_delay.is_zero() {
                tokio::time::sleep(companion.onboarding_delay).await;
            }
            if let Err(e) = companion.send_onboarding(account_id).await {
                tracing::warn!(error = %e, "Scheduled onboarding message failed");
            }
        })
    }

    /// Links `account_id` and the bot as friends. Idempotent.
    pub async fn befriend(&self, account_id: Uuid) -> AppResult<bool> {
        let bot_id = self.bot_id().await?;
        let linked = self.store.add_friendship(account_id, bot_id).await?;
        if linked {
            tracing::debug!(
                account = %loggable_id(&account_id.to_string(), &self.logging),
                "Companion bot added as friend"
            );
        }
        Ok(linked)
    }

    /// Produces a reply. The generative backend gets exactly one attempt
    /// bounded by the timeout; any failure falls through to the rules.
    pub async fn reply(&self, user_text: &str, history: &[HistoryTurn]) -> Reply {
        if let Some(backend) = &self.backend {
            let prompt = generative::build_prompt(user_text, history);
            let timer = metrics::GENERATIVE_REPLY_LATENCY.start_timer();
            let outcome = tokio::time::timeout(self.backend_timeout, backend.generate(&prompt)).await;
            timer.observe_duration();

            match outcome {
                Ok(Ok(text)) => return record(Reply {
                    text,
                    source: ReplySource::Generative,
                }),
                Ok(Err(e)) => tracing::warn!(
                    backend = backend.name(),
                    error = %e,
                    "Generative backend failed; using fallback reply"
                ),
                Err(_) => tracing::warn!(
                    backend = backend.name(),
                    timeout_ms = self.backend_timeout.as_millis() as u64,
                    "Generative backend timed out; using fallback reply"
                ),
            }
        }

        record(Reply {
            text: self.fallback.respond(user_text),
            source: ReplySource::Fallback,
        })
    }

    /// Generates a reply to `text` and records it as a message from the bot
    /// to `recipient_id`.
    pub async fn respond_to(
        &self,
        recipient_id: Uuid,
        text: &str,
        history: &[HistoryTurn],
    ) -> AppResult<(Message, ReplySource)> {
        let bot_id = self.bot_id().await?;
        if self.store.find_by_id(recipient_id).await?.is_none() {
            return Err(AppError::not_found("Recipient not found"));
        }

        let reply = self.reply(text, history).await;
        let message = self
            .store
            .insert_message(bot_id, recipient_id, &reply.text)
            .await?;
        Ok((message, reply.source))
    }
}

fn record(reply: Reply) -> Reply {
    metrics::COMPANION_REPLIES_TOTAL
        .with_label_values(&[reply.source.as_str()])
        .inc();
    reply
}

fn check_is_bot(account: Account) -> AppResult<Account> {
    if account.is_ai_bot {
        Ok(account)
    } else {
        Err(AppError::internal(format!(
            "Account named {} exists but is not the companion bot",
            BOT_NAME
        )))
    }
}

pub fn onboarding_text(display_name: &str) -> String {
    format!(
        "Hey {}! Welcome to Chatter!

I'm ChatterBot, your friendly AI assistant. I'm here to help you get the most out of the platform.

What makes Chatter awesome:
- Lightning-fast real-time messaging
- Smart notifications that won't bug you during active conversations
- A clean, modern design
- AI-powered conversations (that's me!)
- Easy guest access for friends
- Security with email verification and CAPTCHA protection

I can help you with:
- Learning about Chatter's features
- Understanding the technology behind the platform
- Finding and connecting with friends
- Customizing your profile and settings

Ready to explore? What would you like to know first?",
        display_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryAccountStore;

    struct FixedBackend(&'static str);

    #[async_trait::async_trait]
    impl ReplyBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingBackend;

    #[async_trait::async_trait]
    impl ReplyBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    struct SlowBackend;

    #[async_trait::async_trait]
    impl ReplyBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    fn manager(
        store: Arc<MemoryAccountStore>,
        backend: Option<Arc<dyn ReplyBackend>>,
    ) -> CompanionManager {
        CompanionManager::new(
            store,
            backend,
            FallbackResponder::seeded(1),
            Duration::from_millis(50),
            Duration::ZERO,
            4,
            LoggingConfig {
                enable_user_identifiers: false,
                hash_salt: "test".to_string(),
            },
        )
    }

    async fn user(store: &MemoryAccountStore, name: &str) -> Account {
        store
            .insert_account(NewAccount {
                name: name.to_string(),
                email: format!("{}@x.com", name),
                password_hash: "hash".to_string(),
                full_name: format!("{} Example", name),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_bot_is_idempotent() {
        let store = Arc::new(MemoryAccountStore::new());
        let companion = manager(store.clone(), None);
        let first = companion.ensure_bot().await.unwrap();
        let second = companion.ensure_bot().await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_ai_bot);
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_bot_creates_one_account() {
        let store = Arc::new(MemoryAccountStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let companion = Arc::new(manager(store.clone(), None));
            handles.push(tokio::spawn(async move { companion.ensure_bot().await }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_onboarding_is_personalized_and_not_deduplicated() {
        let store = Arc::new(MemoryAccountStore::new());
        let companion = manager(store.clone(), None);
        let amy = user(&store, "amy").await;

        let message = companion.send_onboarding(amy.id).await.unwrap();
        assert!(message.content.starts_with("Hey amy Example!"));
        companion.send_onboarding(amy.id).await.unwrap();

        let bot = companion.ensure_bot().await.unwrap();
        assert_eq!(store.messages_between(bot.id, amy.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_onboarding_unknown_account_is_not_found() {
        let store = Arc::new(MemoryAccountStore::new());
        let companion = manager(store, None);
        assert!(matches!(
            companion.send_onboarding(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_befriend_is_symmetric_and_idempotent() {
        let store = Arc::new(MemoryAccountStore::new());
        let companion = manager(store.clone(), None);
        let guest = user(&store, "guest").await;

        assert!(companion.befriend(guest.id).await.unwrap());
        assert!(!companion.befriend(guest.id).await.unwrap());

        let bot = companion.ensure_bot().await.unwrap();
        let guest = store.find_by_id(guest.id).await.unwrap().unwrap();
        assert_eq!(guest.friends, vec![bot.id]);
        assert_eq!(bot.friends, vec![guest.id]);
    }

    #[tokio::test]
    async fn test_reply_uses_backend_when_healthy() {
        let store = Arc::new(MemoryAccountStore::new());
        let companion = manager(store, Some(Arc::new(FixedBackend("from the model"))));
        let reply = companion.reply("hello", &[]).await;
        assert_eq!(reply.source, ReplySource::Generative);
        assert_eq!(reply.text, "from the model");
    }

    #[tokio::test]
    async fn test_reply_falls_back_on_error_timeout_and_absence() {
        let store = Arc::new(MemoryAccountStore::new());
        let backends: Vec<Option<Arc<dyn ReplyBackend>>> =
            vec![Some(Arc::new(FailingBackend)), Some(Arc::new(SlowBackend)), None];
        for backend in backends {
            let companion = manager(store.clone(), backend);
            let reply = companion.reply("hello?", &[]).await;
            assert_eq!(reply.source, ReplySource::Fallback);
            assert!(fallback::Category::Greeting
                .responses()
                .contains(&reply.text.as_str()));
        }
    }

    #[tokio::test]
    async fn test_respond_to_records_bot_message() {
        let store = Arc::new(MemoryAccountStore::new());
        let companion = manager(store.clone(), Some(Arc::new(FixedBackend("sure thing"))));
        let amy = user(&store, "amy").await;

        let (message, source) = companion.respond_to(amy.id, "help", &[]).await.unwrap();
        assert_eq!(source, ReplySource::Generative);
        assert_eq!(message.recipient_id, amy.id);
        assert_eq!(message.content, "sure thing");

        assert!(matches!(
            companion.respond_to(Uuid::new_v4(), "help", &[]).await,
            Err(AppError::NotFound(_))
        ));
    }
}
