use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::accounts::AccountService;
use crate::auth::TokenService;
use crate::captcha::{CaptchaService, ChallengeStore};
use crate::companion::{CompanionManager, FallbackResponder, ReplyBackend};
use crate::config::Config;
use crate::db::AccountStore;
use crate::mailer::Mailer;
use crate::media::{AvatarStore, InlineAvatarStore};

/// Application context containing shared dependencies
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn AccountStore>,
    pub tokens: Arc<TokenService>,
    pub captcha: Arc<CaptchaService>,
    pub companion: Arc<CompanionManager>,
    pub accounts: Arc<AccountService>,
}

impl AppContext {
    /// Wires the services together over the given backends. The storage,
    /// challenge, mail and generative backends are chosen by the caller so
    /// tests can substitute in-memory versions.
    pub fn new(
        config: Config,
        store: Arc<dyn AccountStore>,
        challenges: Arc<dyn ChallengeStore>,
        mailer: Arc<dyn Mailer>,
        backend: Option<Arc<dyn ReplyBackend>>,
    ) -> Result<Self> {
        let tokens = Arc::new(TokenService::new(&config)?);
        let captcha = Arc::new(CaptchaService::new(challenges, &config.captcha));
        let avatars: Arc<dyn AvatarStore> = Arc::new(InlineAvatarStore::new());

        let companion = Arc::new(CompanionManager::new(
            store.clone(),
            backend,
            FallbackResponder::new(),
            Duration::from_secs(config.ai.timeout_secs),
            Duration::from_millis(config.onboarding_delay_ms),
            config.bcrypt_cost,
            config.logging.clone(),
        ));

        let accounts = Arc::new(AccountService::new(
            store.clone(),
            tokens.clone(),
            captcha.clone(),
            mailer,
            avatars,
            companion.clone(),
            &config,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            captcha,
            companion,
            accounts,
        })
    }

    /// Whether session cookies must carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.config.is_production()
    }
}
