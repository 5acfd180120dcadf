//! Account provisioning and lifecycle: signup, login, guest entry and
//! profile updates. Email verification and password recovery live in
//! [`recovery`].
//!
//! Side effects attached to these flows (emails, companion onboarding,
//! auto-friending) are best-effort: their failures are logged and never
//! fail the request they belong to.

mod recovery;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{IssuedToken, TokenService};
use crate::captcha::CaptchaService;
use crate::companion::CompanionManager;
use crate::config::{Config, LoggingConfig};
use crate::content_policy::ContentPolicy;
use crate::db::{
    Account, AccountStore, InfoUpdate, NewAccount, StoreError, MAX_EMAIL_CHARS,
    MAX_FULL_NAME_CHARS, MAX_GENDER_CHARS, MAX_NAME_CHARS,
};
use crate::error::{AppError, AppResult};
use crate::mailer::{self, Mailer, OutgoingEmail};
use crate::media::{AvatarStore, DEFAULT_AVATAR};
use crate::metrics;
use crate::utils::{generate_account_secret, loggable_id};

pub const MIN_PASSWORD_LENGTH: usize = 6;
const GUEST_NAME_ATTEMPTS: usize = 5;

pub struct CaptchaAnswer {
    pub session_id: String,
    pub answer: String,
}

pub struct SignupInput {
    pub name: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub profile: Option<String>,
    /// Set by clients that solved the challenge themselves.
    pub captcha_completed: bool,
    /// Server-side check; takes precedence over `captcha_completed`.
    pub captcha: Option<CaptchaAnswer>,
}

#[derive(Debug, Clone, Default)]
pub struct InfoInput {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
}

/// A freshly authenticated account together with its session token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub account: Account,
    pub session: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account: Account,
    pub session: IssuedToken,
    pub is_first_login: bool,
}

pub struct AccountService {
    store: Arc<dyn AccountStore>,
    tokens: Arc<TokenService>,
    captcha: Arc<CaptchaService>,
    mailer: Arc<dyn Mailer>,
    avatars: Arc<dyn AvatarStore>,
    companion: Arc<CompanionManager>,
    policy: ContentPolicy,
    bcrypt_cost: u32,
    client_url: String,
    logging: LoggingConfig,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        tokens: Arc<TokenService>,
        captcha: Arc<CaptchaService>,
        mailer: Arc<dyn Mailer>,
        avatars: Arc<dyn AvatarStore>,
        companion: Arc<CompanionManager>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            tokens,
            captcha,
            mailer,
            avatars,
            companion,
            policy: ContentPolicy::new(),
            bcrypt_cost: config.bcrypt_cost,
            client_url: config.client_url.trim_end_matches('/').to_string(),
            logging: config.logging.clone(),
        }
    }

    fn log_id(&self, id: &Uuid) -> String {
        loggable_id(&id.to_string(), &self.logging)
    }

    fn issue_session(&self, account: &Account) -> AppResult<IssuedToken> {
        self.tokens.issue_session(&account.id).map_err(|e| {
            tracing::error!(error = %e, "Failed to create session token");
            AppError::Unknown(e)
        })
    }

    async fn send_best_effort(&self, email: OutgoingEmail) -> bool {
        let kind = email.kind.clone();
        match self.mailer.send(email).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = ?kind, error = %e, "Email delivery failed");
                false
            }
        }
    }

    /// Creates a permanent account and signs it in.
    pub async fn signup(&self, input: SignupInput) -> AppResult<AuthSession> {
        // 1. Required fields
        let name = input.name.trim().to_string();
        let full_name = input.full_name.trim().to_string();
        let email = input.email.trim().to_lowercase();
        if name.is_empty() || input.password.is_empty() || full_name.is_empty() || email.is_empty()
        {
            return Err(AppError::validation(
                "Name, password, full name, and email are required",
            ));
        }
        let gender = non_empty(input.gender);
        check_length("Name", &name, MAX_NAME_CHARS)?;
        check_length("Full name", &full_name, MAX_FULL_NAME_CHARS)?;
        check_length("Email", &email, MAX_EMAIL_CHARS)?;
        if let Some(gender) = gender.as_deref() {
            check_length("Gender", gender, MAX_GENDER_CHARS)?;
        }

        // 2. CAPTCHA
        match &input.captcha {
            Some(answer) => {
                if !self.captcha.verify(&answer.session_id, &answer.answer).await? {
                    return Err(AppError::validation("Invalid or expired captcha"));
                }
            }
            None if !input.captcha_completed => {
                return Err(AppError::validation(
                    "Please complete the captcha verification",
                ));
            }
            None => {}
        }

        // 3. Name policy
        let verdict = self.policy.screen_name(&name);
        if !verdict.is_valid {
            return Err(verdict.into_error(None, "Please choose a different name"));
        }

        // 4. Password and email shape
        if input.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        validate_email(&email)?;

        // 5. Uniqueness; the store re-checks atomically on insert
        if self.store.find_by_name(&name).await?.is_some() {
            return Err(AppError::validation("name already exists"));
        }
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AppError::validation("email already exists"));
        }

        // 6. Full name policy
        let verdict = self.policy.screen_text(&full_name);
        if !verdict.is_valid {
            return Err(verdict.into_error(
                Some("Full name contains inappropriate language"),
                "Please choose a different full name",
            ));
        }

        let date_of_birth = input
            .date_of_birth
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(parse_date_of_birth)
            .transpose()?;

        // 7. Avatar, through the same checks as a later profile update
        let account_id = Uuid::new_v4();
        let profile = match non_empty(input.profile) {
            Some(payload) => Some(self.avatars.store(account_id, &payload).await?),
            None => None,
        };

        // 8. Persist
        let password_hash = bcrypt::hash(&input.password, self.bcrypt_cost)?;
        let account = self
            .store
            .insert_account(NewAccount {
                id: Some(account_id),
                name,
                email,
                password_hash,
                full_name,
                gender,
                date_of_birth,
                profile,
                is_guest: false,
                is_ai_bot: false,
            })
            .await?;

        metrics::SIGNUPS_TOTAL.inc();
        tracing::info!(account = %self.log_id(&account.id), "Account created");

        // 9. Verification email, best-effort
        if let Err(e) = self.dispatch_verification(&account).await {
            tracing::warn!(error = %e, "Verification email not sent after signup");
        }

        let session = self.issue_session(&account)?;
        Ok(AuthSession { account, session })
    }

    /// Authenticates by name and password. Unknown names and wrong passwords
    /// produce the same error.
    pub async fn login(&self, name: &str, password: &str) -> AppResult<LoginOutcome> {
        let account = match self.store.find_by_name(name.trim()).await? {
            Some(account) => account,
            None => {
                metrics::LOGINS_TOTAL.with_label_values(&["failure"]).inc();
                return Err(AppError::InvalidCredentials);
            }
        };

        let password_ok = bcrypt::verify(password, &account.password_hash).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Stored password hash could not be checked");
            false
        });
        if !password_ok {
            metrics::LOGINS_TOTAL.with_label_values(&["failure"]).inc();
            return Err(AppError::InvalidCredentials);
        }

        let now = Utc::now();
        let mut is_first_login = account.last_welcome_email_sent.is_none();

        if is_first_login && !account.is_guest {
            // Only the caller that stamps the welcome marker runs the first-login effects
            is_first_login = self.store.claim_first_login(account.id, now).await?;
            if is_first_login {
                self.send_best_effort(mailer::welcome_email(
                    &account.email,
                    account.display_name(),
                    &self.client_url,
                ))
                .await;
                self.companion.schedule_onboarding(account.id);
            }
        } else {
            self.store.touch_last_login(account.id, now).await?;
        }

        metrics::LOGINS_TOTAL.with_label_values(&["success"]).inc();
        tracing::info!(
            account = %self.log_id(&account.id),
            first_login = is_first_login,
            "Login succeeded"
        );

        let session = self.issue_session(&account)?;
        Ok(LoginOutcome {
            account,
            session,
            is_first_login,
        })
    }

    /// Creates a guest account, befriends it with the companion and greets it.
    pub async fn guest_provision(&self) -> AppResult<AuthSession> {
        let password_hash = bcrypt::hash(generate_account_secret(), self.bcrypt_cost)?;

        let mut account = None;
        for attempt in 0..GUEST_NAME_ATTEMPTS {
            let number = guest_number(attempt);
            let result = self
                .store
                .insert_account(NewAccount {
                    name: format!("Guest_{}", number),
                    email: format!("guest_{}@chatter.local", number),
                    password_hash: password_hash.clone(),
                    full_name: format!("Guest User {}", number),
                    profile: Some(DEFAULT_AVATAR.to_string()),
                    is_guest: true,
                    ..Default::default()
                })
                .await;
            match result {
                Ok(created) => {
                    account = Some(created);
                    break;
                }
                Err(StoreError::Conflict(field)) => {
                    tracing::debug!(attempt = attempt, field = %field, "Guest name taken; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let account = account
            .ok_or_else(|| AppError::ServiceUnavailable("no free guest name".to_string()))?;

        metrics::GUEST_ACCOUNTS_TOTAL.inc();
        tracing::info!(account = %self.log_id(&account.id), "Guest account created");

        if let Err(e) = self.companion.befriend(account.id).await {
            tracing::warn!(error = %e, "Could not add companion as guest friend");
        }
        if let Err(e) = self.companion.send_onboarding(account.id).await {
            tracing::warn!(error = %e, "Could not send guest onboarding message");
        }

        // Re-read so the returned projection includes the new friend edge
        let account = self
            .store
            .find_by_id(account.id)
            .await
            .ok()
            .flatten()
            .unwrap_or(account);

        let session = self.issue_session(&account)?;
        Ok(AuthSession { account, session })
    }

    pub async fn current(&self, account_id: Uuid) -> AppResult<Account> {
        self.store
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// Updates the provided profile fields; absent fields are untouched.
    pub async fn update_info(&self, account_id: Uuid, input: InfoInput) -> AppResult<Account> {
        let full_name = input.full_name.map(|n| n.trim().to_string());
        if let Some(full_name) = full_name.as_deref() {
            if full_name.is_empty() {
                return Err(AppError::validation("Full name cannot be empty"));
            }
            check_length("Full name", full_name, MAX_FULL_NAME_CHARS)?;
            let verdict = self.policy.screen_text(full_name);
            if !verdict.is_valid {
                return Err(verdict.into_error(
                    Some("Full name contains inappropriate language"),
                    "Please choose a different full name",
                ));
            }
        }

        let email = input.email.map(|e| e.trim().to_lowercase());
        if let Some(email) = email.as_deref() {
            check_length("Email", email, MAX_EMAIL_CHARS)?;
            validate_email(email)?;
        }
        let gender = non_empty(input.gender);
        if let Some(gender) = gender.as_deref() {
            check_length("Gender", gender, MAX_GENDER_CHARS)?;
        }

        let date_of_birth = input
            .date_of_birth
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(parse_date_of_birth)
            .transpose()?;

        self.store
            .update_info(
                account_id,
                InfoUpdate {
                    full_name,
                    email,
                    gender,
                    date_of_birth,
                },
            )
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub async fn update_avatar(&self, account_id: Uuid, payload: Option<&str>) -> AppResult<Account> {
        let payload = payload
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::validation("Profile pic is required"))?;
        let url = self.avatars.store(account_id, payload).await?;
        self.store
            .update_profile_image(account_id, &url)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }
}

/// First attempt uses the low six digits of the clock; retries use random digits.
fn guest_number(attempt: usize) -> String {
    let n = if attempt == 0 {
        Utc::now().timestamp_millis().rem_euclid(1_000_000)
    } else {
        rand::thread_rng().gen_range(0..1_000_000)
    };
    format!("{:06}", n)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_length(label: &str, value: &str, max: usize) -> AppResult<()> {
    if value.chars().count() > max {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            label, max
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> AppResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::validation("Please provide a valid email address"))
    }
}

/// Accepts `YYYY-MM-DD` or an ISO-8601 timestamp starting with one.
fn parse_date_of_birth(raw: &str) -> AppResult<NaiveDate> {
    let raw = raw.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| AppError::validation("Invalid date of birth"))
}
