use anyhow::{Context, Result};
use std::ops::RangeInclusive;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 5001;

// Token lifetimes
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;
const DEFAULT_VERIFICATION_TTL_HOURS: i64 = 24;
const DEFAULT_RESET_TTL_MINUTES: i64 = 60;
const MAX_SESSION_TTL_DAYS: i64 = 365;
const MAX_VERIFICATION_TTL_HOURS: i64 = 24 * 30;
const MAX_RESET_TTL_MINUTES: i64 = 24 * 60;

// CAPTCHA
const DEFAULT_CAPTCHA_TTL_SECS: i64 = 300;
const DEFAULT_CAPTCHA_LENGTH: usize = 5;
const MAX_CAPTCHA_TTL_SECS: i64 = 3600;

// Delay before the companion greets a first-time user, so the client has
// time to open its real-time connection.
const DEFAULT_ONBOARDING_DELAY_MS: u64 = 2000;

const DEFAULT_BCRYPT_COST: u32 = 10;
const DEFAULT_AI_TIMEOUT_SECS: u64 = 10;
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Name of the session cookie.
pub const SESSION_COOKIE_NAME: &str = "jwt";

// ============================================================================
// Configuration Structures
// ============================================================================

/// Deployment environment. Production turns on `Secure` cookies and hides
/// internal error details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "test" => Ok(Self::Development),
            _ => anyhow::bail!(
                "Invalid APP_ENV: {}. Must be 'production' or 'development'",
                s
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub enable_user_identifiers: bool,
    pub hash_salt: String,
}

/// Database connection pool configuration
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool (seconds)
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub session_ttl_days: i64,
    pub verification_ttl_hours: i64,
    pub reset_ttl_minutes: i64,
}

#[derive(Clone, Debug)]
pub struct CaptchaConfig {
    pub ttl_secs: i64,
    pub length: usize,
}

/// Generative backend for the companion account. With no API key the
/// companion answers from the rule-based fallback only.
#[derive(Clone, Debug)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

/// Transactional mail (Brevo). Both key and sender must be set, otherwise
/// mail is only logged.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub brevo_api_key: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: String,
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        self.brevo_api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
            && self.sender_email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// Shared challenge store. When unset CAPTCHA challenges live in process memory.
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub port: u16,
    pub environment: Environment,
    /// Base URL of the web client, used for links in emails.
    pub client_url: String,
    pub bcrypt_cost: u32,
    pub onboarding_delay_ms: u64,
    pub rust_log: String,
    pub tokens: TokenConfig,
    pub captcha: CaptchaConfig,
    pub ai: AiConfig,
    pub mail: MailConfig,
    pub db: DbConfig,
    pub logging: LoggingConfig,
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn ensure_range<T>(key: &str, value: T, range: RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if !range.contains(&value) {
        anyhow::bail!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        );
    }
    Ok(())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if let Err(e) = crate::utils::validate_secret_strength(&jwt_secret, 32) {
            anyhow::bail!(
                "JWT_SECRET is too weak: {}. Generate one with: openssl rand -base64 32",
                e
            );
        }

        let environment = match std::env::var("APP_ENV") {
            Ok(v) => v.parse()?,
            Err(_) => Environment::Development,
        };

        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env_optional("REDIS_URL"),
            jwt_secret,
            jwt_issuer: std::env::var("JWT_ISSUER")
                .unwrap_or_else(|_| "chatter-server".to_string()),
            port: env_parse("PORT", DEFAULT_PORT)?,
            environment,
            client_url: std::env::var("CLIENT_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            bcrypt_cost: env_parse("BCRYPT_COST", DEFAULT_BCRYPT_COST)?,
            onboarding_delay_ms: env_parse("ONBOARDING_DELAY_MS", DEFAULT_ONBOARDING_DELAY_MS)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            tokens: TokenConfig {
                session_ttl_days: env_parse("SESSION_TTL_DAYS", DEFAULT_SESSION_TTL_DAYS)?,
                verification_ttl_hours: env_parse(
                    "VERIFICATION_TTL_HOURS",
                    DEFAULT_VERIFICATION_TTL_HOURS,
                )?,
                reset_ttl_minutes: env_parse("RESET_TTL_MINUTES", DEFAULT_RESET_TTL_MINUTES)?,
            },
            captcha: CaptchaConfig {
                ttl_secs: env_parse("CAPTCHA_TTL_SECS", DEFAULT_CAPTCHA_TTL_SECS)?,
                length: env_parse("CAPTCHA_LENGTH", DEFAULT_CAPTCHA_LENGTH)?,
            },
            ai: AiConfig {
                api_key: env_optional("GEMINI_API_KEY"),
                model: std::env::var("GEMINI_MODEL")
                    .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
                endpoint: std::env::var("GEMINI_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_GEMINI_ENDPOINT.to_string()),
                timeout_secs: env_parse("AI_TIMEOUT_SECS", DEFAULT_AI_TIMEOUT_SECS)?,
            },
            mail: MailConfig {
                brevo_api_key: env_optional("BREVO_API_KEY"),
                sender_email: env_optional("BREVO_SENDER_EMAIL"),
                sender_name: std::env::var("BREVO_SENDER_NAME")
                    .unwrap_or_else(|_| "Chatter".to_string()),
            },
            db: DbConfig {
                max_connections: env_parse("DB_MAX_CONNECTIONS", 10)?,
                acquire_timeout_secs: env_parse("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            },
            logging: LoggingConfig {
                enable_user_identifiers: env_parse("LOG_USER_IDENTIFIERS", false)?,
                hash_salt: {
                    let salt = std::env::var("LOG_HASH_SALT")
                        .unwrap_or_else(|_| "default-salt-please-change".to_string());
                    if salt == "default-salt-please-change" && environment == Environment::Production {
                        tracing::warn!("LOG_HASH_SALT is not set; logged identifiers are weakly salted");
                    }
                    salt
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would panic or misbehave later (token expiry
    /// arithmetic, bcrypt, pool sizing).
    pub fn validate(&self) -> Result<()> {
        ensure_range("BCRYPT_COST", self.bcrypt_cost, 4..=31)?;
        ensure_range("SESSION_TTL_DAYS", self.tokens.session_ttl_days, 1..=MAX_SESSION_TTL_DAYS)?;
        ensure_range(
            "VERIFICATION_TTL_HOURS",
            self.tokens.verification_ttl_hours,
            1..=MAX_VERIFICATION_TTL_HOURS,
        )?;
        ensure_range(
            "RESET_TTL_MINUTES",
            self.tokens.reset_ttl_minutes,
            1..=MAX_RESET_TTL_MINUTES,
        )?;
        ensure_range("CAPTCHA_TTL_SECS", self.captcha.ttl_secs, 1..=MAX_CAPTCHA_TTL_SECS)?;
        ensure_range("CAPTCHA_LENGTH", self.captcha.length, 4..=12)?;
        ensure_range("AI_TIMEOUT_SECS", self.ai.timeout_secs, 1..=120)?;
        ensure_range("DB_MAX_CONNECTIONS", self.db.max_connections, 1..=1000)?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
