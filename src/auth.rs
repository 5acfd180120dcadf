use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// What a token may be used for. A token is only ever accepted for the
/// purpose it was issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Session,
    EmailVerification,
    PasswordReset,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // account id
    pub jti: String, // unique per token
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub purpose: TokenPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Claims {
    pub fn account_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::InvalidToken)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies the signed tokens used for sessions, email
/// verification and password reset (HS256).
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    session_ttl: Duration,
    verification_ttl: Duration,
    reset_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &Config) -> Result<Self> {
        if config.jwt_secret.trim().is_empty() {
            anyhow::bail!("No JWT configuration provided. Set JWT_SECRET");
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            session_ttl: Duration::days(config.tokens.session_ttl_days),
            verification_ttl: Duration::hours(config.tokens.verification_ttl_hours),
            reset_ttl: Duration::minutes(config.tokens.reset_ttl_minutes),
        })
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn issue_session(&self, account_id: &Uuid) -> Result<IssuedToken> {
        self.issue(account_id, TokenPurpose::Session, None, self.session_ttl)
    }

    pub fn issue_verification(&self, account_id: &Uuid, email: &str) -> Result<IssuedToken> {
        self.issue(
            account_id,
            TokenPurpose::EmailVerification,
            Some(email),
            self.verification_ttl,
        )
    }

    /// The returned token must also be mirrored on the account record; see
    /// [`crate::db::AccountStore::set_reset_mirror`].
    pub fn issue_reset(&self, account_id: &Uuid, email: &str) -> Result<IssuedToken> {
        self.issue(
            account_id,
            TokenPurpose::PasswordReset,
            Some(email),
            self.reset_ttl,
        )
    }

    fn issue(
        &self,
        account_id: &Uuid,
        purpose: TokenPurpose,
        email: Option<&str>,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let exp = now + ttl;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: account_id.to_string(),
            jti: jti.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            purpose,
            email: email.map(str::to_string),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("Failed to encode JWT token")?;

        // Round down to whole seconds so the stored expiry matches `exp`
        let expires_at = Utc
            .timestamp_opt(exp.timestamp(), 0)
            .single()
            .unwrap_or(exp);

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Verifies signature, expiry, issuer and purpose. Every failure maps to
    /// [`AppError::InvalidToken`].
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Token verification failed");
                return Err(AppError::InvalidToken);
            }
        };

        if claims.purpose != purpose {
            tracing::debug!(
                expected = ?purpose,
                actual = ?claims.purpose,
                "Token presented for the wrong purpose"
            );
            return Err(AppError::InvalidToken);
        }

        Ok(claims)
    }

    pub fn verify_session(&self, token: &str) -> AppResult<Uuid> {
        self.verify(token, TokenPurpose::Session)?.account_id()
    }

    #[cfg(test)]
    fn issue_with_ttl(
        &self,
        account_id: &Uuid,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<IssuedToken> {
        self.issue(account_id, purpose, None, ttl)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{
        AiConfig, CaptchaConfig, DbConfig, Environment, LoggingConfig, MailConfig, TokenConfig,
    };

    pub(crate) fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/chatter_test".to_string(),
            redis_url: None,
            jwt_secret: "q8Vn3LzR1wXe5TyU7iOp0aSdF2gHjKlM".to_string(),
            jwt_issuer: "chatter-server".to_string(),
            port: 0,
            environment: Environment::Development,
            client_url: "http://localhost:5173".to_string(),
            bcrypt_cost: 4,
            onboarding_delay_ms: 0,
            rust_log: "debug".to_string(),
            tokens: TokenConfig {
                session_ttl_days: 7,
                verification_ttl_hours: 24,
                reset_ttl_minutes: 60,
            },
            captcha: CaptchaConfig {
                ttl_secs: 300,
                length: 5,
            },
            ai: AiConfig {
                api_key: None,
                model: "gemini-1.5-flash".to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                timeout_secs: 1,
            },
            mail: MailConfig {
                brevo_api_key: None,
                sender_email: None,
                sender_name: "Chatter".to_string(),
            },
            db: DbConfig {
                max_connections: 1,
                acquire_timeout_secs: 1,
            },
            logging: LoggingConfig {
                enable_user_identifiers: false,
                hash_salt: "test-salt".to_string(),
            },
        }
    }

    #[test]
    fn test_session_token_round_trip() {
        let tokens = TokenService::new(&test_config()).unwrap();
        let id = Uuid::new_v4();
        let issued = tokens.issue_session(&id).unwrap();
        assert_eq!(tokens.verify_session(&issued.token).unwrap(), id);
        assert!(issued.expires_at > Utc::now() + Duration::days(6));
    }

    #[test]
    fn test_verification_token_carries_email() {
        let tokens = TokenService::new(&test_config()).unwrap();
        let id = Uuid::new_v4();
        let issued = tokens.issue_verification(&id, "amy@x.com").unwrap();
        let claims = tokens
            .verify(&issued.token, TokenPurpose::EmailVerification)
            .unwrap();
        assert_eq!(claims.account_id().unwrap(), id);
        assert_eq!(claims.email.as_deref(), Some("amy@x.com"));
    }

    #[test]
    fn test_token_rejected_for_other_purpose() {
        let tokens = TokenService::new(&test_config()).unwrap();
        let id = Uuid::new_v4();
        let reset = tokens.issue_reset(&id, "amy@x.com").unwrap();
        assert!(matches!(
            tokens.verify_session(&reset.token),
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            tokens.verify(&reset.token, TokenPurpose::EmailVerification),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = TokenService::new(&test_config()).unwrap();
        let issued = tokens
            .issue_with_ttl(&Uuid::new_v4(), TokenPurpose::Session, Duration::seconds(-120))
            .unwrap();
        assert!(matches!(
            tokens.verify_session(&issued.token),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let tokens = TokenService::new(&test_config()).unwrap();
        let mut other_config = test_config();
        other_config.jwt_secret = "Zx7Cv6Bn5Mq4Wr3Et2Yu1Io0PaSdFgHj".to_string();
        let other = TokenService::new(&other_config).unwrap();

        let issued = other.issue_session(&Uuid::new_v4()).unwrap();
        assert!(matches!(
            tokens.verify_session(&issued.token),
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            tokens.verify_session("not-a-token"),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_each_token_has_unique_jti() {
        let tokens = TokenService::new(&test_config()).unwrap();
        let id = Uuid::new_v4();
        let a = tokens.issue_reset(&id, "a@x.com").unwrap();
        let b = tokens.issue_reset(&id, "a@x.com").unwrap();
        assert_ne!(a.jti, b.jti);
        assert_ne!(a.token, b.token);
    }
}
