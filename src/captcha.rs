//! CAPTCHA challenges.
//!
//! A challenge is a short random string rendered as an SVG image and keyed by
//! an opaque session id. Challenges expire after a fixed TTL and are consumed
//! at most once. Expired entries are swept whenever a new challenge is
//! issued, not on a timer.
//!
//! [`MemoryChallengeStore`] is process-local: challenges do not survive a
//! restart and are not visible to other instances. Multi-instance deployments
//! must set `REDIS_URL` so [`RedisChallengeStore`] is used instead.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;

use crate::config::CaptchaConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;

/// Letters and digits with the visually ambiguous ones (0/O, 1/l/I) removed.
const CAPTCHA_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";

const SESSION_ID_BYTES: usize = 16;
const REDIS_KEY_PREFIX: &str = "captcha:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub session_id: String,
    pub text: String,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait::async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put(&self, challenge: Challenge) -> Result<()>;

    /// Returns the challenge if present and unexpired at `now`.
    async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Challenge>>;

    /// Removes the challenge and returns it if it was still unexpired at `now`.
    async fn take(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Challenge>>;

    /// Drops every challenge expired at `now`; returns how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize>;
}

#[derive(Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Challenge>>> {
        self.challenges
            .lock()
            .map_err(|_| anyhow::anyhow!("captcha store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(&self, challenge: Challenge) -> Result<()> {
        self.lock()?.insert(challenge.session_id.clone(), challenge);
        Ok(())
    }

    async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        Ok(self
            .lock()?
            .get(session_id)
            .filter(|c| !c.is_expired(now))
            .cloned())
    }

    async fn take(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        Ok(self
            .lock()?
            .remove(session_id)
            .filter(|c| !c.is_expired(now)))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut challenges = self.lock()?;
        let before = challenges.len();
        challenges.retain(|_, c| !c.is_expired(now));
        Ok(before - challenges.len())
    }
}

/// Shared challenge store for horizontally scaled deployments. Redis key
/// expiry replaces the sweep.
pub struct RedisChallengeStore {
    client: redis::aio::ConnectionManager,
}

impl RedisChallengeStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        if redis_url.starts_with("rediss://") {
            tracing::info!("Redis TLS enabled (rediss://)");
        }
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow::anyhow!("Failed to parse Redis URL: {}", e))?;
        let client = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {}", e))?;
        Ok(Self { client })
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", REDIS_KEY_PREFIX, session_id)
    }

    fn decode(raw: Option<String>, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        match raw {
            Some(json) => {
                let challenge: Challenge =
                    serde_json::from_str(&json).context("Corrupt captcha entry in Redis")?;
                Ok(Some(challenge).filter(|c| !c.is_expired(now)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn put(&self, challenge: Challenge) -> Result<()> {
        use redis::AsyncCommands;

        let ttl = (challenge.expires_at - Utc::now()).num_seconds().max(1) as u64;
        let json = serde_json::to_string(&challenge)?;
        let mut conn = self.client.clone();
        let _: () = conn
            .set_ex(Self::key(&challenge.session_id), json, ttl)
            .await?;
        Ok(())
    }

    async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        use redis::AsyncCommands;

        let mut conn = self.client.clone();
        let raw: Option<String> = conn.get(Self::key(session_id)).await?;
        Self::decode(raw, now)
    }

    async fn take(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        let mut conn = self.client.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(Self::key(session_id))
            .query_async(&mut conn)
            .await?;
        Self::decode(raw, now)
    }

    async fn sweep(&self, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedChallenge {
    pub session_id: String,
    pub captcha_image: String,
}

pub struct CaptchaService {
    store: Arc<dyn ChallengeStore>,
    ttl: Duration,
    length: usize,
}

impl CaptchaService {
    pub fn new(store: Arc<dyn ChallengeStore>, config: &CaptchaConfig) -> Self {
        Self {
            store,
            ttl: Duration::seconds(config.ttl_secs),
            length: config.length.max(1),
        }
    }

    pub async fn issue(&self) -> AppResult<IssuedChallenge> {
        self.issue_at(Utc::now()).await
    }

    /// Sweeps expired challenges, then stores a fresh one expiring at `now + ttl`.
    pub async fn issue_at(&self, now: DateTime<Utc>) -> AppResult<IssuedChallenge> {
        let swept = self.store.sweep(now).await.map_err(unavailable)?;
        if swept > 0 {
            tracing::debug!(swept = swept, "Swept expired captcha challenges");
        }

        let (session_id, text) = {
            let mut rng = rand::thread_rng();
            (random_session_id(&mut rng), random_text(&mut rng, self.length))
        };
        let captcha_image = render_svg_data_url(&text);

        self.store
            .put(Challenge {
                session_id: session_id.clone(),
                text,
                expires_at: now + self.ttl,
            })
            .await
            .map_err(unavailable)?;

        metrics::CAPTCHA_CHALLENGES_ISSUED.inc();
        Ok(IssuedChallenge {
            session_id,
            captcha_image,
        })
    }

    /// Returns the expected answer without consuming the challenge.
    pub async fn peek(&self, session_id: &str) -> AppResult<Option<String>> {
        self.peek_at(session_id, Utc::now()).await
    }

    pub async fn peek_at(&self, session_id: &str, now: DateTime<Utc>) -> AppResult<Option<String>> {
        Ok(self
            .store
            .get(session_id, now)
            .await
            .map_err(unavailable)?
            .map(|c| c.text))
    }

    /// Consumes the challenge and checks the answer. A challenge can be
    /// verified at most once, whether or not the answer was right.
    pub async fn verify(&self, session_id: &str, answer: &str) -> AppResult<bool> {
        self.verify_at(session_id, answer, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        session_id: &str,
        answer: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let Some(challenge) = self
            .store
            .take(session_id, now)
            .await
            .map_err(unavailable)?
        else {
            return Ok(false);
        };
        Ok(bool::from(challenge.text.as_bytes().ct_eq(answer.trim().as_bytes())))
    }
}

fn unavailable(err: anyhow::Error) -> AppError {
    AppError::ServiceUnavailable(format!("captcha store: {:#}", err))
}

fn random_session_id<R: Rng>(rng: &mut R) -> String {
    let bytes: [u8; SESSION_ID_BYTES] = rng.gen();
    hex::encode(bytes)
}

fn random_text<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| CAPTCHA_ALPHABET[rng.gen_range(0..CAPTCHA_ALPHABET.len())] as char)
        .collect()
}

/// Renders the text as a noisy SVG and returns it as a base64 data URL.
fn render_svg_data_url(text: &str) -> String {
    let mut rng = rand::thread_rng();
    let width = 30 * text.len() + 30;
    let height = 50;

    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="100%" height="100%" fill="#f0f0f0"/>"##,
        w = width,
        h = height
    );
    for _ in 0..4 {
        svg.push_str(&format!(
            r##"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="#{:06x}" stroke-width="1"/>"##,
            rng.gen_range(0..width),
            rng.gen_range(0..height),
            rng.gen_range(0..width),
            rng.gen_range(0..height),
            rng.gen_range(0..0xaaaaaau32),
        ));
    }
    for (i, ch) in text.chars().enumerate() {
        let x = 20 + i * 30;
        let y = rng.gen_range(30..40);
        let rotate: i32 = rng.gen_range(-20..=20);
        svg.push_str(&format!(
            r##"<text x="{x}" y="{y}" font-family="monospace" font-size="28" fill="#{color:06x}" transform="rotate({rotate} {x} {y})">{ch}</text>"##,
            x = x,
            y = y,
            color = rng.gen_range(0..0x777777u32),
            rotate = rotate,
            ch = ch,
        ));
    }
    svg.push_str("</svg>");

    format!(
        "data:image/svg+xml;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(svg)
    )
}
