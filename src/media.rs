use base64::Engine;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Largest decoded avatar accepted inline.
pub const MAX_INLINE_AVATAR_BYTES: usize = 2 * 1024 * 1024;

const ALLOWED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
];

/// Placeholder avatar given to guests and the companion bot.
pub const DEFAULT_AVATAR: &str = "/avatar-demo.html";

/// Stores an uploaded avatar and returns the URL to record on the account.
#[async_trait::async_trait]
pub trait AvatarStore: Send + Sync {
    async fn store(&self, account_id: Uuid, payload: &str) -> AppResult<String>;
}

/// Keeps avatars inline: a validated `data:` URL is recorded as-is, and an
/// `https://` URL pointing at an already hosted image is passed through.
#[derive(Debug, Clone)]
pub struct InlineAvatarStore {
    max_bytes: usize,
}

impl Default for InlineAvatarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InlineAvatarStore {
    pub fn new() -> Self {
        Self {
            max_bytes: MAX_INLINE_AVATAR_BYTES,
        }
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    fn validate_data_url(&self, payload: &str) -> AppResult<()> {
        let rest = payload
            .strip_prefix("data:")
            .ok_or_else(|| AppError::validation("Profile pic must be an image"))?;
        let (mime, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| AppError::validation("Profile pic must be base64 encoded"))?;

        if !ALLOWED_IMAGE_TYPES.contains(&mime) {
            return Err(AppError::validation(format!(
                "Unsupported image type: {}",
                mime
            )));
        }

        // Decoded size is 3/4 of the encoded length; reject early before decoding
        if data.len() / 4 * 3 > self.max_bytes + 3 {
            return Err(AppError::validation("Profile pic is too large"));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|_| AppError::validation("Profile pic must be base64 encoded"))?;
        if bytes.len() > self.max_bytes {
            return Err(AppError::validation("Profile pic is too large"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AvatarStore for InlineAvatarStore {
    async fn store(&self, account_id: Uuid, payload: &str) -> AppResult<String> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(AppError::validation("Profile pic is required"));
        }

        if payload.starts_with("https://") {
            tracing::debug!(account_id = %account_id, "Avatar recorded as external URL");
            return Ok(payload.to_string());
        }

        self.validate_data_url(payload)?;
        tracing::debug!(
            account_id = %account_id,
            encoded_len = payload.len(),
            "Avatar stored inline"
        );
        Ok(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_data_url(len: usize) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(vec![7u8; len])
        )
    }

    #[tokio::test]
    async fn test_accepts_small_png() {
        let store = InlineAvatarStore::new();
        let url = png_data_url(64);
        assert_eq!(store.store(Uuid::new_v4(), &url).await.unwrap(), url);
    }

    #[tokio::test]
    async fn test_accepts_https_url() {
        let store = InlineAvatarStore::new();
        let url = "https://cdn.example.com/a.png";
        assert_eq!(store.store(Uuid::new_v4(), url).await.unwrap(), url);
    }

    #[tokio::test]
    async fn test_rejects_empty_oversized_and_foreign_payloads() {
        let store = InlineAvatarStore::with_max_bytes(100);
        let id = Uuid::new_v4();

        assert!(matches!(
            store.store(id, "  ").await,
            Err(AppError::Validation(msg)) if msg == "Profile pic is required"
        ));
        assert!(store.store(id, &png_data_url(500)).await.is_err());
        assert!(store
            .store(id, "data:text/html;base64,PGgxPg==")
            .await
            .is_err());
        assert!(store.store(id, "http://insecure.example.com/a.png").await.is_err());
        assert!(store
            .store(id, "data:image/png;base64,!!notbase64!!")
            .await
            .is_err());
    }
}
