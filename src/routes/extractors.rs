// ============================================================================
// Axum Extractors
// ============================================================================
//
// - AuthenticatedAccount: validates the session token carried by the `jwt`
//   cookie or, for non-browser clients, an `Authorization: Bearer` header
//
// ============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SESSION_COOKIE_NAME;
use crate::context::AppContext;
use crate::error::AppError;
use crate::utils::cookie_value;

/// Account id of the session holder.
///
/// Usage:
/// ```rust,ignore
/// async fn handler(account: AuthenticatedAccount) -> Result<...> {
///     let account_id = account.0;
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedAccount(pub Uuid);

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthenticatedAccount {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Unauthorized - No token provided".to_string()))?;

        let account_id = state.tokens.verify_session(&token).map_err(|e| {
            tracing::debug!(error = %e, "Session token rejected");
            AppError::Unauthorized("Unauthorized - Invalid token".to_string())
        })?;

        Ok(AuthenticatedAccount(account_id))
    }
}

/// Cookie first, then bearer header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE_NAME).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header::COOKIE};

    #[test]
    fn test_cookie_takes_precedence_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; jwt=from-cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_bearer_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(session_token(&headers).is_none());
    }
}
