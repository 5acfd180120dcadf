use axum::http::{HeaderMap, HeaderValue, header::COOKIE};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::config::{LoggingConfig, SESSION_COOKIE_NAME};

/// Creates a truncated, salted hash of an identifier for safe logging.
///
/// # Arguments
/// * `id` - The identifier to hash (e.g., account name, account id).
/// * `salt` - A salt value from the application's configuration.
///
/// # Returns
/// A short, hexadecimal string representing the salted hash.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hex::encode(&hash[..4])
}

/// Identifier as it should appear in logs: verbatim only when
/// `LOG_USER_IDENTIFIERS` is enabled, otherwise a salted hash.
pub fn loggable_id(id: &str, logging: &LoggingConfig) -> String {
    if logging.enable_user_identifiers {
        id.to_string()
    } else {
        log_safe_id(id, &logging.hash_salt)
    }
}

/// Validates secret key strength by checking entropy and patterns.
///
/// Checks for:
/// - Minimum length (must be at least min_length)
/// - Not all the same character (e.g., "aaaaa...")
/// - Not a simple repeating pattern (e.g., "abcdabcd...")
/// - At least some character diversity
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), String> {
    if secret.len() < min_length {
        return Err(format!(
            "Secret must be at least {} characters long",
            min_length
        ));
    }

    if let Some(first) = secret.chars().next() {
        if secret.chars().all(|c| c == first) {
            return Err("Secret must not consist of a single repeated character".to_string());
        }
    }

    if secret.len() >= 4 && secret.is_ascii() {
        for pattern_len in 2..=(secret.len() / 2).min(8) {
            let pattern = &secret[..pattern_len];
            let repeated = pattern.repeat(secret.len() / pattern_len);
            if secret.starts_with(&repeated) {
                return Err("Secret must not contain simple repeating patterns".to_string());
            }
        }
    }

    if secret.len() >= 32 {
        let unique_chars: HashSet<char> = secret.chars().collect();
        if unique_chars.len() < 8 {
            return Err("Secret must contain at least 8 different characters".to_string());
        }
    }

    Ok(())
}

/// Adds standard security headers to an HTTP response.
///
/// HSTS is only sent when the request arrived over HTTPS.
pub fn add_security_headers(headers: &mut HeaderMap, is_https: bool) {
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'self'; script-src 'none'; object-src 'none';"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("geolocation=(), microphone=(), camera=(), payment=()"),
    );

    if is_https {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
}

/// Random credential for accounts nobody logs into with a password
/// (guests, the companion bot). Only its hash is ever stored.
pub fn generate_account_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the `Set-Cookie` value carrying a session token.
///
/// The cookie is http-only and same-site lax; `secure` is set for public
/// deployments.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE_NAME, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Builds the `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

/// Reads a cookie value from the `Cookie` request header(s).
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_safe_id_is_stable_and_short() {
        let a = log_safe_id("account-1", "salt");
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(a, log_safe_id("account-1", "salt"));
        assert_ne!(a, log_safe_id("account-1", "other-salt"));
    }

    #[test]
    fn test_loggable_id_hashes_by_default() {
        let mut logging = LoggingConfig {
            enable_user_identifiers: false,
            hash_salt: "salt".to_string(),
        };
        assert_eq!(loggable_id("bob", &logging), log_safe_id("bob", "salt"));
        logging.enable_user_identifiers = true;
        assert_eq!(loggable_id("bob", &logging), "bob");
    }

    #[test]
    fn test_secret_all_same_char() {
        assert!(validate_secret_strength(&"a".repeat(40), 32).is_err());
    }

    #[test]
    fn test_secret_repeating_pattern() {
        assert!(validate_secret_strength(&"abcd".repeat(10), 32).is_err());
    }

    #[test]
    fn test_secret_too_short() {
        assert!(validate_secret_strength("Kx9#mP2$", 32).is_err());
    }

    #[test]
    fn test_secret_valid() {
        assert!(validate_secret_strength("q8Vn3LzR1wXe5TyU7iOp0aSdF2gHjKlM", 32).is_ok());
    }

    #[test]
    fn test_account_secrets_are_random() {
        let a = generate_account_secret();
        assert_eq!(a.len(), 43);
        assert_ne!(a, generate_account_secret());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("abc", 60, false);
        assert!(cookie.starts_with("jwt=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));
        assert!(clear_session_cookie(true).contains("Max-Age=0; Secure"));
    }

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; jwt=tok123"));
        assert_eq!(cookie_value(&headers, "jwt").as_deref(), Some("tok123"));
        assert_eq!(cookie_value(&headers, "missing"), None);

        let mut cleared = HeaderMap::new();
        cleared.insert(COOKIE, HeaderValue::from_static("jwt="));
        assert_eq!(cookie_value(&cleared, "jwt"), None);
    }
}
