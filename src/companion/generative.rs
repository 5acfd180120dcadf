use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::config::AiConfig;

/// Number of most recent history turns included in a prompt.
pub const HISTORY_TURNS: usize = 3;

/// One turn of client-supplied conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

const PERSONA_PREAMBLE: &str = "You are ChatterBot, a helpful AI assistant in the Chatter messaging platform. You understand the platform well.

## About Chatter

**Platform Features:**
- Real-time messaging
- Smart notifications that respect active conversations
- AI chatbot integration (that's you!)
- Guest login for easy testing
- Friend system with requests
- Email verification and password recovery
- CAPTCHA security protection
- Profile customization with avatars

**Your role:**
- Help users understand Chatter's features
- Answer questions about the platform
- Provide technical insights when asked
- Be friendly and helpful in conversations

Keep responses natural and conversational (under 150 words). Be helpful without being overly promotional.";

/// Builds the prompt: recent history, the persona preamble, then the user's message.
pub fn build_prompt(user_message: &str, history: &[HistoryTurn]) -> String {
    let start = history.len().saturating_sub(HISTORY_TURNS);
    let context = if history.is_empty() {
        String::new()
    } else {
        let turns = history[start..]
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Previous conversation context: {}\n\n", turns)
    };

    format!(
        "{}{}\n\nUser message: \"{}\"\n\nResponse:",
        context, PERSONA_PREAMBLE, user_message
    )
}

/// A text generation capability. One call is one attempt; callers decide
/// what to do on failure.
#[async_trait::async_trait]
pub trait ReplyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Google Gemini `generateContent` over HTTPS.
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiBackend {
    /// Returns `None` when no API key is configured.
    pub fn from_config(config: &AiConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Gemini")?;
        Ok(Some(Self {
            http,
            api_key,
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

fn extract_text(response: GenerateResponse) -> Result<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("Gemini returned no text");
    }
    Ok(text.to_string())
}

#[async_trait::async_trait]
impl ReplyBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini returned status {}: {}", status.as_u16(), body);
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse Gemini response")?;
        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> HistoryTurn {
        HistoryTurn {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_prompt_keeps_last_three_turns() {
        let history = vec![
            turn("user", "one"),
            turn("assistant", "two"),
            turn("user", "three"),
            turn("assistant", "four"),
        ];
        let prompt = build_prompt("five", &history);
        assert!(prompt.starts_with("Previous conversation context: assistant: two\nuser: three\nassistant: four"));
        assert!(!prompt.contains("user: one"));
        assert!(prompt.contains("under 150 words"));
        assert!(prompt.ends_with("User message: \"five\"\n\nResponse:"));
    }

    #[test]
    fn test_prompt_without_history() {
        let prompt = build_prompt("hi", &[]);
        assert!(prompt.starts_with("You are ChatterBot"));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let parsed: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "there" }] } }]
        }))
        .unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "Hello there");

        let empty: GenerateResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(extract_text(empty).is_err());
    }

    #[test]
    fn test_backend_absent_without_key() {
        let config = AiConfig {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            endpoint: "https://example.invalid".to_string(),
            timeout_secs: 1,
        };
        assert!(GeminiBackend::from_config(&config).unwrap().is_none());
    }
}
