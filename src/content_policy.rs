// ============================================================================
// Content Policy
// ============================================================================
//
// Screens user-chosen names (account name, full name) for:
// - Offensive language, including common character substitutions ("sh1t")
// - Impersonation of system accounts (the companion bot, admins, support)
//
// Screening is stateless and returns a structured verdict so callers can
// report every violation together with suggestions.
// ============================================================================

use crate::error::AppError;

const OFFENSIVE_WORDS: &[&str] = &[
    "fuck", "shit", "bitch", "cunt", "asshole", "bastard", "whore", "slut", "dickhead",
    "motherfucker", "wanker", "twat", "prick", "bollocks", "douche", "retard",
];

/// Short words only rejected as whole tokens, to avoid matching inside
/// harmless names ("Dickens", "Cassandra").
const OFFENSIVE_TOKENS: &[&str] = &["ass", "dick", "cock", "piss", "fag", "tit", "tits"];

const RESERVED_NAMES: &[&str] = &[
    "chatterbot", "chatter", "admin", "administrator", "moderator", "support", "system", "root",
];

pub const VIOLATION_OFFENSIVE: &str = "offensive_language";
pub const VIOLATION_RESERVED: &str = "reserved_name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub is_valid: bool,
    pub message: String,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
}

impl PolicyVerdict {
    fn clean() -> Self {
        Self {
            is_valid: true,
            message: String::new(),
            violations: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Converts a failed verdict into a 400 response body; `message` overrides
    /// the verdict's own message when given.
    pub fn into_error(self, message: Option<&str>, default_details: &str) -> AppError {
        let details = if self.suggestions.is_empty() {
            default_details.to_string()
        } else {
            self.suggestions.join(". ")
        };
        AppError::PolicyViolation {
            message: message.map(str::to_string).unwrap_or(self.message),
            details,
            violations: self.violations,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ContentPolicy;

impl ContentPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Screens an account name. Both offensive language and reserved
    /// system names are rejected.
    pub fn screen_name(&self, name: &str) -> PolicyVerdict {
        let mut verdict = self.screen_text(name);
        let normalized = normalize(name);
        let collapsed: String = normalized.chars().filter(|c| c.is_alphanumeric()).collect();

        if RESERVED_NAMES.iter().any(|reserved| collapsed == *reserved) {
            verdict.is_valid = false;
            verdict.violations.push(VIOLATION_RESERVED.to_string());
            verdict
                .suggestions
                .push("This name is reserved for system accounts".to_string());
            if verdict.message.is_empty() {
                verdict.message = "This name is not available".to_string();
            }
        }
        verdict
    }

    /// Screens free text (e.g. a full name) for offensive language only.
    pub fn screen_text(&self, text: &str) -> PolicyVerdict {
        let normalized = normalize(text);
        let collapsed: String = normalized.chars().filter(|c| c.is_alphanumeric()).collect();

        let has_word = OFFENSIVE_WORDS.iter().any(|w| collapsed.contains(w));
        let has_token = normalized
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| OFFENSIVE_TOKENS.contains(&token));

        if !(has_word || has_token) {
            return PolicyVerdict::clean();
        }

        PolicyVerdict {
            is_valid: false,
            message: "Name contains inappropriate language".to_string(),
            violations: vec![VIOLATION_OFFENSIVE.to_string()],
            suggestions: vec![
                "Please avoid offensive or inappropriate words".to_string(),
                "Try using your real name or a friendly nickname".to_string(),
            ],
        }
    }
}

/// Lowercases and undoes common look-alike substitutions.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            '0' => 'o',
            '1' | '!' => 'i',
            '3' => 'e',
            '4' | '@' => 'a',
            '5' | '$' => 's',
            '7' => 't',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_names_pass() {
        let policy = ContentPolicy::new();
        for name in ["bob", "Alice Smith", "Charles Dickens", "cassandra_99", "Dana Scully"] {
            assert!(policy.screen_name(name).is_valid, "{} should pass", name);
        }
    }

    #[test]
    fn test_offensive_words_rejected_through_substitutions() {
        let policy = ContentPolicy::new();
        for name in ["sh1t_lord", "F.U.C.K", "big $lut", "you ass"] {
            let verdict = policy.screen_name(name);
            assert!(!verdict.is_valid, "{} should be rejected", name);
            assert_eq!(verdict.violations, vec![VIOLATION_OFFENSIVE.to_string()]);
            assert!(!verdict.suggestions.is_empty());
        }
    }

    #[test]
    fn test_reserved_names_rejected_only_for_account_names() {
        let policy = ContentPolicy::new();
        let verdict = policy.screen_name("Chatter_Bot");
        assert!(!verdict.is_valid);
        assert_eq!(verdict.violations, vec![VIOLATION_RESERVED.to_string()]);

        assert!(policy.screen_text("Admin").is_valid);
        assert!(policy.screen_name("admin_fan_club").is_valid);
    }

    #[test]
    fn test_verdict_converts_to_policy_error() {
        let policy = ContentPolicy::new();
        let err = policy
            .screen_text("shithead")
            .into_error(Some("Full name contains inappropriate language"), "unused");
        match err {
            AppError::PolicyViolation {
                message,
                details,
                violations,
            } => {
                assert_eq!(message, "Full name contains inappropriate language");
                assert!(details.contains("offensive"));
                assert_eq!(violations, vec![VIOLATION_OFFENSIVE.to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
