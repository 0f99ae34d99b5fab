//! Core data types: sessions, turns, user preferences

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str_lossy(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "assistant" | "agent" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// A single message exchange unit within a session.
///
/// Turns are immutable once appended; compaction replaces whole
/// turn lists rather than editing individual turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True when this turn condenses older conversation history
    pub is_summary: bool,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_summary: false,
        }
    }

    /// Create a summary turn condensing prior history
    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            role: Role::System,
            content: content.into(),
            timestamp: Utc::now(),
            is_summary: true,
        }
    }
}

/// Per-session response shaping preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPreferences {
    #[serde(default = "default_response_style")]
    pub response_style: String,
    #[serde(default = "default_technical_level")]
    pub technical_level: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_response_style() -> String {
    "detailed".to_string()
}

fn default_technical_level() -> String {
    "intermediate".to_string()
}

fn default_language() -> String {
    "english".to_string()
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            response_style: default_response_style(),
            technical_level: default_technical_level(),
            language: default_language(),
        }
    }
}

/// A conversation identified by an opaque id, holding ordered turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
    pub preferences: Option<UserPreferences>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            turns: Vec::new(),
            preferences: None,
        }
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = Turn::new(Role::User, "What is Rust?");
        assert_eq!(turn.role, Role::User);
        assert!(!turn.is_summary);
        assert_eq!(turn.content, "What is Rust?");
    }

    #[test]
    fn test_summary_turn() {
        let turn = Turn::summary("Earlier the user asked about ownership.");
        assert!(turn.is_summary);
        assert_eq!(turn.role, Role::System);
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new();
        assert_eq!(session.turn_count(), 0);
        assert!(session.preferences.is_none());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_role_from_str_lossy() {
        assert_eq!(Role::from_str_lossy("agent"), Role::Assistant);
        assert_eq!(Role::from_str_lossy("SYSTEM"), Role::System);
        assert_eq!(Role::from_str_lossy("garbage"), Role::User);
    }

    #[test]
    fn test_preferences_defaults() {
        let prefs = UserPreferences::default();
        assert_eq!(prefs.response_style, "detailed");
        assert_eq!(prefs.technical_level, "intermediate");
        assert_eq!(prefs.language, "english");
    }

    #[test]
    fn test_preferences_partial_deserialization() {
        let prefs: UserPreferences =
            serde_json::from_str(r#"{"language": "spanish"}"#).unwrap();
        assert_eq!(prefs.language, "spanish");
        assert_eq!(prefs.response_style, "detailed");
    }
}
