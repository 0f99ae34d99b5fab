//! Chat agent facade
//!
//! Composes a session's bounded history with a new user message into a
//! prompt, calls the Gemini API, and records both sides of the exchange.
//! Turns are only persisted after a successful upstream call, so a failed
//! request leaves the session history unchanged.

use crate::gemini::GeminiClient;
use crate::memory::{HistoryManager, SessionStore};
use crate::models::{Role, Turn, UserPreferences};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Response from a chat exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub source: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,
}

pub struct ChatAgent {
    store: Arc<SessionStore>,
    history: Arc<HistoryManager>,
    gemini: Arc<GeminiClient>,
}

impl ChatAgent {
    pub fn new(
        store: Arc<SessionStore>,
        history: Arc<HistoryManager>,
        gemini: Arc<GeminiClient>,
    ) -> Self {
        Self {
            store,
            history,
            gemini,
        }
    }

    /// Answer a user message within a session.
    ///
    /// Fails with `SessionNotFound` for unknown sessions and `Upstream`
    /// when the LLM API stays unreachable or rate-limited after retries.
    pub async fn respond(&self, session_id: Uuid, message: &str) -> crate::Result<ChatReply> {
        let session = self.store.get(session_id).await?;
        let context = self.history.get_context(session_id).await?;
        let context_turns = context.len();

        let prompt = build_prompt(&context, message);
        let system_prompt = build_system_prompt(session.preferences.as_ref());

        let (answer, confidence) = self.gemini.generate(&prompt, &system_prompt).await?;

        info!(
            "Chat response for session {} (confidence: {})",
            session_id, confidence
        );

        self.history
            .append(session_id, Turn::new(Role::User, message))
            .await?;
        self.history
            .append(session_id, Turn::new(Role::Assistant, answer.clone()))
            .await?;

        Ok(ChatReply {
            answer,
            source: "Gemini API".to_string(),
            confidence,
            context_used: if context_turns > 0 {
                Some(format!("{} previous turns included", context_turns))
            } else {
                None
            },
        })
    }
}

/// Build the user-facing prompt from bounded history plus the new message
fn build_prompt(context: &[Turn], message: &str) -> String {
    let mut prompt = String::new();

    if !context.is_empty() {
        prompt.push_str("Based on our conversation history:\n\n");
        for turn in context {
            let label = if turn.is_summary {
                "Summary of earlier conversation"
            } else {
                match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => "System",
                }
            };
            prompt.push_str(&format!("- {}: {}\n", label, turn.content));
        }
        prompt.push_str("\n---\n\n");
    }

    prompt.push_str("Answer this message: ");
    prompt.push_str(message);
    prompt
}

/// Build the system prompt, shaped by the session's preferences
fn build_system_prompt(preferences: Option<&UserPreferences>) -> String {
    let base_prompt = r#"You are a knowledgeable, professional, and friendly assistant.

Guidelines:
- Provide accurate, practical responses
- Maintain context across the conversation
- Admit when you are uncertain about information
- Keep responses appropriate and helpful"#;

    let default_prefs = UserPreferences::default();
    let prefs = preferences.unwrap_or(&default_prefs);

    format!(
        "{}\n\nUser preferences:\n- Response style: {}\n- Technical level: {}\n- Language: {}",
        base_prompt, prefs.response_style, prefs.technical_level, prefs.language
    )
}
