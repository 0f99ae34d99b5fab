//! Conversation summarization
//!
//! Condenses old turns into a single summary turn via the Gemini API
//! when a session's history exceeds its bound. No fidelity guarantee.

use crate::error::ChatError;
use crate::gemini::GeminiClient;
use crate::models::{Role, Turn};
use std::sync::Arc;
use tracing::info;

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert conversation summarizer. \
You condense chat transcripts into concise, factual summaries that preserve \
the context needed to continue the conversation.";

/// Condenses a span of turns into a single summary turn
#[async_trait::async_trait]
pub trait TurnSummarizer: Send + Sync {
    async fn summarize_turns(&self, turns: &[Turn]) -> crate::Result<Turn>;
}

/// Summarizes conversation turns using the Gemini API
pub struct Summarizer {
    gemini: Arc<GeminiClient>,
}

impl Summarizer {
    pub fn new(gemini: Arc<GeminiClient>) -> Self {
        Self { gemini }
    }
}

#[async_trait::async_trait]
impl TurnSummarizer for Summarizer {
    async fn summarize_turns(&self, turns: &[Turn]) -> crate::Result<Turn> {
        if turns.is_empty() {
            return Err(ChatError::InvalidRequest(
                "Cannot summarize an empty turn list".to_string(),
            ));
        }

        let transcript = format_turns_for_summary(turns);

        let prompt = format!(
            r#"Create a concise summary of the following conversation.
Focus on:
1. Topics the user asked about
2. Key answers and conclusions
3. Any preferences or constraints the user stated

Keep the summary to a short paragraph or a few bullet points.

CONVERSATION:
---
{}
---

SUMMARY:"#,
            transcript
        );

        info!("Calling Gemini API to summarize {} turns", turns.len());

        let (summary_text, _confidence) =
            self.gemini.generate(&prompt, SUMMARY_SYSTEM_PROMPT).await?;

        info!("Summarized {} turns into one summary turn", turns.len());

        Ok(Turn::summary(summary_text))
    }
}

/// Format turns into readable transcript text for summarization
fn format_turns_for_summary(turns: &[Turn]) -> String {
    let mut text = String::new();

    for turn in turns {
        let role_str = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };

        text.push_str(&format!("{}: {}\n", role_str, turn.content));
    }

    text
}
