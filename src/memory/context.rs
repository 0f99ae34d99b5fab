//! Bounded conversation history
//!
//! The history manager appends turns through the session store and keeps
//! each session's history within a configured bound: once the turn count
//! exceeds `max_turns`, everything but the most recent turns is condensed
//! into a single summary turn via an extra LLM call. Summarization is
//! best-effort; when it fails the history is left untouched and retried
//! on the next append.

use crate::memory::store::SessionStore;
use crate::memory::summarizer::TurnSummarizer;
use crate::models::Turn;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Bounds for per-session conversation history
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Turn count that triggers compaction when exceeded
    pub max_turns: usize,
    /// Number of most recent turns preserved verbatim through compaction
    pub keep_recent: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            keep_recent: 6,
        }
    }
}

impl HistoryConfig {
    /// Read bounds from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_turns = env::var("HISTORY_MAX_TURNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_turns);
        let keep_recent = env::var("HISTORY_KEEP_RECENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.keep_recent);

        // keep_recent must leave room for the summary turn
        if keep_recent >= max_turns {
            warn!(
                "HISTORY_KEEP_RECENT ({}) >= HISTORY_MAX_TURNS ({}), using defaults",
                keep_recent, max_turns
            );
            return defaults;
        }

        Self {
            max_turns,
            keep_recent,
        }
    }
}

/// Split turns for compaction: everything except the latest `keep_recent`
/// turns (any earlier summary included) goes into the to-summarize half.
pub fn plan_compaction(turns: &[Turn], keep_recent: usize) -> (Vec<Turn>, Vec<Turn>) {
    if turns.len() <= keep_recent {
        return (Vec::new(), turns.to_vec());
    }

    let split_at = turns.len() - keep_recent;
    let (old, recent) = turns.split_at(split_at);
    (old.to_vec(), recent.to_vec())
}

/// Manages bounded conversation history with summarization-on-overflow
pub struct HistoryManager {
    store: Arc<SessionStore>,
    summarizer: Arc<dyn TurnSummarizer>,
    config: HistoryConfig,
}

impl HistoryManager {
    pub fn new(
        store: Arc<SessionStore>,
        summarizer: Arc<dyn TurnSummarizer>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    fn needs_compaction(&self, turn_count: usize) -> bool {
        turn_count > self.config.max_turns
    }

    /// Append a turn, compacting the history when it exceeds the bound
    pub async fn append(&self, session_id: Uuid, turn: Turn) -> crate::Result<()> {
        self.store.append_turn(session_id, &turn).await?;

        let session = self.store.get(session_id).await?;
        if self.needs_compaction(session.turn_count()) {
            self.compact(session_id, &session.turns).await;
        }

        Ok(())
    }

    /// Bounded context for prompting: at most `max_turns` turns, in order
    pub async fn get_context(&self, session_id: Uuid) -> crate::Result<Vec<Turn>> {
        let session = self.store.get(session_id).await?;
        let mut turns = session.turns;

        // Normally compaction keeps us under the bound; this only trims
        // when summarization has been failing.
        if turns.len() > self.config.max_turns {
            let excess = turns.len() - self.config.max_turns;
            turns.drain(..excess);
        }

        Ok(turns)
    }

    /// Condense old turns into a single summary turn. Best-effort:
    /// failures are logged and the history is left as-is.
    async fn compact(&self, session_id: Uuid, turns: &[Turn]) {
        let (old, recent) = plan_compaction(turns, self.config.keep_recent);
        if old.is_empty() {
            return;
        }

        info!(
            "History for session {} at {} turns, summarizing {} old turns",
            session_id,
            turns.len(),
            old.len()
        );

        let summary = match self.summarizer.summarize_turns(&old).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(
                    "Failed to summarize history for session {}, keeping full history: {}",
                    session_id, e
                );
                return;
            }
        };

        let mut compacted = Vec::with_capacity(recent.len() + 1);
        compacted.push(summary);
        compacted.extend(recent);

        if let Err(e) = self.store.replace_turns(session_id, &compacted).await {
            warn!(
                "Failed to persist compacted history for session {}: {}",
                session_id, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, Turn};

    fn turns(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| Turn::new(Role::User, format!("turn {}", i)))
            .collect()
    }

    #[test]
    fn test_plan_compaction_splits_old_from_recent() {
        let all = turns(10);
        let (old, recent) = plan_compaction(&all, 4);

        assert_eq!(old.len(), 6);
        assert_eq!(recent.len(), 4);
        assert_eq!(old[0].content, "turn 0");
        assert_eq!(recent[0].content, "turn 6");
        assert_eq!(recent[3].content, "turn 9");
    }

    #[test]
    fn test_plan_compaction_under_threshold_keeps_all() {
        let all = turns(3);
        let (old, recent) = plan_compaction(&all, 4);
        assert!(old.is_empty());
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn test_plan_compaction_includes_previous_summary() {
        let mut all = vec![Turn::summary("earlier context")];
        all.extend(turns(8));

        let (old, recent) = plan_compaction(&all, 4);
        // The old summary is folded into the next one, keeping exactly
        // one summary turn alive at a time.
        assert!(old[0].is_summary);
        assert_eq!(old.len(), 5);
        assert_eq!(recent.len(), 4);
    }

    #[test]
    fn test_compacted_shape_is_summary_plus_recent() {
        let all = turns(10);
        let (old, recent) = plan_compaction(&all, 4);
        assert!(!old.is_empty());

        let mut compacted = vec![Turn::summary("condensed")];
        compacted.extend(recent);

        assert_eq!(compacted.len(), 5);
        assert!(compacted[0].is_summary);
        assert_eq!(compacted.iter().filter(|t| t.is_summary).count(), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = HistoryConfig::default();
        assert!(config.keep_recent < config.max_turns);
    }

    /// Summarizer stub that condenses turns without an LLM call
    struct FixedSummarizer;

    #[async_trait::async_trait]
    impl TurnSummarizer for FixedSummarizer {
        async fn summarize_turns(&self, turns: &[Turn]) -> crate::Result<Turn> {
            Ok(Turn::summary(format!("condensed {} turns", turns.len())))
        }
    }

    /// Summarizer stub that always fails
    struct FailingSummarizer;

    #[async_trait::async_trait]
    impl TurnSummarizer for FailingSummarizer {
        async fn summarize_turns(&self, _turns: &[Turn]) -> crate::Result<Turn> {
            Err(crate::error::ChatError::upstream_fatal("summarizer down"))
        }
    }

    #[tokio::test]
    async fn test_append_below_threshold_returns_all_in_order() {
        let store = Arc::new(SessionStore::in_memory());
        let manager = HistoryManager::new(
            store.clone(),
            Arc::new(FixedSummarizer),
            HistoryConfig::default(),
        );

        let session = store.create().await.unwrap();
        for i in 0..5 {
            manager
                .append(session.session_id, Turn::new(Role::User, format!("q{}", i)))
                .await
                .unwrap();
        }

        let context = manager.get_context(session.session_id).await.unwrap();
        assert_eq!(context.len(), 5);
        for (i, turn) in context.iter().enumerate() {
            assert_eq!(turn.content, format!("q{}", i));
        }
    }

    #[tokio::test]
    async fn test_overflow_compacts_to_one_summary_plus_recent() {
        let store = Arc::new(SessionStore::in_memory());
        let config = HistoryConfig {
            max_turns: 4,
            keep_recent: 2,
        };
        let manager = HistoryManager::new(store.clone(), Arc::new(FixedSummarizer), config);

        let session = store.create().await.unwrap();
        for i in 0..5 {
            manager
                .append(session.session_id, Turn::new(Role::User, format!("q{}", i)))
                .await
                .unwrap();
        }

        // The 5th append crossed the bound: 3 old turns condensed into
        // one summary, 2 recent turns preserved verbatim.
        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 3);
        assert!(fetched.turns[0].is_summary);
        assert_eq!(fetched.turns[0].content, "condensed 3 turns");
        assert_eq!(fetched.turns[1].content, "q3");
        assert_eq!(fetched.turns[2].content, "q4");
        assert_eq!(fetched.turns.iter().filter(|t| t.is_summary).count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_overflow_keeps_exactly_one_summary() {
        let store = Arc::new(SessionStore::in_memory());
        let config = HistoryConfig {
            max_turns: 4,
            keep_recent: 2,
        };
        let manager = HistoryManager::new(store.clone(), Arc::new(FixedSummarizer), config);

        let session = store.create().await.unwrap();
        for i in 0..9 {
            manager
                .append(session.session_id, Turn::new(Role::User, format!("q{}", i)))
                .await
                .unwrap();
        }

        // Each overflow folds the previous summary into the next one.
        let fetched = store.get(session.session_id).await.unwrap();
        assert!(fetched.turn_count() <= 4);
        assert_eq!(fetched.turns.iter().filter(|t| t.is_summary).count(), 1);
        assert!(fetched.turns[0].is_summary);
        assert_eq!(fetched.turns.last().unwrap().content, "q8");
    }

    #[tokio::test]
    async fn test_failed_summarization_leaves_history_intact() {
        let store = Arc::new(SessionStore::in_memory());
        let config = HistoryConfig {
            max_turns: 4,
            keep_recent: 2,
        };
        let manager = HistoryManager::new(store.clone(), Arc::new(FailingSummarizer), config);

        let session = store.create().await.unwrap();
        for i in 0..6 {
            manager
                .append(session.session_id, Turn::new(Role::User, format!("q{}", i)))
                .await
                .unwrap();
        }

        // Compaction is skipped on summarizer failure and the full
        // history survives in the store.
        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 6);

        // Context stays bounded regardless.
        let context = manager.get_context(session.session_id).await.unwrap();
        assert_eq!(context.len(), 4);
        assert_eq!(context.last().unwrap().content, "q5");
    }
}
