//! Session storage
//!
//! A `SessionBackend` trait abstracts over the persistent store and the
//! in-process map. The `SessionStore` facade routes operations to the
//! configured primary backend and transparently degrades to the in-memory
//! map for the rest of the process lifetime when the primary fails.
//! Nothing is replicated into the fallback; sessions created before
//! degradation are not visible afterwards.

use crate::error::ChatError;
use crate::models::{Session, Turn, UserPreferences};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Persistence interface for sessions and their turns.
///
/// `Ok(false)` from the mutating operations means the session does not
/// exist; `Err(ChatError::Storage)` is reserved for backend failures.
#[async_trait::async_trait]
pub trait SessionBackend: Send + Sync {
    async fn insert_session(&self, session: &Session) -> crate::Result<()>;
    async fn fetch_session(&self, session_id: Uuid) -> crate::Result<Option<Session>>;
    async fn delete_session(&self, session_id: Uuid) -> crate::Result<bool>;
    async fn append_turn(&self, session_id: Uuid, turn: &Turn) -> crate::Result<bool>;
    async fn replace_turns(&self, session_id: Uuid, turns: &[Turn]) -> crate::Result<bool>;
    async fn set_preferences(
        &self,
        session_id: Uuid,
        preferences: &UserPreferences,
    ) -> crate::Result<bool>;
    async fn list_sessions(&self) -> crate::Result<Vec<Uuid>>;
}

/// In-process session map. Process-lifetime only; serves both as the
/// development backend and as the degraded-mode fallback.
pub struct MemoryBackend {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionBackend for MemoryBackend {
    async fn insert_session(&self, session: &Session) -> crate::Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn fetch_session(&self, session_id: Uuid) -> crate::Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn delete_session(&self, session_id: Uuid) -> crate::Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(&session_id).is_some())
    }

    async fn append_turn(&self, session_id: Uuid, turn: &Turn) -> crate::Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.turns.push(turn.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_turns(&self, session_id: Uuid, turns: &[Turn]) -> crate::Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.turns = turns.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_preferences(
        &self,
        session_id: Uuid,
        preferences: &UserPreferences,
    ) -> crate::Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) => {
                session.preferences = Some(preferences.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_sessions(&self) -> crate::Result<Vec<Uuid>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.keys().copied().collect())
    }
}

/// Session store with graceful fallback.
///
/// Operations hit the primary backend while it is healthy. The first
/// `Storage` error flips the store into degraded mode and the operation
/// is retried against the in-memory fallback; callers never see the
/// storage failure.
pub struct SessionStore {
    primary: Option<Arc<dyn SessionBackend>>,
    fallback: MemoryBackend,
    degraded: AtomicBool,
}

impl SessionStore {
    /// Store backed only by the in-process map
    pub fn in_memory() -> Self {
        Self {
            primary: None,
            fallback: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Store backed by a persistent backend with in-memory fallback
    pub fn with_primary(primary: Arc<dyn SessionBackend>) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
        }
    }

    fn active_primary(&self) -> Option<&dyn SessionBackend> {
        if self.degraded.load(Ordering::Relaxed) {
            return None;
        }
        self.primary.as_deref()
    }

    /// Absorb a primary-backend failure, switching to the fallback.
    /// Non-storage errors propagate unchanged.
    fn absorb_failure(&self, error: ChatError) -> crate::Result<()> {
        match error {
            ChatError::Storage(message) => {
                warn!(
                    "Persistent session store failed, degrading to in-memory fallback: {}",
                    message
                );
                self.degraded.store(true, Ordering::Relaxed);
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Label for health reporting
    pub fn backend_label(&self) -> &'static str {
        match (&self.primary, self.degraded.load(Ordering::Relaxed)) {
            (Some(_), false) => "postgres",
            (Some(_), true) => "memory (degraded)",
            (None, _) => "memory",
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Create a new empty session
    pub async fn create(&self) -> crate::Result<Session> {
        let session = Session::new();

        if let Some(primary) = self.active_primary() {
            match primary.insert_session(&session).await {
                Ok(()) => return Ok(session),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        self.fallback.insert_session(&session).await?;
        Ok(session)
    }

    /// Fetch a session with its ordered turns
    pub async fn get(&self, session_id: Uuid) -> crate::Result<Session> {
        if let Some(primary) = self.active_primary() {
            match primary.fetch_session(session_id).await {
                Ok(Some(session)) => return Ok(session),
                Ok(None) => return Err(ChatError::SessionNotFound(session_id)),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        self.fallback
            .fetch_session(session_id)
            .await?
            .ok_or(ChatError::SessionNotFound(session_id))
    }

    /// Delete a session and all of its turns
    pub async fn delete(&self, session_id: Uuid) -> crate::Result<()> {
        if let Some(primary) = self.active_primary() {
            match primary.delete_session(session_id).await {
                Ok(true) => return Ok(()),
                Ok(false) => return Err(ChatError::SessionNotFound(session_id)),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        if self.fallback.delete_session(session_id).await? {
            Ok(())
        } else {
            Err(ChatError::SessionNotFound(session_id))
        }
    }

    /// Append a turn to an existing session
    pub async fn append_turn(&self, session_id: Uuid, turn: &Turn) -> crate::Result<()> {
        if let Some(primary) = self.active_primary() {
            match primary.append_turn(session_id, turn).await {
                Ok(true) => return Ok(()),
                Ok(false) => return Err(ChatError::SessionNotFound(session_id)),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        if self.fallback.append_turn(session_id, turn).await? {
            Ok(())
        } else {
            Err(ChatError::SessionNotFound(session_id))
        }
    }

    /// Replace a session's turns wholesale (used by history compaction)
    pub async fn replace_turns(&self, session_id: Uuid, turns: &[Turn]) -> crate::Result<()> {
        if let Some(primary) = self.active_primary() {
            match primary.replace_turns(session_id, turns).await {
                Ok(true) => return Ok(()),
                Ok(false) => return Err(ChatError::SessionNotFound(session_id)),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        if self.fallback.replace_turns(session_id, turns).await? {
            Ok(())
        } else {
            Err(ChatError::SessionNotFound(session_id))
        }
    }

    /// Clear a session's turns, keeping the session itself alive
    pub async fn clear_turns(&self, session_id: Uuid) -> crate::Result<()> {
        self.replace_turns(session_id, &[]).await
    }

    /// Update a session's preferences
    pub async fn set_preferences(
        &self,
        session_id: Uuid,
        preferences: &UserPreferences,
    ) -> crate::Result<()> {
        if let Some(primary) = self.active_primary() {
            match primary.set_preferences(session_id, preferences).await {
                Ok(true) => return Ok(()),
                Ok(false) => return Err(ChatError::SessionNotFound(session_id)),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        if self.fallback.set_preferences(session_id, preferences).await? {
            Ok(())
        } else {
            Err(ChatError::SessionNotFound(session_id))
        }
    }

    /// List known session ids
    pub async fn list(&self) -> crate::Result<Vec<Uuid>> {
        if let Some(primary) = self.active_primary() {
            match primary.list_sessions().await {
                Ok(ids) => return Ok(ids),
                Err(e) => self.absorb_failure(e)?,
            }
        }

        self.fallback.list_sessions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    /// Backend that fails every operation with a storage error
    struct FailingBackend;

    #[async_trait::async_trait]
    impl SessionBackend for FailingBackend {
        async fn insert_session(&self, _session: &Session) -> crate::Result<()> {
            Err(ChatError::Storage("connection refused".to_string()))
        }

        async fn fetch_session(&self, _session_id: Uuid) -> crate::Result<Option<Session>> {
            Err(ChatError::Storage("connection refused".to_string()))
        }

        async fn delete_session(&self, _session_id: Uuid) -> crate::Result<bool> {
            Err(ChatError::Storage("connection refused".to_string()))
        }

        async fn append_turn(&self, _session_id: Uuid, _turn: &Turn) -> crate::Result<bool> {
            Err(ChatError::Storage("connection refused".to_string()))
        }

        async fn replace_turns(&self, _session_id: Uuid, _turns: &[Turn]) -> crate::Result<bool> {
            Err(ChatError::Storage("connection refused".to_string()))
        }

        async fn set_preferences(
            &self,
            _session_id: Uuid,
            _preferences: &UserPreferences,
        ) -> crate::Result<bool> {
            Err(ChatError::Storage("connection refused".to_string()))
        }

        async fn list_sessions(&self) -> crate::Result<Vec<Uuid>> {
            Err(ChatError::Storage("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_create_then_get_returns_empty_session() {
        let store = SessionStore::in_memory();
        let session = store.create().await.unwrap();

        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.session_id, session.session_id);
        assert!(fetched.turns.is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = SessionStore::in_memory();
        let session = store.create().await.unwrap();

        for i in 0..5 {
            let turn = Turn::new(Role::User, format!("message {}", i));
            store.append_turn(session.session_id, &turn).await.unwrap();
        }

        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 5);
        for (i, turn) in fetched.turns.iter().enumerate() {
            assert_eq!(turn.content, format!("message {}", i));
        }
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let store = SessionStore::in_memory();
        let session = store.create().await.unwrap();

        store.delete(session.session_id).await.unwrap();

        let result = store.get(session.session_id).await;
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_not_found() {
        let store = SessionStore::in_memory();
        let result = store.delete(Uuid::new_v4()).await;
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_append_to_unknown_session_is_not_found() {
        let store = SessionStore::in_memory();
        let turn = Turn::new(Role::User, "hello");
        let result = store.append_turn(Uuid::new_v4(), &turn).await;
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_storage_failure_degrades_to_fallback() {
        let store = SessionStore::with_primary(Arc::new(FailingBackend));
        assert_eq!(store.backend_label(), "postgres");

        // First operation absorbs the failure and lands in the fallback
        let session = store.create().await.unwrap();
        assert!(store.is_degraded());
        assert_eq!(store.backend_label(), "memory (degraded)");

        // Subsequent operations keep working against the fallback
        let turn = Turn::new(Role::User, "still works");
        store.append_turn(session.session_id, &turn).await.unwrap();
        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_preferences_roundtrip() {
        let store = SessionStore::in_memory();
        let session = store.create().await.unwrap();

        let prefs = UserPreferences {
            language: "spanish".to_string(),
            ..UserPreferences::default()
        };
        store
            .set_preferences(session.session_id, &prefs)
            .await
            .unwrap();

        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.preferences, Some(prefs));
    }

    #[tokio::test]
    async fn test_replace_turns() {
        let store = SessionStore::in_memory();
        let session = store.create().await.unwrap();

        for i in 0..4 {
            let turn = Turn::new(Role::User, format!("m{}", i));
            store.append_turn(session.session_id, &turn).await.unwrap();
        }

        let replacement = vec![Turn::summary("condensed"), Turn::new(Role::User, "m3")];
        store
            .replace_turns(session.session_id, &replacement)
            .await
            .unwrap();

        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 2);
        assert!(fetched.turns[0].is_summary);
    }

    #[tokio::test]
    async fn test_clear_turns_keeps_session() {
        let store = SessionStore::in_memory();
        let session = store.create().await.unwrap();

        for i in 0..3 {
            let turn = Turn::new(Role::User, format!("m{}", i));
            store.append_turn(session.session_id, &turn).await.unwrap();
        }

        store.clear_turns(session.session_id).await.unwrap();

        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 0);

        // The session is still live and usable afterwards
        let turn = Turn::new(Role::User, "fresh start");
        store.append_turn(session.session_id, &turn).await.unwrap();
        let fetched = store.get(session.session_id).await.unwrap();
        assert_eq!(fetched.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_turns_unknown_session_is_not_found() {
        let store = SessionStore::in_memory();
        let result = store.clear_turns(Uuid::new_v4()).await;
        assert!(matches!(result, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let store = SessionStore::in_memory();
        let a = store.create().await.unwrap();
        let b = store.create().await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.session_id));
        assert!(ids.contains(&b.session_id));
    }
}
