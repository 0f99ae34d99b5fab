//! Postgres session backend
//!
//! Persists sessions and turns across restarts. The schema is created
//! lazily on first use so the process can start before the database is
//! reachable; connection failures surface as `Storage` errors, which the
//! store facade absorbs by degrading to the in-memory fallback.

use crate::error::ChatError;
use crate::memory::store::SessionBackend;
use crate::models::{Role, Session, Turn, UserPreferences};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

pub struct PostgresBackend {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

fn storage_err(context: &str, error: sqlx::Error) -> ChatError {
    ChatError::Storage(format!("{}: {}", context, error))
}

impl PostgresBackend {
    /// Connect lazily; no round-trip happens until the first query
    pub fn connect_lazy(database_url: &str) -> crate::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| ChatError::Storage(format!("Invalid database URL: {}", e)))?;

        info!("Session store backend: postgres");

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> crate::Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_sessions (
                      session_id UUID PRIMARY KEY,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      preferences TEXT
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_turns (
                      turn_id UUID PRIMARY KEY,
                      session_id UUID NOT NULL REFERENCES chat_sessions (session_id) ON DELETE CASCADE,
                      seq BIGSERIAL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      is_summary BOOLEAN NOT NULL DEFAULT FALSE,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_chat_turns_session_seq
                    ON chat_turns (session_id, seq);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| ChatError::Storage(format!("Failed to initialize session schema: {}", e)))?;

        Ok(())
    }

    async fn session_exists(&self, session_id: Uuid) -> crate::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM chat_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to check session existence", e))?;

        Ok(row.is_some())
    }

    fn turn_from_row(row: &sqlx::postgres::PgRow) -> Turn {
        let db_role: String = row.try_get("role").unwrap_or_else(|_| "user".to_string());

        Turn {
            turn_id: row.try_get("turn_id").unwrap_or_else(|_| Uuid::new_v4()),
            role: Role::from_str_lossy(&db_role),
            content: row.try_get("content").unwrap_or_default(),
            timestamp: row
                .try_get("created_at")
                .unwrap_or_else(|_| chrono::Utc::now()),
            is_summary: row.try_get("is_summary").unwrap_or(false),
        }
    }

    async fn insert_turn_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: Uuid,
        turn: &Turn,
    ) -> crate::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_turns (turn_id, session_id, role, content, is_summary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(turn.turn_id)
        .bind(session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.is_summary)
        .bind(turn.timestamp)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage_err("Failed to insert turn", e))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionBackend for PostgresBackend {
    async fn insert_session(&self, session: &Session) -> crate::Result<()> {
        self.ensure_schema().await?;

        let preferences = match &session.preferences {
            Some(prefs) => Some(serde_json::to_string(prefs)?),
            None => None,
        };

        sqlx::query(
            "INSERT INTO chat_sessions (session_id, created_at, preferences) VALUES ($1, $2, $3)",
        )
        .bind(session.session_id)
        .bind(session.created_at)
        .bind(preferences)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to insert session", e))?;

        Ok(())
    }

    async fn fetch_session(&self, session_id: Uuid) -> crate::Result<Option<Session>> {
        self.ensure_schema().await?;

        let session_row = sqlx::query(
            "SELECT session_id, created_at, preferences FROM chat_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to load session", e))?;

        let Some(session_row) = session_row else {
            return Ok(None);
        };

        let preferences: Option<String> = session_row.try_get("preferences").ok().flatten();
        let preferences = preferences.and_then(|raw| serde_json::from_str(&raw).ok());

        let turn_rows = sqlx::query(
            r#"
            SELECT turn_id, role, content, is_summary, created_at
            FROM chat_turns
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to load turns", e))?;

        let turns = turn_rows.iter().map(Self::turn_from_row).collect();

        Ok(Some(Session {
            session_id,
            created_at: session_row
                .try_get("created_at")
                .unwrap_or_else(|_| chrono::Utc::now()),
            turns,
            preferences,
        }))
    }

    async fn delete_session(&self, session_id: Uuid) -> crate::Result<bool> {
        self.ensure_schema().await?;

        // Turns go with the session via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM chat_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to delete session", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_turn(&self, session_id: Uuid, turn: &Turn) -> crate::Result<bool> {
        self.ensure_schema().await?;

        if !self.session_exists(session_id).await? {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO chat_turns (turn_id, session_id, role, content, is_summary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(turn.turn_id)
        .bind(session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.is_summary)
        .bind(turn.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_err("Failed to append turn", e))?;

        Ok(true)
    }

    async fn replace_turns(&self, session_id: Uuid, turns: &[Turn]) -> crate::Result<bool> {
        self.ensure_schema().await?;

        if !self.session_exists(session_id).await? {
            return Ok(false);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_err("Failed to begin turn replacement", e))?;

        sqlx::query("DELETE FROM chat_turns WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_err("Failed to clear old turns", e))?;

        for turn in turns {
            Self::insert_turn_tx(&mut tx, session_id, turn).await?;
        }

        tx.commit()
            .await
            .map_err(|e| storage_err("Failed to commit turn replacement", e))?;

        Ok(true)
    }

    async fn set_preferences(
        &self,
        session_id: Uuid,
        preferences: &UserPreferences,
    ) -> crate::Result<bool> {
        self.ensure_schema().await?;

        let raw = serde_json::to_string(preferences)?;

        let result = sqlx::query("UPDATE chat_sessions SET preferences = $1 WHERE session_id = $2")
            .bind(raw)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to update preferences", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self) -> crate::Result<Vec<Uuid>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT session_id FROM chat_sessions ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("Failed to list sessions", e))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.try_get("session_id").ok())
            .collect())
    }
}
