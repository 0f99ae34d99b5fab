//! Session Memory System
//!
//! Provides session storage with graceful Postgres-to-memory fallback,
//! bounded conversation history, and automatic summarization when a
//! session's history exceeds its configured bound.

pub mod context;
pub mod postgres;
pub mod store;
pub mod summarizer;

pub use context::{HistoryConfig, HistoryManager};
pub use store::{MemoryBackend, SessionBackend, SessionStore};
pub use summarizer::{Summarizer, TurnSummarizer};
