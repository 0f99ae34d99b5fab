//! Nebula Chat Backend
//!
//! A conversational AI chat backend that:
//! - Manages chat sessions with ordered conversation turns
//! - Keeps history bounded, summarizing old turns on overflow
//! - Persists sessions to Postgres, degrading gracefully to an
//!   in-memory map when the database is unavailable
//! - Answers messages through the Gemini API with bounded retries
//!
//! PIPELINE:
//! REQUEST → SESSION LOOKUP → CONTEXT → LLM CALL → PERSIST TURNS → RESPONSE

pub mod agent;
pub mod api;
pub mod error;
pub mod gemini;
pub mod memory;
pub mod models;

pub use error::{ChatError, Result};

// Re-export common types
pub use models::*;
