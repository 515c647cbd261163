//! Vitte assistant.
//!
//! Conversational assistant with multi-step dialogs, role-gated views and
//! pluggable text analysis, served over Telegram.

/// Telegram transport.
pub mod bot;
/// Analytic capabilities (summarization, remote inference, open chat).
pub mod capabilities;
/// Configuration management.
pub mod config;
/// Secret hashing.
pub mod credentials;
/// Conversation dispatch and session-state engine.
pub mod engine;
/// User-facing handlers and dialogs.
pub mod handlers;
/// Durable store (SQLite).
pub mod storage;
/// User-facing texts.
pub mod views;
