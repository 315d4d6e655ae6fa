//! Chat Archive - Entity Persistence and Temporal Index
//!
//! A Rust library for durably archiving chat-platform traffic (messages,
//! users, chats, attachments, moderation counters) and serving a derived
//! per-conversation activity index over it.
//!
//! # Features
//!
//! - Recursive, idempotent upserts over nested entity graphs
//! - Two storage backends behind one trait: SQLite and a sled document store
//! - Lazily backfilled years/months/days activity index per conversation
//! - Date drill-down queries for history browsing
//! - Per-chat moderation counters

/// Per-conversation temporal index
pub mod cache;
/// Configuration management
pub mod config;
/// Relational storage backend (SQLite)
pub mod db;
/// Document storage backend (sled)
pub mod docstore;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// Metrics recording
mod metrics;
/// Entity graph and read models
pub mod models;
/// Date drill-down queries
pub mod query;
/// Backend-agnostic store contract
pub mod repository;
/// Relational schema definitions
pub mod schema;
/// Outer archive API
pub mod service;

// Re-export key components for easier access
pub use cache::DateIndex;
pub use config::AppConfig;
pub use db::SqliteStore;
pub use docstore::DocumentStore;
pub use error::{ArchiveError, Result};
pub use models::{Chat, ChatKind, FileRecord, Message, StoredMessage, User};
pub use query::HistoryQueries;
pub use repository::{open_store, EntityStore};
pub use service::ArchiveService;
