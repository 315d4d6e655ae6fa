//! Backend-agnostic entity store contract.
//!
//! One logical entity API with one physical representation per storage
//! technology: [`crate::db::SqliteStore`] (relational) and
//! [`crate::docstore::DocumentStore`] (document-oriented). The backend is
//! selected once at startup from configuration via [`open_store`]; callers
//! hold an `Arc<dyn EntityStore>` and never branch on the backend again.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::db::SqliteStore;
use crate::docstore::DocumentStore;
use crate::error::{ArchiveError, Result};
use crate::models::{Chat, FileRecord, Message, StoredMessage, User};

/// Capability set implemented by every storage backend.
///
/// All upserts are idempotent: re-saving identical content never creates
/// duplicate records. `upsert_message` is a best-effort cascade over the
/// nested entity graph — each sub-entity save is an independent fallible
/// step, failures are logged and the last one is reported after the message
/// body itself has been attempted. The cascade is at-least-once, not atomic:
/// a crash mid-cascade leaves partially written state, which the backfilling
/// reader side tolerates.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert or update a user keyed by its platform id.
    async fn upsert_user(&self, user: &User) -> Result<()>;

    /// Insert or update a chat keyed by its platform id.
    ///
    /// `forward_origin` marks chats recorded only because a message was
    /// forwarded from them; the flag is persisted on first insert and
    /// preserved by later upserts.
    async fn upsert_chat(&self, chat: &Chat, forward_origin: bool) -> Result<()>;

    /// Save a message and its reachable entity graph.
    async fn upsert_message(&self, message: &Message) -> Result<()>;

    /// Tracked conversations: every stored chat that is not a mere
    /// forward origin.
    async fn get_chats(&self) -> Result<Vec<Chat>>;

    /// All stored users.
    async fn get_users(&self) -> Result<Vec<User>>;

    /// Look up a single user by `@handle` or by "First [Last]" name query.
    ///
    /// Zero matches fail with [`ArchiveError::NotFound`]; more than one
    /// match fails with [`ArchiveError::Ambiguous`] carrying display
    /// strings; queries of more than two name tokens fail with
    /// [`ArchiveError::MalformedQuery`].
    async fn get_user(&self, query: &str) -> Result<User>;

    /// Messages of a chat ordered ascending by date. Bounds are inclusive
    /// unix seconds; both absent means the full history.
    async fn get_messages_by_date(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<StoredMessage>>;

    /// Timestamp-only projection of `get_messages_by_date`, used to feed
    /// the temporal index without transferring message bodies.
    async fn get_dates(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<i64>>;

    /// Insert or update a downloaded-file record keyed by
    /// (file id, chat id).
    async fn save_file(&self, file: &FileRecord) -> Result<()>;

    /// Fetch a downloaded-file record; [`ArchiveError::NotFound`] when the
    /// file was never recorded for this chat.
    async fn get_file(&self, file_id: &str, chat_id: i64) -> Result<FileRecord>;

    /// Censor level for the current calendar year; 0 when no record exists.
    async fn cens_level(&self, user_id: i64) -> Result<u32>;

    /// Set the current-year censor level.
    async fn set_cens_level(&self, user_id: i64, level: u32) -> Result<()>;

    /// Increment the current-year censor level by one and return the new
    /// value. Fetch-then-store; no cross-request atomicity is guaranteed.
    async fn add_cens_level(&self, user_id: i64) -> Result<u32>;

    /// Remove the current-year censor record, returning the user to the
    /// clean zero-value state.
    async fn clear_cens_level(&self, user_id: i64) -> Result<()>;

    /// Warn level; 0 when no record exists. Not year-scoped.
    async fn warn_level(&self, user_id: i64) -> Result<u32>;

    /// Set the warn level.
    async fn set_warn_level(&self, user_id: i64, level: u32) -> Result<()>;

    /// Increment the warn level by one and return the new value.
    async fn add_warn_level(&self, user_id: i64) -> Result<u32>;

    /// Remove the warn record.
    async fn clear_warn_level(&self, user_id: i64) -> Result<()>;
}

/// Record one failed step of the message-save cascade: log it, count it,
/// remember it as the error to report, and let the cascade continue.
pub(crate) fn step(last_err: &mut Option<ArchiveError>, name: &'static str, res: Result<()>) {
    if let Err(e) = res {
        tracing::warn!(step = name, error = %e, "message save step failed");
        crate::metrics::cascade_step_failed(name);
        *last_err = Some(e);
    }
}

/// Open the storage backend named by the configuration.
pub fn open_store(cfg: &StorageConfig) -> Result<Arc<dyn EntityStore>> {
    match cfg.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::new(
            &cfg.sqlite_path,
            cfg.max_connections,
        )?)),
        "document" => Ok(Arc::new(DocumentStore::open(&cfg.document_path)?)),
        other => Err(ArchiveError::Config(format!(
            "unknown storage backend: {other}"
        ))),
    }
}
