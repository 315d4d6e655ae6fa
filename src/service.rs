//! Outer archive API.
//!
//! `ArchiveService` wires one storage backend to the temporal index and the
//! drill-down queries, and is what the protocol, rendering and moderation
//! collaborators talk to. It owns no state beyond the shared handles, so it
//! is cheap to clone into spawned tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::cache::DateIndex;
use crate::error::Result;
use crate::metrics;
use crate::models::{Chat, FileRecord, Message, StoredMessage, User};
use crate::query::HistoryQueries;
use crate::repository::EntityStore;

/// Facade over the entity store, the temporal index and the drill-down
/// queries.
#[derive(Clone)]
pub struct ArchiveService {
    store: Arc<dyn EntityStore>,
    index: Arc<DateIndex>,
    queries: HistoryQueries,
}

impl ArchiveService {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        let index = Arc::new(DateIndex::new(store.clone()));
        let queries = HistoryQueries::new(store.clone(), index.clone());
        Self {
            store,
            index,
            queries,
        }
    }

    /// Save a message and its entity graph, then register its date with the
    /// temporal index as a detached task.
    ///
    /// The index update is fired even when the cascade reports a partial
    /// failure: the message body may well be in place, and a stray index
    /// entry is corrected by the next rebuild. The save result never
    /// depends on the index update.
    pub async fn save_message(&self, message: &Message) -> Result<()> {
        let result = self.store.upsert_message(message).await;
        metrics::message_saved();

        let index = self.index.clone();
        let chat_id = message.chat_id();
        let date = message.date;
        tokio::spawn(async move {
            index.add_date(chat_id, date).await;
        });

        result
    }

    /// Fire-and-forget save for callers on the hot event path; failures are
    /// logged instead of returned.
    pub fn save_message_detached(&self, message: Message) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.save_message(&message).await {
                warn!(
                    chat_id = message.chat_id(),
                    message_id = message.message_id,
                    error = %e,
                    "detached message save failed"
                );
            }
        });
    }

    /// Tracked conversations (forward-origin-only chats excluded).
    pub async fn get_chats(&self) -> Result<Vec<Chat>> {
        self.store.get_chats().await
    }

    /// All known users.
    pub async fn get_users(&self) -> Result<Vec<User>> {
        self.store.get_users().await
    }

    /// Resolve a user by `@handle` or "First [Last]" query.
    pub async fn get_user(&self, query: &str) -> Result<User> {
        self.store.get_user(query).await
    }

    /// Full history of a chat, ascending by date.
    pub async fn get_messages(&self, chat_id: i64) -> Result<Vec<StoredMessage>> {
        self.store.get_messages_by_date(chat_id, None, None).await
    }

    /// History of a chat restricted to an inclusive unix-second range.
    pub async fn get_messages_by_date(
        &self,
        chat_id: i64,
        begin: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<StoredMessage>> {
        self.store.get_messages_by_date(chat_id, begin, end).await
    }

    /// Years with archived activity, ascending.
    pub async fn get_years(&self, chat_id: i64) -> Result<Vec<String>> {
        self.queries.years(chat_id).await
    }

    /// Months (1-12) with activity in `year`, ascending.
    pub async fn get_month_list(&self, chat_id: i64, year: i32) -> Result<Vec<u32>> {
        self.queries.month_list(chat_id, year).await
    }

    /// Days with activity in `(year, month)`, ascending.
    pub async fn get_dates(&self, chat_id: i64, year: i32, month: u32) -> Result<Vec<u32>> {
        self.queries.days(chat_id, year, month).await
    }

    /// All messages of one calendar day.
    pub async fn get_messages_for_day(
        &self,
        chat_id: i64,
        year: i32,
        month: u32,
        day: u32,
    ) -> Result<Vec<StoredMessage>> {
        self.queries.messages_for_day(chat_id, year, month, day).await
    }

    /// Record a downloaded file for a chat.
    pub async fn save_file(&self, file: &FileRecord) -> Result<()> {
        self.store.save_file(file).await
    }

    /// Look up a downloaded file by platform id within a chat.
    pub async fn get_file(&self, file_id: &str, chat_id: i64) -> Result<FileRecord> {
        self.store.get_file(file_id, chat_id).await
    }

    /// Current-year censor level; 0 means a clean record.
    pub async fn get_cens_level(&self, user: &User) -> Result<u32> {
        self.store.cens_level(user.id).await
    }

    pub async fn set_cens_level(&self, user: &User, level: u32) -> Result<()> {
        self.store.set_cens_level(user.id, level).await
    }

    /// Add one violation for the current year and return the new level.
    pub async fn add_cens_level(&self, user: &User) -> Result<u32> {
        self.store.add_cens_level(user.id).await
    }

    pub async fn clear_cens_level(&self, user: &User) -> Result<()> {
        self.store.clear_cens_level(user.id).await
    }

    /// Warn level; 0 means a clean record. Not year-scoped.
    pub async fn get_warn_level(&self, user: &User) -> Result<u32> {
        self.store.warn_level(user.id).await
    }

    pub async fn set_warn_level(&self, user: &User, level: u32) -> Result<()> {
        self.store.set_warn_level(user.id, level).await
    }

    /// Add one warning and return the new level.
    pub async fn add_warn_level(&self, user: &User) -> Result<u32> {
        self.store.add_warn_level(user.id).await
    }

    pub async fn clear_warn_level(&self, user: &User) -> Result<()> {
        self.store.clear_warn_level(user.id).await
    }

    /// Spawn the periodic full index rebuild.
    pub fn spawn_rebuild(&self, interval: Duration) -> JoinHandle<()> {
        let index = self.index.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval completes immediately;
            // skip it so the rebuild starts one full period after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = index.rebuild().await {
                    error!(error = %e, "temporal index rebuild failed");
                }
            }
        })
    }
}
