//! Per-conversation temporal index.
//!
//! For every chat the index remembers which years, months and days have at
//! least one archived message, so date drill-down pages never scan the full
//! history. The index is derived state: it is never persisted, is lazily
//! backfilled from the entity store on first miss, and can be rebuilt from
//! scratch at any time.
//!
//! Concurrency: the chat-to-cache map is guarded by its own mutex so lazy
//! creation for different chats cannot race, and each cache entry has an
//! async mutex serializing mutation and spanning the backfill read.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::error::Result;
use crate::logging::OperationTimer;
use crate::metrics;
use crate::query::{month_bounds, year_bounds};
use crate::repository::EntityStore;

/// Known activity dates for one conversation.
///
/// Ordered sets make insertion idempotent and reads sorted; callers can
/// repeat `insert` freely.
#[derive(Debug, Clone, Default)]
pub struct DateCache {
    years: BTreeSet<i32>,
    months: BTreeMap<i32, BTreeSet<u32>>,
    days: BTreeMap<(i32, u32), BTreeSet<u32>>,
}

impl DateCache {
    /// Record the year, month and day of a unix timestamp. Out-of-range
    /// timestamps are ignored.
    pub fn insert(&mut self, date: i64) {
        let Some(dt) = DateTime::from_timestamp(date, 0) else {
            return;
        };
        let day = dt.date_naive();
        self.years.insert(day.year());
        self.months
            .entry(day.year())
            .or_default()
            .insert(day.month());
        self.days
            .entry((day.year(), day.month()))
            .or_default()
            .insert(day.day());
    }

    /// Years with activity, ascending.
    #[must_use]
    pub fn years(&self) -> Vec<i32> {
        self.years.iter().copied().collect()
    }

    /// Months with activity in `year`, ascending.
    #[must_use]
    pub fn months(&self, year: i32) -> Vec<u32> {
        self.months
            .get(&year)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Days with activity in `(year, month)`, ascending.
    #[must_use]
    pub fn days(&self, year: i32, month: u32) -> Vec<u32> {
        self.days
            .get(&(year, month))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn has_months(&self, year: i32) -> bool {
        self.months.get(&year).is_some_and(|set| !set.is_empty())
    }

    fn has_days(&self, year: i32, month: u32) -> bool {
        self.days
            .get(&(year, month))
            .is_some_and(|set| !set.is_empty())
    }
}

/// Lazily populated map of per-chat [`DateCache`] entries.
pub struct DateIndex {
    store: Arc<dyn EntityStore>,
    caches: Mutex<HashMap<i64, Arc<AsyncMutex<DateCache>>>>,
}

impl DateIndex {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            caches: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, chat_id: i64) -> Arc<AsyncMutex<DateCache>> {
        self.caches.lock().entry(chat_id).or_default().clone()
    }

    /// Record a new message date. Idempotent; safe to fire from the save
    /// path without awaiting the result.
    pub async fn add_date(&self, chat_id: i64, date: i64) {
        let entry = self.entry(chat_id);
        let mut cache = entry.lock().await;
        cache.insert(date);
    }

    /// Years with activity. On a cold cache this backfills every message
    /// date of the chat from the store, which also populates the month and
    /// day sets.
    pub async fn years(&self, chat_id: i64) -> Result<Vec<i32>> {
        let entry = self.entry(chat_id);
        let mut cache = entry.lock().await;

        if cache.years.is_empty() {
            metrics::index_miss("years");
            let dates = self.store.get_dates(chat_id, None, None).await?;
            metrics::index_backfill(dates.len());
            for date in dates {
                cache.insert(date);
            }
        } else {
            metrics::index_hit("years");
        }

        Ok(cache.years())
    }

    /// Months with activity in `year`; backfills from the store restricted
    /// to that year on a miss.
    pub async fn months(&self, chat_id: i64, year: i32) -> Result<Vec<u32>> {
        let entry = self.entry(chat_id);
        let mut cache = entry.lock().await;

        if cache.has_months(year) {
            metrics::index_hit("months");
        } else {
            let Some((begin, end)) = year_bounds(year) else {
                return Ok(Vec::new());
            };
            metrics::index_miss("months");
            let dates = self.store.get_dates(chat_id, Some(begin), Some(end)).await?;
            metrics::index_backfill(dates.len());
            for date in dates {
                cache.insert(date);
            }
        }

        Ok(cache.months(year))
    }

    /// Days with activity in `(year, month)`; backfills from the store
    /// restricted to that month on a miss.
    pub async fn days(&self, chat_id: i64, year: i32, month: u32) -> Result<Vec<u32>> {
        let entry = self.entry(chat_id);
        let mut cache = entry.lock().await;

        if cache.has_days(year, month) {
            metrics::index_hit("days");
        } else {
            let Some((begin, end)) = month_bounds(year, month) else {
                return Ok(Vec::new());
            };
            metrics::index_miss("days");
            let dates = self.store.get_dates(chat_id, Some(begin), Some(end)).await?;
            metrics::index_backfill(dates.len());
            for date in dates {
                cache.insert(date);
            }
        }

        Ok(cache.days(year, month))
    }

    /// Re-derive every tracked chat's cache from the store and swap it in.
    ///
    /// Dates added concurrently by live saves may miss one rebuild cycle;
    /// they reappear through `add_date` or the next backfill, so the swap
    /// is safe alongside live inserts.
    pub async fn rebuild(&self) -> Result<()> {
        let timer = OperationTimer::new("index_rebuild");
        let chats = self.store.get_chats().await?;

        for chat in &chats {
            let dates = self.store.get_dates(chat.id, None, None).await?;
            let mut fresh = DateCache::default();
            for date in dates {
                fresh.insert(date);
            }
            let entry = self.entry(chat.id);
            *entry.lock().await = fresh;
        }

        info!(chats = chats.len(), "temporal index rebuilt");
        timer.finish();
        Ok(())
    }
}
