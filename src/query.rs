//! Date drill-down queries.
//!
//! Thin composition of the temporal index (fast path) and the entity
//! store's range reads. The only logic of its own is translating year /
//! month / day integers into inclusive unix-second range boundaries;
//! nonsense calendar input and missing data both yield empty sequences,
//! never errors.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::cache::DateIndex;
use crate::error::Result;
use crate::models::StoredMessage;
use crate::repository::EntityStore;

pub(crate) fn year_bounds(year: i32) -> Option<(i64, i64)> {
    let begin = NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)?.and_hms_opt(23, 59, 59)?;
    Some((begin.and_utc().timestamp(), end.and_utc().timestamp()))
}

pub(crate) fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

pub(crate) fn month_bounds(year: i32, month: u32) -> Option<(i64, i64)> {
    let last_day = days_in_month(year, month)?;
    let begin = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    let end = NaiveDate::from_ymd_opt(year, month, last_day)?.and_hms_opt(23, 59, 59)?;
    Some((begin.and_utc().timestamp(), end.and_utc().timestamp()))
}

pub(crate) fn day_bounds(year: i32, month: u32, day: u32) -> Option<(i64, i64)> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let begin = date.and_hms_opt(0, 0, 0)?;
    let end = date.and_hms_opt(23, 59, 59)?;
    Some((begin.and_utc().timestamp(), end.and_utc().timestamp()))
}

/// Date drill-down façade over index and store.
#[derive(Clone)]
pub struct HistoryQueries {
    store: Arc<dyn EntityStore>,
    index: Arc<DateIndex>,
}

impl HistoryQueries {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, index: Arc<DateIndex>) -> Self {
        Self { store, index }
    }

    /// Years with archived activity, ascending, rendered for listing pages.
    pub async fn years(&self, chat_id: i64) -> Result<Vec<String>> {
        Ok(self
            .index
            .years(chat_id)
            .await?
            .into_iter()
            .map(|year| year.to_string())
            .collect())
    }

    /// Months (1-12) with activity in `year`, ascending.
    pub async fn month_list(&self, chat_id: i64, year: i32) -> Result<Vec<u32>> {
        self.index.months(chat_id, year).await
    }

    /// Days with activity in `(year, month)`, ascending.
    pub async fn days(&self, chat_id: i64, year: i32, month: u32) -> Result<Vec<u32>> {
        self.index.days(chat_id, year, month).await
    }

    /// All messages of one calendar day, ascending by date.
    pub async fn messages_for_day(
        &self,
        chat_id: i64,
        year: i32,
        month: u32,
        day: u32,
    ) -> Result<Vec<StoredMessage>> {
        match day_bounds(year, month, day) {
            Some((begin, end)) => {
                self.store
                    .get_messages_by_date(chat_id, Some(begin), Some(end))
                    .await
            }
            None => Ok(Vec::new()),
        }
    }
}
