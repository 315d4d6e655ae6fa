//! Metrics names and recording helpers.

use metrics::{counter, histogram};

const SAVE_STEP_FAILURES: &str = "chat_archive_save_step_failures_total";
const MESSAGES_SAVED: &str = "chat_archive_messages_saved_total";
const INDEX_HITS: &str = "chat_archive_index_hits_total";
const INDEX_MISSES: &str = "chat_archive_index_misses_total";
const INDEX_BACKFILLED_DATES: &str = "chat_archive_index_backfilled_dates";

/// One step of the message-save cascade failed.
pub(crate) fn cascade_step_failed(step: &'static str) {
    counter!(SAVE_STEP_FAILURES, "step" => step).increment(1);
}

/// A message save was attempted.
pub(crate) fn message_saved() {
    counter!(MESSAGES_SAVED).increment(1);
}

/// A drill-down level was answered from the cache.
pub(crate) fn index_hit(level: &'static str) {
    counter!(INDEX_HITS, "level" => level).increment(1);
}

/// A drill-down level had to backfill from the store.
pub(crate) fn index_miss(level: &'static str) {
    counter!(INDEX_MISSES, "level" => level).increment(1);
}

/// Number of dates read back by one backfill.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn index_backfill(dates: usize) {
    histogram!(INDEX_BACKFILLED_DATES).record(dates as f64);
}
