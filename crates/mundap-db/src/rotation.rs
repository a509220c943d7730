//! Deterministic daily question selection.
//!
//! The question for a day is the active question at index
//! `days_since_epoch(day) mod active_count` under the catalog ordering
//! (`order_num`, `created_at`, `id`). Nothing is stored per day: every caller
//! asking about the same service day gets the same question as long as the
//! active catalog is unchanged. Adding, removing or deactivating a question
//! shifts the index for every later day, which is accepted.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::DbResult;
use crate::models::QuestionRow;
use crate::store::Store;

/// Rotation index for `day`, or `None` when the catalog is empty.
pub fn daily_offset(day: NaiveDate, count: i64) -> Option<i64> {
    if count <= 0 {
        return None;
    }
    let days = day.signed_duration_since(DateTime::<Utc>::UNIX_EPOCH.date_naive()).num_days();
    Some(days.rem_euclid(count))
}

/// The service-local calendar day for `now`.
pub fn service_day(now: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDate {
    (now + Duration::hours(i64::from(utc_offset_hours))).date_naive()
}

pub fn service_today(utc_offset_hours: i32) -> NaiveDate {
    service_day(Utc::now(), utc_offset_hours)
}

pub async fn question_for_day(store: &dyn Store, day: NaiveDate) -> DbResult<Option<QuestionRow>> {
    let count = store.count_active_questions().await?;
    match daily_offset(day, count) {
        Some(offset) => store.active_question_at(offset).await,
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn offset_is_days_since_epoch_mod_count() {
        assert_eq!(daily_offset(day(1970, 1, 1), 30), Some(0));
        assert_eq!(daily_offset(day(1970, 1, 31), 30), Some(0));
        assert_eq!(daily_offset(day(1970, 1, 2), 30), Some(1));
        // 2024-01-01 is day 19723
        assert_eq!(daily_offset(day(2024, 1, 1), 30), Some(19723 % 30));
    }

    #[test]
    fn offset_before_epoch_stays_in_range() {
        assert_eq!(daily_offset(day(1969, 12, 31), 7), Some(6));
    }

    #[test]
    fn empty_catalog_has_no_offset() {
        assert_eq!(daily_offset(day(2024, 5, 5), 0), None);
        assert_eq!(daily_offset(day(2024, 5, 5), -3), None);
    }

    #[test]
    fn consecutive_days_advance_by_one() {
        let a = daily_offset(day(2024, 3, 10), 30).unwrap();
        let b = daily_offset(day(2024, 3, 11), 30).unwrap();
        assert_eq!((a + 1) % 30, b);
    }

    #[test]
    fn service_day_follows_offset() {
        // 16:00 UTC is already the next day in KST
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 16, 0, 0).unwrap();
        assert_eq!(service_day(now, 0), day(2024, 6, 1));
        assert_eq!(service_day(now, 9), day(2024, 6, 2));
    }

    #[tokio::test]
    async fn same_day_same_question() {
        let db = Database::open_in_memory().unwrap();
        let today = day(2024, 6, 2);
        let a = question_for_day(&db, today).await.unwrap().unwrap();
        let b = question_for_day(&db, today).await.unwrap().unwrap();
        assert_eq!(a.id, b.id);

        let tomorrow = question_for_day(&db, today.succ_opt().unwrap()).await.unwrap().unwrap();
        assert_ne!(a.id, tomorrow.id);
    }

    #[tokio::test]
    async fn no_active_questions_means_no_question() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE questions SET is_active = 0", [])?;
            Ok(())
        })
        .unwrap();
        assert!(question_for_day(&db, day(2024, 6, 2)).await.unwrap().is_none());
    }
}
