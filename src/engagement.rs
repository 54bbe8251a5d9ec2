// Engagement aggregation: collapse activity timestamps from every source
// into unique calendar days, then derive streak statistics from them.
//
// Nothing in here touches the database. Rows are read through the
// `EngagementStore` trait, which the module implements for `ReducerContext`.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// Where an engagement timestamp came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementKind {
    Submission,
    XpTransaction,
    TaskAssignment,
    Spin,
    StreakLog,
}

/// A single raw activity timestamp (micros since unix epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementStamp {
    pub kind: EngagementKind,
    pub at_micros: i64,
}

/// Read side of the five engagement sources.
/// Implementations return every qualifying timestamp for the user;
/// filtering by transaction type / assignment status happens there.
pub trait EngagementStore {
    fn engagement_stamps(&self, user_id: &str) -> Vec<EngagementStamp>;
}

/// Derived streak statistics, recomputed on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreakSummary {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_days: u32,
    pub last_activity: Option<NaiveDate>,
}

/// Unique engagement days for one user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngagementDates {
    days: BTreeSet<NaiveDate>,
}

impl EngagementDates {
    pub fn from_days(days: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            days: days.into_iter().collect(),
        }
    }

    /// Most recent first
    pub fn iter_recent_first(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.iter().rev().copied()
    }

    pub fn most_recent(&self) -> Option<NaiveDate> {
        self.days.last().copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// ISO `YYYY-MM-DD` strings, most recent first (calendar widget format)
    pub fn to_calendar_strings(&self) -> Vec<String> {
        self.iter_recent_first().map(|d| d.to_string()).collect()
    }
}

fn day_offset(offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

/// Calendar day a timestamp falls on, with days starting at
/// `offset_minutes` east of UTC.
pub fn calendar_day(micros: i64, offset_minutes: i32) -> NaiveDate {
    DateTime::from_timestamp_micros(micros)
        .map(|utc| utc.with_timezone(&day_offset(offset_minutes)).date_naive())
        .unwrap_or(NaiveDate::MIN)
}

/// Gather every engagement source for `user_id` and dedupe by calendar day.
/// Unset (epoch zero) timestamps are ignored.
pub fn collect_engagement_dates<S>(store: &S, user_id: &str, offset_minutes: i32) -> EngagementDates
where
    S: EngagementStore + ?Sized,
{
    let days = store
        .engagement_stamps(user_id)
        .into_iter()
        .filter(|stamp| stamp.at_micros != 0)
        .map(|stamp| calendar_day(stamp.at_micros, offset_minutes));
    EngagementDates::from_days(days)
}

/// Derive streak statistics as of `today`.
///
/// The current streak counts back from `today` and stops at the first gap:
/// if there is no activity today it is zero even when yesterday was active.
/// The longest streak is the longest run of consecutive days anywhere in the
/// history, so it is never smaller than the current one.
pub fn compute_streak(dates: &EngagementDates, today: NaiveDate) -> StreakSummary {
    let Some(last_activity) = dates.most_recent() else {
        return StreakSummary::default();
    };

    let mut current_streak = 0u32;
    let mut expected = today;
    for day in dates.iter_recent_first() {
        if day == expected {
            current_streak += 1;
            match expected.pred_opt() {
                Some(prev) => expected = prev,
                None => break,
            }
        } else if day < expected {
            break;
        }
        // days after `today` are skipped
    }

    let mut longest_streak = 1u32;
    let mut run = 1u32;
    let mut prev = last_activity;
    for day in dates.iter_recent_first().skip(1) {
        if prev.signed_duration_since(day).num_days() == 1 {
            run += 1;
            longest_streak = longest_streak.max(run);
        } else {
            run = 1;
        }
        prev = day;
    }

    StreakSummary {
        current_streak,
        longest_streak,
        total_days: dates.len() as u32,
        last_activity: Some(last_activity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn micros(day: NaiveDate, hour: u32) -> i64 {
        day.and_hms_opt(hour, 0, 0).unwrap().and_utc().timestamp_micros()
    }

    struct FakeStore {
        stamps: Vec<EngagementStamp>,
    }

    impl EngagementStore for FakeStore {
        fn engagement_stamps(&self, _user_id: &str) -> Vec<EngagementStamp> {
            self.stamps.clone()
        }
    }

    fn stamp(kind: EngagementKind, day: NaiveDate, hour: u32) -> EngagementStamp {
        EngagementStamp { kind, at_micros: micros(day, hour) }
    }

    #[test]
    fn test_empty_history() {
        let summary = compute_streak(&EngagementDates::default(), date(2024, 6, 10));
        assert_eq!(summary, StreakSummary {
            current_streak: 0,
            longest_streak: 0,
            total_days: 0,
            last_activity: None,
        });
    }

    #[test]
    fn test_streak_with_gap() {
        let dates = EngagementDates::from_days([
            date(2024, 6, 10),
            date(2024, 6, 9),
            date(2024, 6, 8),
            date(2024, 6, 5),
        ]);
        let summary = compute_streak(&dates, date(2024, 6, 10));
        assert_eq!(summary.current_streak, 3);
        assert_eq!(summary.longest_streak, 3);
        assert_eq!(summary.total_days, 4);
        assert_eq!(summary.last_activity, Some(date(2024, 6, 10)));
    }

    #[test]
    fn test_single_day_today() {
        let dates = EngagementDates::from_days([date(2024, 6, 10)]);
        let summary = compute_streak(&dates, date(2024, 6, 10));
        assert_eq!(summary.current_streak, 1);
        assert_eq!(summary.longest_streak, 1);
    }

    #[test]
    fn test_single_day_in_past() {
        // Yesterday counts for longest but today's slot is empty
        let dates = EngagementDates::from_days([date(2024, 6, 9)]);
        let summary = compute_streak(&dates, date(2024, 6, 10));
        assert_eq!(summary.current_streak, 0);
        assert_eq!(summary.longest_streak, 1);
        assert_eq!(summary.total_days, 1);
    }

    #[test]
    fn test_longest_run_older_than_current() {
        let dates = EngagementDates::from_days([
            date(2024, 6, 10),
            date(2024, 6, 1),
            date(2024, 5, 31),
            date(2024, 5, 30),
            date(2024, 5, 29),
            date(2024, 5, 20),
        ]);
        let summary = compute_streak(&dates, date(2024, 6, 10));
        assert_eq!(summary.current_streak, 1);
        assert_eq!(summary.longest_streak, 4);
        assert_eq!(summary.total_days, 6);
    }

    #[test]
    fn test_run_across_month_boundary() {
        let dates = EngagementDates::from_days([date(2024, 3, 1), date(2024, 2, 29), date(2024, 2, 28)]);
        let summary = compute_streak(&dates, date(2024, 3, 1));
        assert_eq!(summary.current_streak, 3);
        assert_eq!(summary.longest_streak, 3);
    }

    #[test]
    fn test_future_dates_are_skipped_for_current() {
        let dates = EngagementDates::from_days([date(2024, 6, 12), date(2024, 6, 10), date(2024, 6, 9)]);
        let summary = compute_streak(&dates, date(2024, 6, 10));
        assert_eq!(summary.current_streak, 2);
        assert_eq!(summary.last_activity, Some(date(2024, 6, 12)));
    }

    #[test]
    fn test_today_present_means_nonzero_streak() {
        let today = date(2024, 6, 10);
        let histories = [
            vec![today],
            vec![today, date(2024, 1, 1)],
            vec![today, date(2024, 6, 8), date(2024, 6, 7)],
        ];
        for days in histories {
            let summary = compute_streak(&EngagementDates::from_days(days), today);
            assert!(summary.current_streak >= 1);
            assert!(summary.longest_streak >= summary.current_streak);
        }
    }

    #[test]
    fn test_today_absent_means_zero_streak() {
        let today = date(2024, 6, 10);
        let histories = [
            vec![date(2024, 6, 9)],
            vec![date(2024, 6, 9), date(2024, 6, 8), date(2024, 6, 7)],
            vec![date(2023, 12, 31)],
        ];
        for days in histories {
            let summary = compute_streak(&EngagementDates::from_days(days), today);
            assert_eq!(summary.current_streak, 0);
            assert!(summary.longest_streak >= summary.current_streak);
        }
    }

    #[test]
    fn test_duplicate_sources_same_day_count_once() {
        let day = date(2024, 6, 10);
        let store = FakeStore {
            stamps: vec![
                stamp(EngagementKind::Submission, day, 9),
                stamp(EngagementKind::XpTransaction, day, 10),
                stamp(EngagementKind::TaskAssignment, day, 11),
                stamp(EngagementKind::Spin, day, 15),
                stamp(EngagementKind::StreakLog, day, 0),
                stamp(EngagementKind::Spin, date(2024, 6, 9), 23),
            ],
        };
        let dates = collect_engagement_dates(&store, "amb-1", 0);
        assert_eq!(dates.len(), 2);
        assert_eq!(dates.to_calendar_strings(), vec!["2024-06-10", "2024-06-09"]);

        let summary = compute_streak(&dates, day);
        assert_eq!(summary.total_days, 2);
        assert_eq!(summary.current_streak, 2);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let store = FakeStore {
            stamps: vec![
                stamp(EngagementKind::Submission, date(2024, 6, 3), 12),
                stamp(EngagementKind::Spin, date(2024, 6, 1), 8),
            ],
        };
        let first = collect_engagement_dates(&store, "amb-1", 0);
        let second = collect_engagement_dates(&store, "amb-1", 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unset_timestamps_ignored() {
        let store = FakeStore {
            stamps: vec![EngagementStamp { kind: EngagementKind::StreakLog, at_micros: 0 }],
        };
        assert!(collect_engagement_dates(&store, "amb-1", 0).is_empty());
    }

    #[test]
    fn test_calendar_day_offset() {
        // 2024-06-10 03:00 UTC is still June 9th in UTC-8
        let at = micros(date(2024, 6, 10), 3);
        assert_eq!(calendar_day(at, 0), date(2024, 6, 10));
        assert_eq!(calendar_day(at, -8 * 60), date(2024, 6, 9));
        // and 22:00 UTC is already June 11th in UTC+5:30
        let late = micros(date(2024, 6, 10), 22);
        assert_eq!(calendar_day(late, 330), date(2024, 6, 11));
    }
}
