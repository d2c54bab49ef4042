//! Branch opening hours and the time windows derived from them

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BranchId;

/// Opening hours of a branch, in branch-local time
///
/// `closing_time < opening_time` describes an overnight window that closes on
/// the following day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHours {
    pub branch_id: BranchId,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    /// Offset of branch-local time from UTC
    pub utc_offset_minutes: i32,
}

impl BranchHours {
    pub fn is_overnight(&self) -> bool {
        self.closing_time < self.opening_time
    }

    fn offset(&self) -> Duration {
        Duration::minutes(i64::from(self.utc_offset_minutes))
    }

    pub fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.naive_utc() + self.offset()
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        (local - self.offset()).and_utc()
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.to_local(at).date()
    }

    /// Local opening moment of the business day starting on `date`
    pub fn opening_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.opening_time)
    }

    /// Local closing moment of the business day starting on `date`
    pub fn closing_at(&self, date: NaiveDate) -> NaiveDateTime {
        let closing_date = if self.is_overnight() {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        };
        closing_date.and_time(self.closing_time)
    }

    /// Closing moment of `date` plus `buffer`, in UTC
    pub fn closing_cutoff(&self, date: NaiveDate, buffer: Duration) -> DateTime<Utc> {
        self.to_utc(self.closing_at(date) + buffer)
    }

    /// Whether `at` falls inside `[opening, closing + buffer]` of any business day
    ///
    /// The previous day is checked too so that overnight windows and buffers
    /// running past midnight are honored.
    pub fn is_within_business_window(&self, at: DateTime<Utc>, buffer: Duration) -> bool {
        let local = self.to_local(at);
        let today = local.date();
        let candidates = [today.pred_opt(), Some(today)];
        candidates.into_iter().flatten().any(|day| {
            let start = self.opening_at(day);
            let end = self.closing_at(day) + buffer;
            local >= start && local <= end
        })
    }

    /// `[start, end)` of the local calendar day `date`, in UTC
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = date.and_time(NaiveTime::MIN);
        (self.to_utc(start), self.to_utc(start + Duration::days(1)))
    }
}

/// Cutoff for branches without configured hours: next UTC midnight plus `buffer`
pub fn default_closing_cutoff(date: NaiveDate, buffer: Duration) -> DateTime<Utc> {
    (date.and_time(NaiveTime::MIN) + Duration::days(1) + buffer).and_utc()
}

/// `[start, end)` of the UTC calendar day `date`
pub fn utc_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hours(open: (u32, u32), close: (u32, u32), offset: i32) -> BranchHours {
        BranchHours {
            branch_id: 1,
            opening_time: NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap(),
            utc_offset_minutes: offset,
        }
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_within_day_window() {
        let h = hours((8, 0), (22, 0), 0);
        let buffer = Duration::minutes(15);
        assert!(h.is_within_business_window(utc(2024, 6, 1, 12, 0), buffer));
        assert!(h.is_within_business_window(utc(2024, 6, 1, 22, 10), buffer));
        assert!(!h.is_within_business_window(utc(2024, 6, 1, 22, 20), buffer));
        assert!(!h.is_within_business_window(utc(2024, 6, 1, 7, 59), buffer));
    }

    #[test]
    fn test_overnight_window() {
        let h = hours((18, 0), (2, 0), 0);
        let buffer = Duration::minutes(15);
        assert!(h.is_overnight());
        assert!(h.is_within_business_window(utc(2024, 6, 1, 23, 0), buffer));
        assert!(h.is_within_business_window(utc(2024, 6, 2, 1, 30), buffer));
        assert!(h.is_within_business_window(utc(2024, 6, 2, 2, 14), buffer));
        assert!(!h.is_within_business_window(utc(2024, 6, 2, 3, 0), buffer));
        assert!(!h.is_within_business_window(utc(2024, 6, 2, 12, 0), buffer));
    }

    #[test]
    fn test_offset_applies() {
        // 08:00-22:00 at UTC+7 is 01:00-15:00 UTC
        let h = hours((8, 0), (22, 0), 7 * 60);
        let buffer = Duration::minutes(15);
        assert!(h.is_within_business_window(utc(2024, 6, 1, 2, 0), buffer));
        assert!(!h.is_within_business_window(utc(2024, 6, 1, 16, 0), buffer));
    }

    #[test]
    fn test_closing_cutoff_rolls_overnight() {
        let h = hours((18, 0), (2, 0), 0);
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(h.closing_cutoff(date, Duration::minutes(15)), utc(2024, 6, 2, 2, 15));

        let day = hours((8, 0), (22, 0), 0);
        assert_eq!(day.closing_cutoff(date, Duration::minutes(15)), utc(2024, 6, 1, 22, 15));
    }

    #[test]
    fn test_default_cutoff_is_next_midnight() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(default_closing_cutoff(date, Duration::minutes(15)), utc(2024, 6, 2, 0, 15));
    }

    #[test]
    fn test_day_bounds_with_offset() {
        let h = hours((8, 0), (22, 0), 7 * 60);
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (start, end) = h.day_bounds(date);
        assert_eq!(start, utc(2024, 5, 31, 17, 0));
        assert_eq!(end, utc(2024, 6, 1, 17, 0));
    }
}
