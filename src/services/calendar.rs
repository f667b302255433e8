//! Calendar resolver for the custom day/week/month periods
//!
//! Every label is computed from wall-clock time in one fixed civil
//! timezone, so processes running in different zones agree on the
//! period an instant belongs to.
//!
//! - Days are civil dates.
//! - Weeks start on a fixed weekday and span exactly 7 days.
//! - Months start on the anchor day (30 by default) and run until the
//!   day before the next month's anchor. Short months clamp the anchor to
//!   their last day, so February periods start on the 28th/29th.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::types::{PeriodLabels, Result, TallyError};

/// Half-open interval `[start, end)` of UTC instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Windows of the day, week and month containing an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindows {
    pub day: PeriodWindow,
    pub week: PeriodWindow,
    pub month: PeriodWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarRules {
    timezone: Tz,
    week_start: Weekday,
    month_anchor_day: u32,
}

impl Default for CalendarRules {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Ho_Chi_Minh,
            week_start: Weekday::Sun,
            month_anchor_day: 30,
        }
    }
}

impl CalendarRules {
    pub fn new(timezone: Tz, week_start: Weekday, month_anchor_day: u32) -> Result<Self> {
        if !(1..=31).contains(&month_anchor_day) {
            return Err(TallyError::Config(format!(
                "month anchor day must be within 1..=31, got {}",
                month_anchor_day
            )));
        }
        Ok(Self {
            timezone,
            week_start,
            month_anchor_day,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    pub fn month_anchor_day(&self) -> u32 {
        self.month_anchor_day
    }

    /// Civil date of `instant` in the configured zone
    pub fn civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    /// Resolve the canonical period labels for `instant`
    pub fn resolve(&self, instant: DateTime<Utc>) -> PeriodLabels {
        let date = self.civil_date(instant);
        PeriodLabels {
            day: date,
            week: self.week_label(date),
            month: self.month_label(date),
        }
    }

    /// Start of the week containing `date`
    pub fn week_label(&self, date: NaiveDate) -> NaiveDate {
        let offset = (7 + date.weekday().num_days_from_monday()
            - self.week_start.num_days_from_monday())
            % 7;
        date - Days::new(u64::from(offset))
    }

    /// Start of the anchor-to-anchor month containing `date`
    pub fn month_label(&self, date: NaiveDate) -> NaiveDate {
        let current = self.anchor(date.year(), date.month());
        if date >= current {
            current
        } else {
            let (year, month) = previous_month(date.year(), date.month());
            self.anchor(year, month)
        }
    }

    /// UTC windows of the periods containing `instant`
    pub fn windows(&self, instant: DateTime<Utc>) -> PeriodWindows {
        let labels = self.resolve(instant);

        let day_end = labels.day + Days::new(1);
        let week_end = labels.week + Days::new(7);
        let (next_year, next_month) = next_month(labels.month.year(), labels.month.month());
        let month_end = self.anchor(next_year, next_month);

        PeriodWindows {
            day: self.window(labels.day, day_end),
            week: self.window(labels.week, week_end),
            month: self.window(labels.month, month_end),
        }
    }

    fn window(&self, start: NaiveDate, end: NaiveDate) -> PeriodWindow {
        PeriodWindow {
            start: self.local_midnight(start),
            end: self.local_midnight(end),
        }
    }

    /// First instant of `date` in the configured zone.
    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        let local = self
            .timezone
            .from_local_datetime(&midnight)
            .earliest()
            .or_else(|| {
                // DST spring-forward: midnight doesn't exist, use 01:00
                let fallback = date.and_hms_opt(1, 0, 0).unwrap_or(midnight);
                self.timezone.from_local_datetime(&fallback).earliest()
            });
        match local {
            Some(dt) => dt.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&midnight),
        }
    }

    /// Anchor date of a civil month, clamped to the month's length
    fn anchor(&self, year: i32, month: u32) -> NaiveDate {
        let day = self.month_anchor_day.min(days_in_month(year, month));
        NaiveDate::from_ymd_opt(year, month, day).expect("anchor clamped to month length")
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if NaiveDate::from_ymd_opt(year, 2, 29).is_some() => 29,
        2 => 28,
        _ => 31,
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    /// Noon local time (UTC+7) on the given civil date
    fn local_noon(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 5, 0, 0).unwrap()
    }

    // ========== day tests ==========

    #[test]
    fn test_day_label_uses_civil_timezone() {
        let rules = CalendarRules::default();
        // 2024-05-31 18:00 UTC is already 2024-06-01 01:00 in Ho Chi Minh City
        let instant = Utc.with_ymd_and_hms(2024, 5, 31, 18, 0, 0).unwrap();
        assert_eq!(rules.resolve(instant).day, date(2024, 6, 1));

        let before = Utc.with_ymd_and_hms(2024, 5, 31, 16, 59, 59).unwrap();
        assert_eq!(rules.resolve(before).day, date(2024, 5, 31));
    }

    // ========== week tests ==========

    #[test]
    fn test_week_starts_on_sunday_by_default() {
        let rules = CalendarRules::default();
        // 2024-06-01 is a Saturday
        assert_eq!(rules.resolve(local_noon(2024, 6, 1)).week, date(2024, 5, 26));
        // 2024-06-02 is a Sunday and starts its own week
        assert_eq!(rules.resolve(local_noon(2024, 6, 2)).week, date(2024, 6, 2));
    }

    #[test]
    fn test_week_start_is_configurable() {
        let rules = CalendarRules::new(chrono_tz::Asia::Ho_Chi_Minh, Weekday::Mon, 30).unwrap();
        assert_eq!(rules.week_label(date(2024, 6, 1)), date(2024, 5, 27));
        assert_eq!(rules.week_label(date(2024, 6, 3)), date(2024, 6, 3));
        assert_eq!(rules.week_label(date(2024, 6, 2)), date(2024, 5, 27));
    }

    #[test]
    fn test_week_label_is_a_week_start_weekday() {
        let rules = CalendarRules::default();
        let mut day = date(2024, 1, 1);
        for _ in 0..60 {
            let label = rules.week_label(day);
            assert_eq!(label.weekday(), Weekday::Sun);
            assert!(label <= day && (day - label).num_days() < 7);
            day = day + Days::new(1);
        }
    }

    // ========== month tests ==========

    #[test]
    fn test_month_rule_switches_on_the_30th() {
        let rules = CalendarRules::default();
        assert_eq!(rules.resolve(local_noon(2024, 4, 29)).month, date(2024, 3, 30));
        assert_eq!(rules.resolve(local_noon(2024, 4, 30)).month, date(2024, 4, 30));
    }

    #[test]
    fn test_month_rule_31st_stays_in_current_period() {
        let rules = CalendarRules::default();
        assert_eq!(rules.month_label(date(2024, 5, 31)), date(2024, 5, 30));
        assert_eq!(rules.month_label(date(2024, 6, 1)), date(2024, 5, 30));
    }

    #[test]
    fn test_month_rule_wraps_year() {
        let rules = CalendarRules::default();
        assert_eq!(rules.month_label(date(2024, 1, 15)), date(2023, 12, 30));
        assert_eq!(rules.month_label(date(2023, 12, 31)), date(2023, 12, 30));
    }

    #[test]
    fn test_month_rule_clamps_february() {
        let rules = CalendarRules::default();
        // Non-leap year: the February period starts on the 28th
        assert_eq!(rules.month_label(date(2023, 2, 27)), date(2023, 1, 30));
        assert_eq!(rules.month_label(date(2023, 2, 28)), date(2023, 2, 28));
        assert_eq!(rules.month_label(date(2023, 3, 1)), date(2023, 2, 28));
        assert_eq!(rules.month_label(date(2023, 3, 29)), date(2023, 2, 28));
        assert_eq!(rules.month_label(date(2023, 3, 30)), date(2023, 3, 30));
        // Leap year: the 29th
        assert_eq!(rules.month_label(date(2024, 2, 28)), date(2024, 1, 30));
        assert_eq!(rules.month_label(date(2024, 2, 29)), date(2024, 2, 29));
    }

    #[test]
    fn test_month_label_never_after_date() {
        let rules = CalendarRules::default();
        let mut day = date(2023, 1, 1);
        for _ in 0..800 {
            let label = rules.month_label(day);
            assert!(label <= day, "{} resolved to later label {}", day, label);
            assert!((day - label).num_days() <= 31);
            day = day + Days::new(1);
        }
    }

    #[test]
    fn test_anchor_day_validation() {
        assert!(CalendarRules::new(chrono_tz::UTC, Weekday::Sun, 0).is_err());
        assert!(CalendarRules::new(chrono_tz::UTC, Weekday::Sun, 32).is_err());
        assert!(CalendarRules::new(chrono_tz::UTC, Weekday::Sun, 1).is_ok());
    }

    #[test]
    fn test_anchor_day_one_is_gregorian_month() {
        let rules = CalendarRules::new(chrono_tz::UTC, Weekday::Sun, 1).unwrap();
        assert_eq!(rules.month_label(date(2024, 4, 29)), date(2024, 4, 1));
        assert_eq!(rules.month_label(date(2024, 4, 1)), date(2024, 4, 1));
    }

    // ========== window tests ==========

    #[test]
    fn test_day_window_is_local_midnight_in_utc() {
        let rules = CalendarRules::default();
        let windows = rules.windows(local_noon(2024, 6, 1));
        assert_eq!(
            windows.day.start,
            Utc.with_ymd_and_hms(2024, 5, 31, 17, 0, 0).unwrap()
        );
        assert_eq!(
            windows.day.end,
            Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap()
        );
        assert!(windows.day.contains(local_noon(2024, 6, 1)));
        assert!(!windows.day.contains(windows.day.end));
    }

    #[test]
    fn test_week_window_spans_seven_days() {
        let rules = CalendarRules::default();
        let windows = rules.windows(local_noon(2024, 6, 1));
        assert_eq!((windows.week.end - windows.week.start).num_days(), 7);
        assert_eq!(
            windows.week.start,
            Utc.with_ymd_and_hms(2024, 5, 25, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_month_window_runs_to_next_anchor() {
        let rules = CalendarRules::default();
        let windows = rules.windows(local_noon(2024, 4, 29));
        assert_eq!(
            windows.month.start,
            Utc.with_ymd_and_hms(2024, 3, 29, 17, 0, 0).unwrap()
        );
        assert_eq!(
            windows.month.end,
            Utc.with_ymd_and_hms(2024, 4, 29, 17, 0, 0).unwrap()
        );

        let january = rules.windows(local_noon(2023, 1, 31));
        // Next anchor clamps to February 28th
        assert_eq!(
            january.month.end,
            Utc.with_ymd_and_hms(2023, 2, 27, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_windows_handle_dst_gap() {
        // Santiago skips local midnight on the spring-forward day
        let rules = CalendarRules::new(chrono_tz::America::Santiago, Weekday::Sun, 30).unwrap();
        let instant = Utc.with_ymd_and_hms(2023, 9, 3, 15, 0, 0).unwrap();
        let windows = rules.windows(instant);
        assert!(windows.day.contains(instant));
        assert!(windows.day.start < windows.day.end);
    }
}
