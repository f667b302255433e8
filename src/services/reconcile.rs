//! Bucket reconciliation shared by the updater and the refresher

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::types::{Period, PeriodLabels, Result, TallyError, TotalsRecord};

/// Which periodic buckets were reset by a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rollover {
    pub day: bool,
    pub week: bool,
    pub month: bool,
}

impl Rollover {
    pub fn any(&self) -> bool {
        self.day || self.week || self.month
    }
}

/// Zero every bucket whose stored label differs from `labels` and adopt
/// the new label. Stamps `updated_at` only when something changed.
pub fn roll_over(record: &mut TotalsRecord, labels: PeriodLabels, now: DateTime<Utc>) -> Rollover {
    let rollover = Rollover {
        day: reset_bucket(
            &record.subject,
            Period::Day,
            &mut record.total_day,
            &mut record.day_start,
            labels.day,
        ),
        week: reset_bucket(
            &record.subject,
            Period::Week,
            &mut record.total_week,
            &mut record.week_start,
            labels.week,
        ),
        month: reset_bucket(
            &record.subject,
            Period::Month,
            &mut record.total_month,
            &mut record.month_start,
            labels.month,
        ),
    };
    if rollover.any() {
        record.updated_at = now;
    }
    rollover
}

/// Fold one observation into all four buckets.
///
/// Leaves the record untouched if any sum would stop being finite.
pub fn add_amount(record: &mut TotalsRecord, amount: f64, now: DateTime<Utc>) -> Result<()> {
    let sums = [
        record.total_all + amount,
        record.total_day + amount,
        record.total_week + amount,
        record.total_month + amount,
    ];
    if sums.iter().any(|sum| !sum.is_finite()) {
        return Err(TallyError::InvalidObservation(format!(
            "adding {} would overflow the totals of {}",
            amount, record.subject
        )));
    }

    [
        record.total_all,
        record.total_day,
        record.total_week,
        record.total_month,
    ] = sums;
    record.updated_at = now;
    Ok(())
}

fn reset_bucket(
    subject: &str,
    period: Period,
    total: &mut f64,
    start: &mut NaiveDate,
    current: NaiveDate,
) -> bool {
    if *start == current {
        return false;
    }
    debug!(
        subject,
        bucket = %period,
        from = %start,
        to = %current,
        dropped = *total,
        "rolling over bucket"
    );
    *total = 0.0;
    *start = current;
    true
}
