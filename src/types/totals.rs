//! Per-subject rolling totals and the shapes returned by queries

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Result, TallyError};

/// Canonical start dates of the day, week and month containing an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLabels {
    pub day: NaiveDate,
    pub week: NaiveDate,
    pub month: NaiveDate,
}

/// One of the four buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    All,
    Day,
    Week,
    Month,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::All => "all",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Period::All),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(format!(
                "unknown period '{}' (expected all, day, week or month)",
                other
            )),
        }
    }
}

/// Aggregate record, one per subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalsRecord {
    pub subject: String,
    pub total_all: f64,
    pub total_day: f64,
    pub day_start: NaiveDate,
    pub total_week: f64,
    pub week_start: NaiveDate,
    pub total_month: f64,
    pub month_start: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl TotalsRecord {
    /// Fresh record with zero sums, stamped with the given labels
    pub fn new(subject: &str, labels: PeriodLabels, now: DateTime<Utc>) -> Self {
        Self {
            subject: subject.to_string(),
            total_all: 0.0,
            total_day: 0.0,
            day_start: labels.day,
            total_week: 0.0,
            week_start: labels.week,
            total_month: 0.0,
            month_start: labels.month,
            updated_at: now,
        }
    }

    pub fn total(&self, period: Period) -> f64 {
        match period {
            Period::All => self.total_all,
            Period::Day => self.total_day,
            Period::Week => self.total_week,
            Period::Month => self.total_month,
        }
    }

    pub fn labels(&self) -> PeriodLabels {
        PeriodLabels {
            day: self.day_start,
            week: self.week_start,
            month: self.month_start,
        }
    }
}

/// A single wagered amount for a subject, validated at the edge
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub subject: String,
    pub amount: f64,
}

impl Observation {
    pub fn new(subject: &str, amount: f64) -> Result<Self> {
        validate(subject, amount)?;
        Ok(Self {
            subject: subject.to_string(),
            amount,
        })
    }
}

/// Historic wager with its event time (one JSON object per history line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    #[serde(alias = "username")]
    pub subject: String,
    pub amount: f64,
    #[serde(alias = "time")]
    pub at: DateTime<Utc>,
}

impl Wager {
    pub fn validate(&self) -> Result<()> {
        validate(&self.subject, self.amount)
    }
}

fn validate(subject: &str, amount: f64) -> Result<()> {
    if subject.trim().is_empty() {
        return Err(TallyError::InvalidObservation("subject is empty".into()));
    }
    if !amount.is_finite() {
        return Err(TallyError::InvalidObservation(format!(
            "amount for {} is not finite: {}",
            subject, amount
        )));
    }
    Ok(())
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub subject: String,
    pub total: f64,
    pub day_start: NaiveDate,
    pub week_start: NaiveDate,
    pub month_start: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

/// A page of a listing (1-based)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub items: Vec<T>,
}

/// Subject whose reconciliation failed during a bulk refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshFailure {
    pub subject: String,
    pub error: String,
}

/// Outcome of a bulk refresh
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RefreshReport {
    pub scanned: usize,
    pub rolled_over: usize,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Bucket sums across every subject
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub labels: PeriodLabels,
    pub subjects: usize,
    pub total_all: f64,
    pub total_day: f64,
    pub total_week: f64,
    pub total_month: f64,
}
