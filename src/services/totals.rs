//! Rolling totals service: incremental updates, lazy rollover and queries
//!
//! There is no background scheduler. Buckets roll over when the next
//! observation or read for a subject notices that its stored period label
//! no longer matches the calendar. Every mutation of a subject runs under
//! that subject's lock and through the store's atomic `update`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::calendar::CalendarRules;
use super::locks::SubjectLocks;
use super::reconcile::{add_amount, roll_over};
use crate::store::TotalsStore;
use crate::types::{
    LeaderboardEntry, Observation, Page, Period, PeriodLabels, PeriodSummary, RefreshFailure,
    RefreshReport, Result, TallyError, TotalsRecord, Wager,
};

pub struct TotalsService {
    store: Box<dyn TotalsStore>,
    calendar: CalendarRules,
    locks: SubjectLocks,
}

impl TotalsService {
    pub fn new(store: Box<dyn TotalsStore>, calendar: CalendarRules) -> Self {
        Self {
            store,
            calendar,
            locks: SubjectLocks::new(),
        }
    }

    pub fn calendar(&self) -> &CalendarRules {
        &self.calendar
    }

    pub fn store(&self) -> &dyn TotalsStore {
        self.store.as_ref()
    }

    // ========== Incremental updater ==========

    /// Record one observation for `subject`, creating its record if needed
    pub fn apply(&self, subject: &str, amount: f64) -> Result<TotalsRecord> {
        self.apply_at(subject, amount, Utc::now())
    }

    /// Record one observation as if the current time were `now`
    pub fn apply_at(&self, subject: &str, amount: f64, now: DateTime<Utc>) -> Result<TotalsRecord> {
        let observation = Observation::new(subject, amount)?;
        let labels = self.calendar.resolve(now);

        let mut rejected = None;
        let updated = self.locks.with(&observation.subject, || {
            self.store.update(&observation.subject, &mut |slot| {
                let mut record = slot
                    .clone()
                    .unwrap_or_else(|| TotalsRecord::new(&observation.subject, labels, now));
                roll_over(&mut record, labels, now);
                match add_amount(&mut record, observation.amount, now) {
                    Ok(()) => {
                        *slot = Some(record);
                        true
                    }
                    Err(e) => {
                        rejected = Some(e);
                        false
                    }
                }
            })
        })?;
        if let Some(e) = rejected {
            return Err(e);
        }

        debug!(subject = %observation.subject, amount, "applied observation");
        updated.ok_or_else(|| {
            TallyError::StorageUnavailable(format!(
                "store returned no record for {} after update",
                observation.subject
            ))
        })
    }

    // ========== Lazy refresher ==========

    /// Roll over stale buckets for one subject. `None` if the subject has no record.
    pub fn refresh_one(&self, subject: &str) -> Result<Option<TotalsRecord>> {
        self.refresh_one_at(subject, Utc::now())
    }

    pub fn refresh_one_at(
        &self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TotalsRecord>> {
        let labels = self.calendar.resolve(now);
        self.reconcile(subject, labels, now).map(|(record, _)| record)
    }

    /// Roll over stale buckets for every subject, continuing past per-subject failures
    pub fn refresh_all(&self) -> Result<RefreshReport> {
        self.refresh_all_at(Utc::now())
    }

    pub fn refresh_all_at(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        let labels = self.calendar.resolve(now);
        let subjects = self.store.subjects()?;

        let mut report = RefreshReport {
            scanned: subjects.len(),
            ..RefreshReport::default()
        };
        for subject in subjects {
            match self.reconcile(&subject, labels, now) {
                Ok((_, true)) => report.rolled_over += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    warn!(%subject, "refresh failed: {}", e);
                    report.failures.push(RefreshFailure {
                        subject,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.rolled_over > 0 {
            info!(
                scanned = report.scanned,
                rolled_over = report.rolled_over,
                day = %labels.day,
                week = %labels.week,
                month = %labels.month,
                "rolled over stale buckets"
            );
        }
        Ok(report)
    }

    fn reconcile(
        &self,
        subject: &str,
        labels: PeriodLabels,
        now: DateTime<Utc>,
    ) -> Result<(Option<TotalsRecord>, bool)> {
        let mut rolled = false;
        let record = self.locks.with(subject, || {
            self.store.update(subject, &mut |slot| {
                rolled = match slot.as_mut() {
                    Some(record) => roll_over(record, labels, now).any(),
                    None => false,
                };
                rolled
            })
        })?;
        Ok((record, rolled))
    }

    /// Refresh before a listing; failures are logged, not fatal to the read
    fn refresh_for_read(&self, now: DateTime<Utc>) -> Result<()> {
        let report = self.refresh_all_at(now)?;
        if !report.is_clean() {
            warn!(
                failures = report.failures.len(),
                "serving listing with unrefreshed subjects"
            );
        }
        Ok(())
    }

    // ========== Query surface ==========

    /// Point lookup, refreshed first
    pub fn get(&self, subject: &str) -> Result<TotalsRecord> {
        self.get_at(subject, Utc::now())
    }

    pub fn get_at(&self, subject: &str, now: DateTime<Utc>) -> Result<TotalsRecord> {
        self.refresh_one_at(subject, now)?
            .ok_or_else(|| TallyError::NotFound(subject.to_string()))
    }

    /// Top `limit` subjects by the chosen bucket (ties by subject ascending)
    pub fn top(&self, period: Period, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.top_at(period, limit, Utc::now())
    }

    pub fn top_at(
        &self,
        period: Period,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.refresh_for_read(now)?;
        let mut records = self.store.load_all()?;
        sort_by_bucket(&mut records, period);

        Ok(records
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, record)| LeaderboardEntry {
                rank: i + 1,
                total: record.total(period),
                subject: record.subject,
                day_start: record.day_start,
                week_start: record.week_start,
                month_start: record.month_start,
                updated_at: record.updated_at,
            })
            .collect())
    }

    /// Page through all records ordered by `total_all` descending (1-based pages)
    pub fn list(&self, page: usize, page_size: usize) -> Result<Page<TotalsRecord>> {
        self.list_at(page, page_size, Utc::now())
    }

    pub fn list_at(
        &self,
        page: usize,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Page<TotalsRecord>> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        self.refresh_for_read(now)?;
        let mut records = self.store.load_all()?;
        sort_by_bucket(&mut records, Period::All);

        let total_items = records.len();
        let offset = (page - 1).saturating_mul(page_size);
        let items = records.into_iter().skip(offset).take(page_size).collect();

        Ok(Page {
            page,
            page_size,
            total_items,
            total_pages: total_items.div_ceil(page_size),
            items,
        })
    }

    /// Bucket sums across all subjects for the current periods
    pub fn summary(&self) -> Result<PeriodSummary> {
        self.summary_at(Utc::now())
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> Result<PeriodSummary> {
        self.refresh_for_read(now)?;
        let records = self.store.load_all()?;

        let mut summary = PeriodSummary {
            labels: self.calendar.resolve(now),
            subjects: records.len(),
            total_all: 0.0,
            total_day: 0.0,
            total_week: 0.0,
            total_month: 0.0,
        };
        for record in &records {
            summary.total_all += record.total_all;
            summary.total_day += record.total_day;
            summary.total_week += record.total_week;
            summary.total_month += record.total_month;
        }
        Ok(summary)
    }

    // ========== History rebuild ==========

    /// Recompute records from a full wager history.
    ///
    /// Periodic totals only count wagers inside the current period windows.
    /// Existing records of subjects in `history` are replaced; other
    /// subjects are left as they are. Returns the number of records written.
    pub fn rebuild(&self, history: &[Wager]) -> Result<usize> {
        self.rebuild_at(history, Utc::now())
    }

    pub fn rebuild_at(&self, history: &[Wager], now: DateTime<Utc>) -> Result<usize> {
        for wager in history {
            wager.validate()?;
        }

        let labels = self.calendar.resolve(now);
        let windows = self.calendar.windows(now);

        let mut rebuilt: BTreeMap<&str, TotalsRecord> = BTreeMap::new();
        for wager in history {
            let record = rebuilt
                .entry(wager.subject.as_str())
                .or_insert_with(|| TotalsRecord::new(&wager.subject, labels, now));
            record.total_all += wager.amount;
            if windows.day.contains(wager.at) {
                record.total_day += wager.amount;
            }
            if windows.week.contains(wager.at) {
                record.total_week += wager.amount;
            }
            if windows.month.contains(wager.at) {
                record.total_month += wager.amount;
            }
        }

        let mut written = 0;
        for (subject, record) in rebuilt {
            self.locks.with(subject, || {
                self.store.update(subject, &mut |slot| {
                    *slot = Some(record.clone());
                    true
                })
            })?;
            written += 1;
        }

        info!(
            wagers = history.len(),
            subjects = written,
            store = self.store.name(),
            "rebuilt totals from history"
        );
        Ok(written)
    }
}

fn sort_by_bucket(records: &mut [TotalsRecord], period: Period) {
    records.sort_by(|a, b| {
        b.total(period)
            .total_cmp(&a.total(period))
            .then_with(|| a.subject.cmp(&b.subject))
    });
}
