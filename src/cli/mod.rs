pub mod history;

use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::Config;
use crate::services::TotalsService;
use crate::types::{LeaderboardEntry, Page, Period, PeriodSummary, RefreshReport, TotalsRecord};

/// Rolling day/week/month wager totals
#[derive(Parser)]
#[command(name = "wagertally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.wagertally/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record one wagered amount for a subject
    Record {
        subject: String,
        #[arg(allow_negative_numbers = true)]
        amount: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one subject's totals
    Show {
        subject: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Leaderboard by bucket
    Top {
        /// all, day, week or month
        #[arg(long, default_value = "all")]
        period: Period,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all subjects by all-time total
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 500)]
        page_size: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Bucket sums across all subjects
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll over stale buckets for every subject
    Refresh {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recompute totals from a JSON Lines wager history
    Rebuild {
        #[arg(long = "from", value_name = "HISTORY")]
        from: PathBuf,
    },
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let service = TotalsService::new(config.open_store()?, config.calendar()?);
        let mut out = std::io::stdout().lock();
        self.command.execute(&service, &mut out)
    }
}

impl Commands {
    fn execute(self, service: &TotalsService, out: &mut impl Write) -> anyhow::Result<()> {
        match self {
            Commands::Record {
                subject,
                amount,
                json,
            } => {
                let record = service.apply(&subject, amount)?;
                emit(out, json, &record, format_record)
            }
            Commands::Show { subject, json } => {
                let record = service.get(&subject)?;
                emit(out, json, &record, format_record)
            }
            Commands::Top {
                period,
                limit,
                json,
            } => {
                let entries = service.top(period, limit)?;
                emit(out, json, &entries, |e| format_leaderboard(period, e))
            }
            Commands::List {
                page,
                page_size,
                json,
            } => {
                let page = service.list(page, page_size)?;
                emit(out, json, &page, format_page)
            }
            Commands::Summary { json } => {
                let summary = service.summary()?;
                emit(out, json, &summary, format_summary)
            }
            Commands::Refresh { json } => {
                let report = service.refresh_all()?;
                emit(out, json, &report, format_refresh)
            }
            Commands::Rebuild { from } => {
                let wagers = history::read_history(&from)?;
                let written = service.rebuild(&wagers)?;
                writeln!(
                    out,
                    "Rebuilt {} subjects from {} wagers",
                    written,
                    wagers.len()
                )?;
                Ok(())
            }
        }
    }
}

fn emit<T: Serialize + ?Sized>(
    out: &mut impl Write,
    json: bool,
    value: &T,
    text: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    } else {
        write!(out, "{}", text(value))?;
    }
    Ok(())
}

fn format_record(record: &TotalsRecord) -> String {
    format_buckets(
        &record.subject,
        record.total_all,
        [
            ("day", record.total_day, record.day_start),
            ("week", record.total_week, record.week_start),
            ("month", record.total_month, record.month_start),
        ],
    )
}

fn format_buckets(header: &str, total_all: f64, periodic: [(&str, f64, NaiveDate); 3]) -> String {
    let mut text = format!("{}\n  {:<6} {:>14.2}\n", header, "all", total_all);
    for (name, total, since) in periodic {
        text.push_str(&format!("  {:<6} {:>14.2}  since {}\n", name, total, since));
    }
    text
}

fn format_leaderboard(period: Period, entries: &[LeaderboardEntry]) -> String {
    let mut text = format!("Top {} by {}\n", entries.len(), period);
    for entry in entries {
        text.push_str(&format!(
            "{:>4}. {:<24} {:>14.2}\n",
            entry.rank, entry.subject, entry.total
        ));
    }
    text
}

fn format_page(page: &Page<TotalsRecord>) -> String {
    let mut text = format!(
        "Page {}/{} ({} subjects)\n{:<24} {:>14} {:>14} {:>14} {:>14}\n",
        page.page,
        page.total_pages,
        page.total_items,
        "subject",
        "all",
        "day",
        "week",
        "month"
    );
    for record in &page.items {
        text.push_str(&format!(
            "{:<24} {:>14.2} {:>14.2} {:>14.2} {:>14.2}\n",
            record.subject,
            record.total_all,
            record.total_day,
            record.total_week,
            record.total_month
        ));
    }
    text
}

fn format_summary(summary: &PeriodSummary) -> String {
    format_buckets(
        &format!("{} subjects", summary.subjects),
        summary.total_all,
        [
            ("day", summary.total_day, summary.labels.day),
            ("week", summary.total_week, summary.labels.week),
            ("month", summary.total_month, summary.labels.month),
        ],
    )
}

fn format_refresh(report: &RefreshReport) -> String {
    let mut text = format!(
        "Scanned {} subjects, rolled over {}\n",
        report.scanned, report.rolled_over
    );
    for failure in &report.failures {
        text.push_str(&format!("  failed {}: {}\n", failure.subject, failure.error));
    }
    text
}
