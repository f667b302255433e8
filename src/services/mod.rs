//! Services for calendar resolution and rolling aggregation

pub mod calendar;
pub mod locks;
pub mod reconcile;
pub mod totals;

pub use calendar::{CalendarRules, PeriodWindow, PeriodWindows};
pub use totals::TotalsService;
