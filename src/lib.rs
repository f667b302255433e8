//! Rolling day/week/month totals per subject, pinned to one civil timezone.

pub mod cli;
pub mod config;
pub mod services;
pub mod store;
pub mod types;
