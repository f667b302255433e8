//! Type definitions for wagertally

mod error;
mod totals;

pub use error::*;
pub use totals::*;
