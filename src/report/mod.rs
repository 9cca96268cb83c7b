//! Reporting utilities: fit reports, posterior summaries and model listings.

pub mod format;

pub use format::*;
