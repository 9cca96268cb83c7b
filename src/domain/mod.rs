//! Domain types used throughout the fit engine.
//!
//! This module defines:
//!
//! - the time-activity curve table (`TacTable`)
//! - parameter specifications with optional bounds (`ParamSpec`, `ParameterSpec`)
//! - the labelled curve bundle handed to reporting/plotting (`FitCurves`)

pub mod types;

pub use types::*;
