//! `tac-kinetics` library crate.
//!
//! The binary (`tack`) is a thin wrapper around this library so that:
//!
//! - fitting and sampling are testable without spawning processes
//! - task files and the CLI share one execution pipeline
//! - reports and plots are plain strings the front-end decides how to print

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
