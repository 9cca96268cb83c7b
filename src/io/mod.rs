//! Input/output helpers.
//!
//! - tab-delimited table read/write (`table`)
//! - JSON task files (`task`)
//! - result exports (table/JSON) (`export`)

pub mod export;
pub mod table;
pub mod task;

pub use export::*;
pub use table::*;
pub use task::*;
