//! Terminal plotting sink for fits and sampler chains.

pub mod ascii;

pub use ascii::*;
