//! Numerical utilities: interpolation, quadrature, least squares, statistics.

pub mod interp;
pub mod ols;
pub mod quad;
pub mod stats;

pub use interp::*;
pub use ols::*;
pub use quad::*;
pub use stats::*;
