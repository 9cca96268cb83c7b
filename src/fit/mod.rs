//! Curve fitting.
//!
//! Responsibilities:
//!
//! - least-squares fitting with bounded parameters and uncertainty bands
//! - Gaussian log-posterior and ensemble MCMC sampling with diagnostics
//! - dispatching a fit task to the selected strategy

pub mod autocorr;
pub mod bounds;
pub mod leastsq;
pub mod logprob;
pub mod orchestrator;
pub mod sampler;

pub use autocorr::*;
pub use bounds::*;
pub use leastsq::*;
pub use logprob::*;
pub use orchestrator::*;
pub use sampler::*;
