//! Impulse-response kernels of the convolution models.
//!
//! Each kernel is defined on `[0, ∞)` as a function of the elapsed time
//! `s = t - τ` since the input entered the tissue.

/// Logistic step-down normalised so that the kernel equals `amp` at `s = 0`:
///
/// `amp * (1 + exp(-extent/width)) / (1 + exp((s - extent)/width))`
///
/// `width` must be positive; zero is a caller contract violation.
pub fn fermi(s: f64, amp: f64, extent: f64, width: f64) -> f64 {
    amp * (1.0 + (-extent / width).exp()) / (1.0 + ((s - extent) / width).exp())
}

/// A parametric response kernel with its parameters bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    /// `amp` on `[0, extent)`, else 0.
    Step { amp: f64, extent: f64 },
    /// `amp1 + amp2` on `[0, extent1)`, `amp2` on `[extent1, extent2)`, else 0.
    Step2 {
        amp1: f64,
        extent1: f64,
        amp2: f64,
        extent2: f64,
    },
    /// Step of height `amp1` on `[0, extent1)` plus a Fermi decay.
    StepFermi {
        amp1: f64,
        extent1: f64,
        amp2: f64,
        extent2: f64,
        width2: f64,
    },
    /// Sum of two Fermi decays.
    Fermi2 {
        amp1: f64,
        extent1: f64,
        width1: f64,
        amp2: f64,
        extent2: f64,
        width2: f64,
    },
}

impl Response {
    /// Kernel value after elapsed time `s`.
    pub fn value(&self, s: f64) -> f64 {
        match *self {
            Response::Step { amp, extent } => {
                if s < extent {
                    amp
                } else {
                    0.0
                }
            }
            Response::Step2 {
                amp1,
                extent1,
                amp2,
                extent2,
            } => {
                if s < extent1 {
                    amp1 + amp2
                } else if s < extent2 {
                    amp2
                } else {
                    0.0
                }
            }
            Response::StepFermi {
                amp1,
                extent1,
                amp2,
                extent2,
                width2,
            } => {
                let decay = fermi(s, amp2, extent2, width2);
                if s < extent1 { decay + amp1 } else { decay }
            }
            Response::Fermi2 {
                amp1,
                extent1,
                width1,
                amp2,
                extent2,
                width2,
            } => fermi(s, amp1, extent1, width1) + fermi(s, amp2, extent2, width2),
        }
    }

    /// Elapsed times at which the kernel jumps or turns sharply.
    pub fn edges(&self) -> Vec<f64> {
        match *self {
            Response::Step { extent, .. } => vec![extent],
            Response::Step2 { extent1, extent2, .. } => vec![extent1, extent2],
            Response::StepFermi { extent1, extent2, .. } => vec![extent1, extent2],
            Response::Fermi2 { extent1, extent2, .. } => vec![extent1, extent2],
        }
    }
}
