//! Integrated autocorrelation time of ensemble chains.
//!
//! For each parameter the normalised autocorrelation function is averaged over
//! walkers, integrated cumulatively (`τ(M) = 2 Σ_{k≤M} ρ(k) - 1`) and cut with
//! Sokal's automatic window: the smallest `M ≥ c τ(M)`. The estimate is only
//! trusted when the chain is at least `tol τ` steps long.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::fit::sampler::EnsembleChains;

/// Window constant `c`.
pub const WINDOW_C: f64 = 5.0;
/// Minimum chain length in units of `τ`.
pub const MIN_TAU_LENGTHS: f64 = 50.0;

/// Autocorrelation times, or the reason they cannot be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutocorrTime {
    Available { tau: Vec<f64> },
    /// `estimate` holds the untrusted per-parameter values when they could be computed.
    Unavailable { reason: String, estimate: Vec<f64> },
}

impl AutocorrTime {
    pub fn is_available(&self) -> bool {
        matches!(self, AutocorrTime::Available { .. })
    }
}

/// Normalised autocorrelation of one series; `None` for a constant series.
pub fn autocorrelation(x: &[f64]) -> Option<Vec<f64>> {
    let n = x.len();
    if n == 0 {
        return None;
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let m = 2 * n.next_power_of_two();

    let mut buf: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(m)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(m).process(&mut buf);
    for c in buf.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(m).process(&mut buf);

    let acf0 = buf[0].re;
    if !(acf0 > 0.0) || !acf0.is_finite() {
        return None;
    }
    Some(buf[..n].iter().map(|c| c.re / acf0).collect())
}

/// Smallest `m` with `m ≥ c τ(m)`, else the last index.
fn auto_window(taus: &[f64], c: f64) -> usize {
    taus.iter()
        .enumerate()
        .position(|(m, &t)| m as f64 >= c * t)
        .unwrap_or(taus.len().saturating_sub(1))
}

/// Integrated autocorrelation time of one parameter given `[walker][step]` traces.
fn integrated_time_1d(traces: &[Vec<f64>], c: f64) -> Option<f64> {
    let n_steps = traces.first()?.len();
    let mut mean_acf = vec![0.0; n_steps];
    for trace in traces {
        let acf = autocorrelation(trace)?;
        for (acc, v) in mean_acf.iter_mut().zip(acf) {
            *acc += v;
        }
    }
    let walkers = traces.len() as f64;

    let mut taus = Vec::with_capacity(n_steps);
    let mut running = 0.0;
    for v in mean_acf {
        running += v / walkers;
        taus.push(2.0 * running - 1.0);
    }
    let window = auto_window(&taus, c);
    taus.get(window).copied()
}

/// Per-parameter integrated autocorrelation time.
///
/// Never fails: short or degenerate chains yield [`AutocorrTime::Unavailable`].
pub fn integrated_time(chains: &EnsembleChains) -> AutocorrTime {
    let n_steps = chains.n_steps();
    if n_steps < 2 {
        return AutocorrTime::Unavailable {
            reason: format!("chain of {n_steps} steps is too short"),
            estimate: Vec::new(),
        };
    }

    let mut tau = Vec::with_capacity(chains.ndim());
    for (d, name) in chains.names.iter().enumerate() {
        match integrated_time_1d(&chains.traces(d), WINDOW_C) {
            Some(t) if t.is_finite() => tau.push(t),
            _ => {
                return AutocorrTime::Unavailable {
                    reason: format!("chain of parameter '{name}' does not vary"),
                    estimate: tau,
                };
            }
        }
    }

    let needed = tau.iter().fold(0.0_f64, |m, &t| m.max(MIN_TAU_LENGTHS * t));
    if needed > n_steps as f64 {
        return AutocorrTime::Unavailable {
            reason: format!(
                "chain is shorter than {MIN_TAU_LENGTHS} autocorrelation times ({n_steps} < {needed:.0} steps)"
            ),
            estimate: tau,
        };
    }
    AutocorrTime::Available { tau }
}
