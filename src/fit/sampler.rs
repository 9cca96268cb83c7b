//! Affine-invariant ensemble sampler (stretch move).
//!
//! Walkers are split into two random halves at every step; each half is moved
//! using the other as the complementary ensemble:
//!
//! - pick a partner `c` from the other half
//! - draw `z` from `g(z) ∝ 1/√z` on `[1/a, a]`
//! - propose `c + z (x - c)` and accept with probability `min(1, z^(d-1) p(y)/p(x))`
//!
//! All random draws come from one seeded generator in a fixed order; only the
//! log-probability evaluations of a half run on the worker pool. Results are
//! therefore identical for any number of workers.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::FitError;
use crate::math::percentiles;

/// Percentiles reported for every parameter.
pub const QUANTILE_LEVELS: [f64; 5] = [5.0, 16.0, 50.0, 84.0, 95.0];

/// Sampler settings (the `mcmc` block of a fit task).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    pub walkers: usize,
    pub steps: usize,
    /// Size of the worker pool evaluating log-probabilities.
    pub workers: usize,
    pub seed: u64,
    /// Standard deviation of the Gaussian ball around the start point.
    pub init_scale: f64,
    /// Stretch scale `a`.
    pub stretch: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            walkers: 32,
            steps: 2000,
            workers: 4,
            seed: 42,
            init_scale: 1e-5,
            stretch: 2.0,
        }
    }
}

impl SamplerConfig {
    fn validate(&self, ndim: usize) -> Result<(), FitError> {
        if ndim == 0 {
            return Err(FitError::Sampler("no parameters to sample".to_string()));
        }
        if self.walkers < 2 * ndim || self.walkers % 2 != 0 {
            return Err(FitError::Sampler(format!(
                "walker count must be even and at least {} (twice the {ndim} dimensions), got {}",
                2 * ndim,
                self.walkers
            )));
        }
        if self.steps == 0 {
            return Err(FitError::Sampler("step count must be positive".to_string()));
        }
        if self.workers == 0 {
            return Err(FitError::Sampler("worker count must be positive".to_string()));
        }
        if !(self.stretch > 1.0) {
            return Err(FitError::Sampler(format!(
                "stretch scale must exceed 1, got {}",
                self.stretch
            )));
        }
        if !(self.init_scale >= 0.0 && self.init_scale.is_finite()) {
            return Err(FitError::Sampler(format!(
                "initial ball scale must be finite and non-negative, got {}",
                self.init_scale
            )));
        }
        Ok(())
    }
}

/// Walker positions recorded at every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleChains {
    pub names: Vec<String>,
    /// `[step][walker][dim]`
    pub chain: Vec<Vec<Vec<f64>>>,
    /// `[step][walker]`
    pub log_prob: Vec<Vec<f64>>,
    /// Accepted proposals per walker.
    pub accepted: Vec<usize>,
}

impl EnsembleChains {
    pub fn n_steps(&self) -> usize {
        self.chain.len()
    }

    pub fn n_walkers(&self) -> usize {
        self.accepted.len()
    }

    pub fn ndim(&self) -> usize {
        self.names.len()
    }

    /// Fraction of accepted proposals per walker.
    pub fn acceptance_fraction(&self) -> Vec<f64> {
        let steps = self.n_steps().max(1) as f64;
        self.accepted.iter().map(|&a| a as f64 / steps).collect()
    }

    /// Samples of all walkers, dropping the first `discard` steps and keeping every `thin`-th.
    pub fn flat_samples(&self, discard: usize, thin: usize) -> Vec<Vec<f64>> {
        self.chain
            .iter()
            .skip(discard)
            .step_by(thin.max(1))
            .flat_map(|walkers| walkers.iter().cloned())
            .collect()
    }

    /// One parameter's chain per walker: `[walker][step]`.
    pub fn traces(&self, dim: usize) -> Vec<Vec<f64>> {
        (0..self.n_walkers())
            .map(|w| self.chain.iter().map(|step| step[w][dim]).collect())
            .collect()
    }

    /// [`QUANTILE_LEVELS`] of every parameter's marginal.
    pub fn quantiles(&self, discard: usize, thin: usize) -> Vec<ParamQuantiles> {
        let flat = self.flat_samples(discard, thin);
        self.names
            .iter()
            .enumerate()
            .map(|(d, name)| {
                let values: Vec<f64> = flat.iter().map(|s| s[d]).collect();
                let q = percentiles(&values, &QUANTILE_LEVELS);
                ParamQuantiles {
                    name: name.clone(),
                    p05: q[0],
                    p16: q[1],
                    p50: q[2],
                    p84: q[3],
                    p95: q[4],
                }
            })
            .collect()
    }
}

/// Marginal percentiles of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamQuantiles {
    pub name: String,
    pub p05: f64,
    pub p16: f64,
    pub p50: f64,
    pub p84: f64,
    pub p95: f64,
}

/// Run the ensemble sampler on `log_prob` starting near `start`.
///
/// `log_prob` must be pure; it is called concurrently from the worker pool.
pub fn run_mcmc<F>(
    log_prob: F,
    names: &[String],
    start: &[f64],
    config: &SamplerConfig,
) -> Result<EnsembleChains, FitError>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let ndim = start.len();
    if names.len() != ndim {
        return Err(FitError::Sampler(format!(
            "{} parameter names for a {ndim}-dimensional start point",
            names.len()
        )));
    }
    config.validate(ndim)?;

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| FitError::Sampler(format!("failed to start worker pool: {e}")))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let n_walkers = config.walkers;
    let a = config.stretch;

    let mut positions: Vec<Vec<f64>> = (0..n_walkers)
        .map(|_| {
            start
                .iter()
                .map(|&x| x + config.init_scale * rng.sample::<f64, _>(StandardNormal))
                .collect()
        })
        .collect();
    let mut current_lp: Vec<f64> =
        pool.install(|| positions.par_iter().map(|p| log_prob(p)).collect());
    if !current_lp.iter().any(|lp| lp.is_finite()) {
        return Err(FitError::Sampler(
            "log-probability is not finite at any initial walker position".to_string(),
        ));
    }

    let mut chain = Vec::with_capacity(config.steps);
    let mut lp_chain = Vec::with_capacity(config.steps);
    let mut accepted = vec![0usize; n_walkers];
    let report_every = (config.steps / 10).max(1);
    let mut split: Vec<usize> = (0..n_walkers).map(|i| i % 2).collect();

    info!(
        walkers = n_walkers,
        steps = config.steps,
        workers = config.workers,
        ndim,
        "starting ensemble sampler"
    );

    for step in 0..config.steps {
        split.shuffle(&mut rng);

        for half in 0..2 {
            let active: Vec<usize> = (0..n_walkers).filter(|&k| split[k] == half).collect();
            let partners: Vec<usize> = (0..n_walkers).filter(|&k| split[k] != half).collect();
            if partners.is_empty() {
                continue;
            }

            let z: Vec<f64> = active
                .iter()
                .map(|_| {
                    let u: f64 = rng.r#gen();
                    ((a - 1.0) * u + 1.0).powi(2) / a
                })
                .collect();
            let picks: Vec<usize> = active
                .iter()
                .map(|_| partners[rng.gen_range(0..partners.len())])
                .collect();

            let proposals: Vec<Vec<f64>> = active
                .iter()
                .zip(z.iter().zip(picks.iter()))
                .map(|(&k, (&zk, &c))| {
                    positions[c]
                        .iter()
                        .zip(positions[k].iter())
                        .map(|(&xc, &xk)| xc + zk * (xk - xc))
                        .collect()
                })
                .collect();
            let proposal_lp: Vec<f64> =
                pool.install(|| proposals.par_iter().map(|q| log_prob(q)).collect());

            for (((&k, &zk), proposal), new_lp) in active
                .iter()
                .zip(z.iter())
                .zip(proposals.into_iter())
                .zip(proposal_lp.into_iter())
            {
                let log_ratio = (ndim as f64 - 1.0) * zk.ln() + new_lp - current_lp[k];
                let u: f64 = rng.r#gen();
                if log_ratio > u.ln() {
                    positions[k] = proposal;
                    current_lp[k] = new_lp;
                    accepted[k] += 1;
                }
            }
        }

        chain.push(positions.clone());
        lp_chain.push(current_lp.clone());

        if (step + 1) % report_every == 0 {
            let mean_acc =
                accepted.iter().sum::<usize>() as f64 / (n_walkers as f64 * (step + 1) as f64);
            info!(
                step = step + 1,
                total = config.steps,
                acceptance = mean_acc,
                "sampler progress"
            );
        }
    }

    Ok(EnsembleChains {
        names: names.to_vec(),
        chain,
        log_prob: lp_chain,
        accepted,
    })
}
