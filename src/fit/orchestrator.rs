//! Fit dispatch: method selection, data cut-off and assembly of labelled curves.
//!
//! The method identifier selects one of three plans:
//!
//! - `leastsq` → Levenberg–Marquardt fit with uncertainty bands
//! - `emcee`   → ensemble sampling seeded from a least-squares fit
//! - anything else → the task is skipped with a warning (not an error)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;
use tracing::{debug, info, warn};

use crate::domain::{FitCurves, NOISE_PARAM, ParamSpec, ParameterSpec, TacTable};
use crate::error::FitError;
use crate::fit::autocorr::{AutocorrTime, integrated_time};
use crate::fit::leastsq::{LeastSquaresFit, LeastSquaresOptions, check_series, fit_least_squares, ordered_params};
use crate::fit::logprob::LogPosterior;
use crate::fit::sampler::{EnsembleChains, ParamQuantiles, SamplerConfig, run_mcmc};
use crate::math::percentiles;
use crate::models::{ModelKind, predict_with};

/// Maximum number of posterior draws used to build the Bayesian curve bands.
const MAX_BAND_DRAWS: usize = 200;

/// Strategy chosen from the method identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitPlan {
    ConfiguredLeastSquares,
    ConfiguredBayesian,
    UnknownMethod(String),
}

impl FitPlan {
    pub fn from_method(method: &str) -> Self {
        match method.trim() {
            "leastsq" => FitPlan::ConfiguredLeastSquares,
            "emcee" => FitPlan::ConfiguredBayesian,
            other => FitPlan::UnknownMethod(other.to_string()),
        }
    }
}

/// Options for both strategies.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    pub least_squares: LeastSquaresOptions,
    pub sampler: SamplerConfig,
    /// Leading sampler steps dropped before computing quantiles.
    pub discard: usize,
    /// Keep every `thin`-th step (0 and 1 keep all).
    pub thin: usize,
}

/// Labelled time, input and tissue series of one fit.
#[derive(Debug, Clone, Copy)]
pub struct FitInput<'a> {
    pub time_label: &'a str,
    pub input_label: &'a str,
    pub tissue_label: &'a str,
    pub time: &'a [f64],
    pub input: &'a [f64],
    pub tissue: &'a [f64],
}

impl<'a> FitInput<'a> {
    pub fn from_table(
        table: &'a TacTable,
        time_label: &'a str,
        input_label: &'a str,
        tissue_label: &'a str,
    ) -> Result<Self, FitError> {
        Ok(Self {
            time_label,
            input_label,
            tissue_label,
            time: table.time_series(time_label)?,
            input: table.column(input_label)?,
            tissue: table.column(tissue_label)?,
        })
    }
}

/// Result of the Bayesian strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesianFit {
    pub model: ModelKind,
    pub names: Vec<String>,
    /// Least-squares fit the walkers were seeded from, if it succeeded.
    pub seed: Option<LeastSquaresFit>,
    pub start: Vec<f64>,
    pub autocorr: AutocorrTime,
    pub quantiles: Vec<ParamQuantiles>,
    pub acceptance_fraction: Vec<f64>,
    #[serde(skip)]
    pub chains: EnsembleChains,
}

impl BayesianFit {
    /// Posterior medians keyed by parameter name.
    pub fn median_values(&self) -> BTreeMap<String, f64> {
        self.quantiles.iter().map(|q| (q.name.clone(), q.p50)).collect()
    }

    pub fn mean_acceptance(&self) -> f64 {
        crate::math::mean(&self.acceptance_fraction)
    }
}

/// What a fit task produced.
#[derive(Debug, Clone)]
pub enum FitOutcome {
    LeastSquares { fit: Box<LeastSquaresFit>, curves: FitCurves },
    Bayesian { fit: Box<BayesianFit>, curves: FitCurves },
    Skipped { method: String },
}

impl FitOutcome {
    pub fn curves(&self) -> Option<&FitCurves> {
        match self {
            FitOutcome::LeastSquares { curves, .. } | FitOutcome::Bayesian { curves, .. } => Some(curves),
            FitOutcome::Skipped { .. } => None,
        }
    }
}

/// Number of leading samples to use: the full length by default, clamped with a warning.
pub fn resolve_cutoff(cutoff: Option<usize>, len: usize) -> Result<usize, FitError> {
    match cutoff {
        None => Ok(len),
        Some(0) => Err(FitError::InvalidData("tcut must be at least 1".to_string())),
        Some(c) if c > len => {
            warn!(tcut = c, samples = len, "tcut exceeds the number of samples; using all samples");
            Ok(len)
        }
        Some(c) => Ok(c),
    }
}

/// Fit one tissue curve.
///
/// The model name is resolved first (unknown names are an error); an unknown
/// method then yields [`FitOutcome::Skipped`]. The curves in the outcome hold
/// the full series; the fitted curve and bands cover the first `cutoff` samples.
pub fn fit(
    data: &FitInput<'_>,
    model_name: &str,
    method: &str,
    spec: &ParameterSpec,
    cutoff: Option<usize>,
    options: &FitOptions,
) -> Result<FitOutcome, FitError> {
    let model: ModelKind = model_name.parse()?;
    check_series(data.time, data.input, data.tissue)?;
    let n = resolve_cutoff(cutoff, data.time.len())?;
    let cut = FitInput {
        time: &data.time[..n],
        input: &data.input[..n],
        tissue: &data.tissue[..n],
        ..*data
    };

    let plan = FitPlan::from_method(method);
    info!(model = %model, method, samples = n, tissue = data.tissue_label, "starting fit");

    match plan {
        FitPlan::ConfiguredLeastSquares => {
            let fit = fit_least_squares(
                model,
                cut.time,
                cut.input,
                cut.tissue,
                &without_noise(spec)?,
                &options.least_squares,
            )?;
            let curves = curves(
                data,
                n,
                fit.best_fit.clone(),
                fit.confidence_band.clone(),
                fit.prediction_band.clone(),
            );
            Ok(FitOutcome::LeastSquares {
                fit: Box::new(fit),
                curves,
            })
        }
        FitPlan::ConfiguredBayesian => {
            let (fit, curves) = fit_bayesian(model, data, &cut, spec, options)?;
            Ok(FitOutcome::Bayesian {
                fit: Box::new(fit),
                curves,
            })
        }
        FitPlan::UnknownMethod(method) => {
            warn!(method = %method, "unknown fit method (expected 'leastsq' or 'emcee'); skipping task");
            Ok(FitOutcome::Skipped { method })
        }
    }
}

/// The model parameters of `spec`, without the noise parameter.
fn without_noise(spec: &ParameterSpec) -> Result<ParameterSpec, FitError> {
    if spec.contains(NOISE_PARAM) {
        debug!("ignoring {NOISE_PARAM} for the least-squares fit");
    }
    ParameterSpec::new(spec.iter().filter(|p| p.name != NOISE_PARAM).cloned().collect())
}

fn curves(
    data: &FitInput<'_>,
    cutoff: usize,
    best_fit: Vec<f64>,
    confidence_band: Vec<f64>,
    prediction_band: Vec<f64>,
) -> FitCurves {
    FitCurves {
        time_label: data.time_label.to_string(),
        tissue_label: data.tissue_label.to_string(),
        input_label: data.input_label.to_string(),
        time: data.time.to_vec(),
        tissue: data.tissue.to_vec(),
        input: data.input.to_vec(),
        cutoff,
        best_fit,
        confidence_band,
        prediction_band,
    }
}

fn fit_bayesian(
    model: ModelKind,
    full: &FitInput<'_>,
    data: &FitInput<'_>,
    spec: &ParameterSpec,
    options: &FitOptions,
) -> Result<(BayesianFit, FitCurves), FitError> {
    let model_spec = without_noise(spec)?;
    let params = ordered_params(model, &model_spec)?;

    let seed = match fit_least_squares(
        model,
        data.time,
        data.input,
        data.tissue,
        &model_spec,
        &options.least_squares,
    ) {
        Ok(fit) => Some(fit),
        Err(FitError::Optimization(msg)) => {
            warn!(reason = %msg, "least-squares seed fit failed; starting walkers at the initial values");
            None
        }
        Err(e) => return Err(e),
    };

    let mut specs: Vec<ParamSpec> = params
        .iter()
        .enumerate()
        .map(|(i, p)| ParamSpec {
            init: seed.as_ref().map(|s| s.params[i].value).unwrap_or(p.init),
            ..p.clone()
        })
        .collect();
    let noise = match spec.get(NOISE_PARAM) {
        Some(p) => p.clone(),
        None => {
            let rms = seed.as_ref().map(|s| s.rms_residual()).unwrap_or(0.0);
            let init = if rms > 0.0 { rms.ln() } else { 0.0 };
            debug!(init, "adding {NOISE_PARAM} to the sampled parameters");
            ParamSpec::new(NOISE_PARAM, init)
        }
    };
    specs.push(noise);

    let names: Vec<String> = specs.iter().map(|p| p.name.clone()).collect();
    let start: Vec<f64> = specs.iter().map(|p| p.init).collect();
    let bounds: Vec<(f64, f64)> = specs.iter().map(|p| (p.lower(), p.upper())).collect();

    let posterior = LogPosterior::new(
        model,
        names.clone(),
        data.time.to_vec(),
        data.input.to_vec(),
        data.tissue.to_vec(),
        bounds,
    )?
    .with_quad(options.least_squares.quad);

    let chains = run_mcmc(|theta| posterior.log_prob(theta), &names, &start, &options.sampler)?;

    let autocorr = integrated_time(&chains);
    match &autocorr {
        AutocorrTime::Available { tau } => info!(?tau, "autocorrelation time"),
        AutocorrTime::Unavailable { reason, estimate } => {
            info!(?estimate, "autocorrelation time unavailable: {reason}")
        }
    }

    let thin = options.thin.max(1);
    let quantiles = chains.quantiles(options.discard, thin);
    let acceptance_fraction = chains.acceptance_fraction();

    let medians: Vec<f64> = quantiles.iter().map(|q| q.p50).collect();
    let curves = posterior_curves(model, full, data, &chains, &medians, options);

    let fit = BayesianFit {
        model,
        names,
        seed,
        start,
        autocorr,
        quantiles,
        acceptance_fraction,
        chains,
    };
    Ok((fit, curves))
}

/// Curves at the posterior median with bands from the spread of posterior draws.
///
/// The confidence band is half the central `sigma`-equivalent interval of the
/// model curves; the prediction band adds `sigma` times the median noise level.
fn posterior_curves(
    model: ModelKind,
    full: &FitInput<'_>,
    data: &FitInput<'_>,
    chains: &EnsembleChains,
    medians: &[f64],
    options: &FitOptions,
) -> FitCurves {
    let quad = &options.least_squares.quad;
    let sigma = options.least_squares.sigma;
    let n_model = model.param_count();
    let best_fit = predict_with(model, data.time, data.input, &medians[..n_model], quad);

    let samples = chains.flat_samples(options.discard, options.thin.max(1));
    let stride = samples.len().div_ceil(MAX_BAND_DRAWS).max(1);
    let draws: Vec<Vec<f64>> = samples
        .iter()
        .step_by(stride)
        .map(|s| predict_with(model, data.time, data.input, &s[..n_model], quad))
        .collect();

    let tail = 50.0 * (1.0 - erf(sigma / std::f64::consts::SQRT_2));
    let confidence_band: Vec<f64> = (0..data.time.len())
        .map(|k| {
            let column: Vec<f64> = draws.iter().map(|d| d[k]).collect();
            let q = percentiles(&column, &[tail, 100.0 - tail]);
            if q[0].is_finite() && q[1].is_finite() {
                0.5 * (q[1] - q[0])
            } else {
                0.0
            }
        })
        .collect();

    let noise_sd = medians.get(n_model).map(|ln_s| ln_s.exp()).unwrap_or(0.0);
    let prediction_band = confidence_band
        .iter()
        .map(|c| (c * c + (sigma * noise_sd).powi(2)).sqrt())
        .collect();

    curves(full, data.time.len(), best_fit, confidence_band, prediction_band)
}
