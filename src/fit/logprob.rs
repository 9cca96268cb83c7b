//! Gaussian log-likelihood with a hard uniform prior.
//!
//! The parameter vector holds the model parameters plus [`NOISE_PARAM`]
//! (`ln σ` of the observation noise), in any order given by `names`.

use std::f64::consts::PI;

use crate::domain::NOISE_PARAM;
use crate::error::FitError;
use crate::fit::leastsq::check_series;
use crate::math::QuadConfig;
use crate::models::{ModelKind, predict_with};

/// Log-posterior of one model against one tissue curve.
///
/// Owns its data so it can be shared read-only across sampler threads.
#[derive(Debug, Clone)]
pub struct LogPosterior {
    model: ModelKind,
    names: Vec<String>,
    /// Position in the parameter vector of each model parameter, in declared order.
    model_index: Vec<usize>,
    noise_index: usize,
    bounds: Vec<(f64, f64)>,
    time: Vec<f64>,
    input: Vec<f64>,
    tissue: Vec<f64>,
    quad: QuadConfig,
}

impl LogPosterior {
    /// `names` must be exactly the model's parameters plus [`NOISE_PARAM`];
    /// `bounds[i]` is the `[lower, upper)` prior support of `names[i]`.
    pub fn new(
        model: ModelKind,
        names: Vec<String>,
        time: Vec<f64>,
        input: Vec<f64>,
        tissue: Vec<f64>,
        bounds: Vec<(f64, f64)>,
    ) -> Result<Self, FitError> {
        check_series(&time, &input, &tissue)?;
        if bounds.len() != names.len() {
            return Err(FitError::InvalidData(format!(
                "{} parameter names but {} bounds",
                names.len(),
                bounds.len()
            )));
        }

        let position = |n: &str| names.iter().position(|x| x == n);
        let mut missing: Vec<String> = Vec::new();
        let mut model_index = Vec::with_capacity(model.param_count());
        for n in model.param_names() {
            match position(n) {
                Some(i) => model_index.push(i),
                None => missing.push(n.to_string()),
            }
        }
        let noise_index = position(NOISE_PARAM);
        if noise_index.is_none() {
            missing.push(NOISE_PARAM.to_string());
        }
        if !missing.is_empty() {
            return Err(FitError::MissingFields {
                context: format!("posterior parameters of model {model}"),
                fields: missing,
            });
        }
        if let Some(extra) = names
            .iter()
            .find(|n| *n != NOISE_PARAM && !model.param_names().contains(&n.as_str()))
        {
            return Err(model.unknown_parameter(extra));
        }
        if names.len() != model.param_count() + 1 {
            return Err(FitError::InvalidData("duplicate parameter names".to_string()));
        }

        Ok(Self {
            model,
            names,
            model_index,
            noise_index: noise_index.unwrap_or_default(),
            bounds,
            time,
            input,
            tissue,
            quad: QuadConfig::default(),
        })
    }

    pub fn with_quad(mut self, quad: QuadConfig) -> Self {
        self.quad = quad;
        self
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ndim(&self) -> usize {
        self.names.len()
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// `-inf` outside the prior support (or for a wrong-length vector),
    /// otherwise `-½ Σ [r²/σ² + ln(2πσ²)]` with `σ² = exp(2 θ_noise)`.
    pub fn log_prob(&self, theta: &[f64]) -> f64 {
        if theta.len() != self.names.len() {
            return f64::NEG_INFINITY;
        }
        let inside = theta
            .iter()
            .zip(self.bounds.iter())
            .all(|(&v, &(lo, hi))| v >= lo && v < hi);
        if !inside {
            return f64::NEG_INFINITY;
        }

        let params: Vec<f64> = self.model_index.iter().map(|&i| theta[i]).collect();
        let predicted = predict_with(self.model, &self.time, &self.input, &params, &self.quad);
        let sigma2 = (2.0 * theta[self.noise_index]).exp();
        let norm = (2.0 * PI * sigma2).ln();

        let ll: f64 = self
            .tissue
            .iter()
            .zip(predicted.iter())
            .map(|(y, m)| (y - m).powi(2) / sigma2 + norm)
            .sum();
        let value = -0.5 * ll;
        if value.is_nan() { f64::NEG_INFINITY } else { value }
    }
}

/// One-shot evaluation of the log-posterior.
pub fn log_probability(
    theta: &[f64],
    names: &[String],
    model: ModelKind,
    time: &[f64],
    input: &[f64],
    tissue: &[f64],
    bounds: &[(f64, f64)],
) -> Result<f64, FitError> {
    let posterior = LogPosterior::new(
        model,
        names.to_vec(),
        time.to_vec(),
        input.to_vec(),
        tissue.to_vec(),
        bounds.to_vec(),
    )?;
    Ok(posterior.log_prob(theta))
}
