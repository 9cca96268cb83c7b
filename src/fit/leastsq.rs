//! Levenberg–Marquardt least-squares fitting of a response model.
//!
//! Given:
//! - sample times `t_i` and input samples `c_i`
//! - measured tissue values `y_i`
//! - a model kind and a parameter specification (initial values + bounds)
//!
//! we minimise `Σ (model(t_i; p) - y_i)²` over `p`, respecting bounds through
//! the internal/external transforms in [`crate::fit::bounds`], then derive the
//! linearised covariance, standard errors and 2σ uncertainty bands of the curve.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::erf::erf;
use tracing::{debug, info};

use crate::domain::{ParamSpec, ParameterSpec};
use crate::error::FitError;
use crate::fit::bounds::Bounds;
use crate::math::{QuadConfig, solve_damped_step};
use crate::models::{ModelKind, predict_with};

/// Relative forward-difference step for the Jacobian (internal coordinates).
const JAC_REL_STEP: f64 = 1e-6;

/// Smallest chi-square used inside the information criteria logarithms.
const CHISQR_FLOOR: f64 = 1e-250;

/// Optimizer and reporting options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeastSquaresOptions {
    /// Maximum number of model evaluations; `None` means `2000 * (nvars + 1)`.
    pub max_nfev: Option<usize>,
    /// Relative reduction of chi-square considered converged.
    pub ftol: f64,
    /// Relative step size considered converged.
    pub xtol: f64,
    /// Gradient infinity-norm considered converged.
    pub gtol: f64,
    /// Width of the uncertainty bands in standard deviations.
    pub sigma: f64,
    #[serde(skip)]
    pub quad: QuadConfig,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            max_nfev: None,
            ftol: 1.5e-8,
            xtol: 1.5e-8,
            gtol: 0.0,
            sigma: 2.0,
            quad: QuadConfig::default(),
        }
    }
}

/// Best-fit value of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEstimate {
    pub name: String,
    pub value: f64,
    pub init: f64,
    pub stderr: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Outcome of a least-squares fit: best values, statistics and uncertainty bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeastSquaresFit {
    pub model: ModelKind,
    pub params: Vec<ParamEstimate>,
    /// Covariance of the external parameters (`None` if it could not be estimated).
    pub covariance: Option<Vec<Vec<f64>>>,
    pub nfev: usize,
    pub ndata: usize,
    pub nvarys: usize,
    pub nfree: usize,
    pub chisqr: f64,
    pub redchi: f64,
    pub aic: f64,
    pub bic: f64,
    /// Which convergence criterion ended the optimisation.
    pub message: String,
    /// Band width in standard deviations.
    pub sigma: f64,
    pub best_fit: Vec<f64>,
    /// `best_fit - data`.
    pub residual: Vec<f64>,
    /// Half-width of the confidence band of the model curve.
    pub confidence_band: Vec<f64>,
    /// Half-width of the prediction band (confidence band plus residual spread).
    pub prediction_band: Vec<f64>,
}

impl LeastSquaresFit {
    pub fn best_value_map(&self) -> BTreeMap<String, f64> {
        self.params.iter().map(|p| (p.name.clone(), p.value)).collect()
    }

    /// Correlation coefficient between parameters `i` and `j`.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let denom = (cov[i][i] * cov[j][j]).sqrt();
        if denom > 0.0 && denom.is_finite() {
            Some(cov[i][j] / denom)
        } else {
            None
        }
    }

    /// Root-mean-square of the residuals.
    pub fn rms_residual(&self) -> f64 {
        if self.ndata == 0 {
            return 0.0;
        }
        (self.chisqr / self.ndata as f64).sqrt()
    }
}

/// Parameter specs in the model's declared order.
///
/// All declared names must be present (reported together) and no other names may appear.
pub fn ordered_params(model: ModelKind, spec: &ParameterSpec) -> Result<Vec<ParamSpec>, FitError> {
    let missing: Vec<String> = model
        .param_names()
        .iter()
        .filter(|n| !spec.contains(n))
        .map(|n| n.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(FitError::MissingFields {
            context: format!("parameters of model {model}"),
            fields: missing,
        });
    }
    if let Some(extra) = spec.iter().find(|p| !model.param_names().contains(&p.name.as_str())) {
        return Err(model.unknown_parameter(&extra.name));
    }
    Ok(model
        .param_names()
        .iter()
        .filter_map(|n| spec.get(n).cloned())
        .collect())
}

/// Time, input and tissue samples must line up and be usable.
pub fn check_series(time: &[f64], input: &[f64], tissue: &[f64]) -> Result<(), FitError> {
    if time.len() != input.len() || time.len() != tissue.len() {
        return Err(FitError::InvalidData(format!(
            "series lengths differ: time={}, input={}, tissue={}",
            time.len(),
            input.len(),
            tissue.len()
        )));
    }
    if time.is_empty() {
        return Err(FitError::InvalidData("no samples to fit".to_string()));
    }
    crate::domain::check_time_points(time)?;
    if input.iter().chain(tissue.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::InvalidData(
            "input and tissue samples must be finite".to_string(),
        ));
    }
    Ok(())
}

struct Problem<'a> {
    model: ModelKind,
    time: &'a [f64],
    input: &'a [f64],
    tissue: &'a [f64],
    bounds: Vec<Bounds>,
    quad: QuadConfig,
    nfev: usize,
}

impl Problem<'_> {
    fn external(&self, u: &DVector<f64>) -> Vec<f64> {
        u.iter()
            .zip(self.bounds.iter())
            .map(|(&ui, b)| b.to_external(ui))
            .collect()
    }

    fn model_curve(&self, x: &[f64]) -> Vec<f64> {
        predict_with(self.model, self.time, self.input, x, &self.quad)
    }

    /// `model - data`, or `None` when the model is not finite.
    fn residual(&mut self, u: &DVector<f64>) -> Option<DVector<f64>> {
        self.nfev += 1;
        let curve = self.model_curve(&self.external(u));
        let r = DVector::from_iterator(
            curve.len(),
            curve.iter().zip(self.tissue.iter()).map(|(m, y)| m - y),
        );
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&mut self, u: &DVector<f64>, r0: &DVector<f64>) -> DMatrix<f64> {
        let n = r0.len();
        let p = u.len();
        let mut jac = DMatrix::<f64>::zeros(n, p);
        for k in 0..p {
            let h = JAC_REL_STEP * u[k].abs().max(1.0);
            let mut shifted = u.clone();
            shifted[k] += h;
            if let Some(r1) = self.residual(&shifted) {
                jac.set_column(k, &((r1 - r0) / h));
            }
        }
        jac
    }
}

/// Fit `model` to `tissue` with Levenberg–Marquardt.
///
/// Fails with [`FitError::Optimization`] if the model is not finite at the
/// initial values, a damped step cannot be solved, or the evaluation budget is
/// exhausted before convergence. There is no restart from other initial values.
pub fn fit_least_squares(
    model: ModelKind,
    time: &[f64],
    input: &[f64],
    tissue: &[f64],
    spec: &ParameterSpec,
    opts: &LeastSquaresOptions,
) -> Result<LeastSquaresFit, FitError> {
    check_series(time, input, tissue)?;
    let params = ordered_params(model, spec)?;

    let n = tissue.len();
    let p = params.len();
    if n < p {
        return Err(FitError::InvalidData(format!(
            "{n} data points cannot determine {p} parameters"
        )));
    }

    let mut problem = Problem {
        model,
        time,
        input,
        tissue,
        bounds: params.iter().map(|s| Bounds::new(s.lower(), s.upper())).collect(),
        quad: opts.quad,
        nfev: 0,
    };
    let max_nfev = opts.max_nfev.unwrap_or(2000 * (p + 1));

    let mut u = DVector::from_iterator(
        p,
        params
            .iter()
            .zip(problem.bounds.iter())
            .map(|(s, b)| b.to_internal(s.init)),
    );
    let mut r = problem.residual(&u).ok_or_else(|| {
        FitError::Optimization("model is not finite at the initial parameter values".to_string())
    })?;
    let mut cost = r.norm_squared();

    let mut diag = vec![0.0_f64; p];
    let mut lambda: Option<f64> = None;
    let mut nu = 2.0;
    let mut message: Option<String> = None;

    'outer: while problem.nfev < max_nfev {
        let jac = problem.jacobian(&u, &r);
        let grad = jac.transpose() * &r;

        for (k, d) in diag.iter_mut().enumerate() {
            *d = d.max(jac.column(k).norm());
        }
        let scale: Vec<f64> = diag.iter().map(|&d| if d > 0.0 { d } else { 1.0 }).collect();

        if grad.amax() <= opts.gtol {
            message = Some("gradient is orthogonal to the residuals".to_string());
            break;
        }

        let lam = lambda.get_or_insert_with(|| {
            let max_d2 = scale.iter().map(|d| d * d).fold(0.0, f64::max);
            1e-3 * max_d2.max(1e-12)
        });

        loop {
            if problem.nfev >= max_nfev {
                break 'outer;
            }
            let step = solve_damped_step(&jac, &r, &scale, *lam).ok_or_else(|| {
                FitError::Optimization("damped normal equations could not be solved".to_string())
            })?;
            let step_small = step.norm() <= opts.xtol * (u.norm() + opts.xtol);
            let u_new = &u + &step;

            let accepted = match problem.residual(&u_new) {
                Some(r_new) => {
                    let cost_new = r_new.norm_squared();
                    let predicted = cost - (&r + &jac * &step).norm_squared();
                    let actual = cost - cost_new;
                    if actual > 0.0 {
                        let rho = if predicted > 0.0 { actual / predicted } else { 1.0 };
                        let small_f = actual <= opts.ftol * cost;
                        u = u_new;
                        r = r_new;
                        cost = cost_new;
                        *lam *= (1.0 / 3.0_f64).max(1.0 - (2.0 * rho - 1.0).powi(3));
                        nu = 2.0;
                        debug!(nfev = problem.nfev, chisqr = cost, lambda = *lam, "accepted step");
                        if small_f {
                            message = Some("relative reduction of chi-square below ftol".to_string());
                            break 'outer;
                        }
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if step_small {
                message = Some("relative parameter change below xtol".to_string());
                break 'outer;
            }
            if accepted {
                break;
            }
            *lam *= nu;
            nu *= 2.0;
        }
    }

    let Some(message) = message else {
        return Err(FitError::Optimization(format!(
            "no convergence within {max_nfev} function evaluations (chi-square {cost:.6e})"
        )));
    };

    let best = problem.external(&u);
    let best_fit = problem.model_curve(&best);
    let residual: Vec<f64> = best_fit.iter().zip(tissue.iter()).map(|(m, y)| m - y).collect();
    let chisqr: f64 = residual.iter().map(|v| v * v).sum();
    let nfree = n - p;
    let redchi = chisqr / nfree.max(1) as f64;
    let nf = n as f64;
    let neg2_loglike = nf * (chisqr.max(CHISQR_FLOOR) / nf).ln();
    let aic = neg2_loglike + 2.0 * p as f64;
    let bic = neg2_loglike + nf.ln() * p as f64;

    // Covariance from the Jacobian at the optimum, scaled by the reduced chi-square.
    let covariance = if nfree > 0 {
        let jac = problem.jacobian(&u, &r);
        (jac.transpose() * &jac).try_inverse().and_then(|inv| {
            let g: Vec<f64> = u
                .iter()
                .zip(problem.bounds.iter())
                .map(|(&ui, b)| b.gradient(ui))
                .collect();
            let cov: Vec<Vec<f64>> = (0..p)
                .map(|i| (0..p).map(|j| inv[(i, j)] * redchi * g[i] * g[j]).collect())
                .collect();
            let valid = (0..p).all(|i| cov[i][i].is_finite() && cov[i][i] >= 0.0);
            valid.then_some(cov)
        })
    } else {
        None
    };

    let estimates: Vec<ParamEstimate> = params
        .iter()
        .enumerate()
        .map(|(i, s)| ParamEstimate {
            name: s.name.clone(),
            value: best[i],
            init: s.init,
            stderr: covariance.as_ref().map(|c| c[i][i].sqrt()),
            min: s.min,
            max: s.max,
        })
        .collect();

    let (confidence_band, prediction_band) = match &covariance {
        Some(cov) => uncertainty_bands(&problem, &best, &estimates, cov, redchi, nfree, opts.sigma),
        None => (vec![0.0; n], vec![0.0; n]),
    };

    info!(
        model = %model,
        nfev = problem.nfev,
        chisqr,
        redchi,
        "least-squares fit converged: {message}"
    );

    Ok(LeastSquaresFit {
        model,
        params: estimates,
        covariance,
        nfev: problem.nfev,
        ndata: n,
        nvarys: p,
        nfree,
        chisqr,
        redchi,
        aic,
        bic,
        message,
        sigma: opts.sigma,
        best_fit,
        residual,
        confidence_band,
        prediction_band,
    })
}

/// Linearised `sigma`-level bands of the model curve.
///
/// The model gradient is taken by central differences with step `stderr / 3`;
/// `df² = Σ_ij ∂f/∂p_i ∂f/∂p_j C_ij`. The scale is the Student-t quantile
/// matching the two-sided normal probability of `sigma`.
fn uncertainty_bands(
    problem: &Problem<'_>,
    best: &[f64],
    estimates: &[ParamEstimate],
    cov: &[Vec<f64>],
    redchi: f64,
    nfree: usize,
    sigma: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = problem.tissue.len();
    let p = best.len();

    let gradients: Vec<Vec<f64>> = (0..p)
        .map(|i| {
            let dval = estimates[i].stderr.unwrap_or(0.0) / 3.0;
            if !(dval > 0.0 && dval.is_finite()) {
                return vec![0.0; n];
            }
            let b = &problem.bounds[i];
            let mut plus = best.to_vec();
            let mut minus = best.to_vec();
            plus[i] = b.clamp(best[i] + dval);
            minus[i] = b.clamp(best[i] - dval);
            let width = plus[i] - minus[i];
            if width <= 0.0 {
                return vec![0.0; n];
            }
            let f1 = problem.model_curve(&plus);
            let f2 = problem.model_curve(&minus);
            f1.iter().zip(f2.iter()).map(|(a, b)| (a - b) / width).collect()
        })
        .collect();

    let prob = erf(sigma / std::f64::consts::SQRT_2);
    let scale = StudentsT::new(0.0, 1.0, nfree.max(1) as f64)
        .map(|t| t.inverse_cdf((prob + 1.0) / 2.0))
        .unwrap_or(sigma);

    let mut confidence = Vec::with_capacity(n);
    let mut prediction = Vec::with_capacity(n);
    for k in 0..n {
        let mut df2 = 0.0;
        for i in 0..p {
            for j in 0..p {
                df2 += gradients[i][k] * gradients[j][k] * cov[i][j];
            }
        }
        let df2 = df2.max(0.0);
        confidence.push(scale * df2.sqrt());
        prediction.push(scale * (df2 + redchi).sqrt());
    }
    (confidence, prediction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_input(t: &[f64]) -> Vec<f64> {
        // Bolus-like input: fast rise, slow washout.
        t.iter().map(|&x| 100.0 * x * (-x / 6.0).exp()).collect()
    }

    fn spec(params: &[(&str, f64, Option<f64>, Option<f64>)]) -> ParameterSpec {
        ParameterSpec::new(
            params
                .iter()
                .map(|(n, v, lo, hi)| ParamSpec::new(*n, *v).with_bounds(*lo, *hi))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn recovers_patlak_parameters() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 3.0).collect();
        let input = synthetic_input(&t);
        let tissue = crate::models::patlak(&t, &input, 0.05, 0.3);

        let fit = fit_least_squares(
            ModelKind::Patlak,
            &t,
            &input,
            &tissue,
            &spec(&[("k1", 0.01, None, None), ("v0", 0.1, None, None)]),
            &LeastSquaresOptions::default(),
        )
        .unwrap();

        assert!((fit.params[0].value - 0.05).abs() < 1e-6);
        assert!((fit.params[1].value - 0.3).abs() < 1e-5);
        assert!(fit.chisqr < 1e-8);
        assert_eq!(fit.nfree, 18);
    }

    #[test]
    fn recovers_step_parameters_within_bounds() {
        let t: Vec<f64> = (0..25).map(|i| i as f64 * 2.0).collect();
        let input = synthetic_input(&t);
        let tissue = predict_with(ModelKind::Step, &t, &input, &[0.6, 12.0], &QuadConfig::default());

        let fit = fit_least_squares(
            ModelKind::Step,
            &t,
            &input,
            &tissue,
            &spec(&[("amp", 0.4, Some(0.0), Some(2.0)), ("extent", 9.0, Some(1.0), Some(40.0))]),
            &LeastSquaresOptions::default(),
        )
        .unwrap();

        assert!((fit.params[0].value - 0.6).abs() < 1e-3, "amp = {}", fit.params[0].value);
        assert!((fit.params[1].value - 12.0).abs() < 1e-2, "extent = {}", fit.params[1].value);
    }

    #[test]
    fn bounds_are_respected() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 3.0).collect();
        let input = synthetic_input(&t);
        let tissue = crate::models::patlak(&t, &input, 0.05, 0.3);

        let fit = fit_least_squares(
            ModelKind::Patlak,
            &t,
            &input,
            &tissue,
            &spec(&[("k1", 0.01, Some(0.0), Some(0.04)), ("v0", 0.1, None, None)]),
            &LeastSquaresOptions::default(),
        )
        .unwrap();

        let k1 = fit.params[0].value;
        assert!((0.0..=0.04).contains(&k1));
        assert!(fit.chisqr > 0.0);
    }

    #[test]
    fn noisy_fit_reports_uncertainty_bands() {
        let t: Vec<f64> = (0..30).map(|i| i as f64 * 2.0).collect();
        let input = synthetic_input(&t);
        let clean = crate::models::patlak(&t, &input, 0.05, 0.3);
        // Deterministic alternating perturbation.
        let tissue: Vec<f64> = clean
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 1.5 } else { -1.5 })
            .collect();

        let fit = fit_least_squares(
            ModelKind::Patlak,
            &t,
            &input,
            &tissue,
            &spec(&[("k1", 0.02, None, None), ("v0", 0.5, None, None)]),
            &LeastSquaresOptions::default(),
        )
        .unwrap();

        assert!(fit.covariance.is_some());
        assert!(fit.params.iter().all(|p| p.stderr.unwrap() > 0.0));
        assert_eq!(fit.confidence_band.len(), t.len());
        for (c, p) in fit.confidence_band.iter().zip(fit.prediction_band.iter()) {
            assert!(c.is_finite() && p.is_finite());
            assert!(p > c);
        }
        let rho = fit.correlation(0, 1).unwrap();
        assert!((-1.0..=1.0).contains(&rho));
    }

    #[test]
    fn missing_and_unknown_parameters_are_rejected() {
        let t = [0.0, 1.0, 2.0];
        let input = [0.0, 1.0, 1.0];
        let tissue = [0.0, 0.5, 1.0];

        let err = fit_least_squares(
            ModelKind::Step2,
            &t,
            &input,
            &tissue,
            &spec(&[("amp1", 1.0, None, None)]),
            &LeastSquaresOptions::default(),
        )
        .unwrap_err();
        match err {
            FitError::MissingFields { fields, .. } => {
                assert_eq!(fields, vec!["extent1", "amp2", "extent2"]);
            }
            other => panic!("unexpected error {other}"),
        }

        let err = fit_least_squares(
            ModelKind::Patlak,
            &t,
            &input,
            &tissue,
            &spec(&[("k1", 1.0, None, None), ("v0", 1.0, None, None), ("x", 1.0, None, None)]),
            &LeastSquaresOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::UnknownParameter { .. }));
    }

    #[test]
    fn exhausted_budget_is_an_optimization_error() {
        let t: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let input = synthetic_input(&t);
        let tissue = crate::models::patlak(&t, &input, 0.05, 0.3);
        let opts = LeastSquaresOptions {
            max_nfev: Some(2),
            ..LeastSquaresOptions::default()
        };
        let err = fit_least_squares(
            ModelKind::Patlak,
            &t,
            &input,
            &tissue,
            &spec(&[("k1", 10.0, None, None), ("v0", -5.0, None, None)]),
            &opts,
        )
        .unwrap_err();
        assert!(matches!(err, FitError::Optimization(_)));
    }
}
