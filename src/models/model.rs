//! Model evaluation for the five response models.
//!
//! The fit strategies rely on one primitive operation: predict the tissue curve
//! at every sample time for a parameter vector given in the model's declared
//! order. The convolution models integrate `response(t - τ) * input(τ)` over
//! `τ ∈ [0, t]`; Patlak integrates the tabulated input directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FitError;
use crate::math::{QuadConfig, cumulative_trapezoid, integrate, interp};
use crate::models::response::Response;

/// Closed set of response models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Step,
    Step2,
    StepFermi,
    Fermi2,
    Patlak,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Step,
        ModelKind::Step2,
        ModelKind::StepFermi,
        ModelKind::Fermi2,
        ModelKind::Patlak,
    ];

    /// Identifier used in task files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Step => "step",
            ModelKind::Step2 => "step2",
            ModelKind::StepFermi => "step_fermi",
            ModelKind::Fermi2 => "fermi2",
            ModelKind::Patlak => "patlak",
        }
    }

    /// Declared parameter names, in evaluation order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Step => &["amp", "extent"],
            ModelKind::Step2 => &["amp1", "extent1", "amp2", "extent2"],
            ModelKind::StepFermi => &["amp1", "extent1", "amp2", "extent2", "width2"],
            ModelKind::Fermi2 => &["amp1", "extent1", "width1", "amp2", "extent2", "width2"],
            ModelKind::Patlak => &["k1", "v0"],
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }

    /// Bind a parameter vector to this model's kernel (`None` for Patlak).
    ///
    /// `p` must hold `self.param_count()` values.
    pub(crate) fn response(self, p: &[f64]) -> Option<Response> {
        match self {
            ModelKind::Step => Some(Response::Step {
                amp: p[0],
                extent: p[1],
            }),
            ModelKind::Step2 => Some(Response::Step2 {
                amp1: p[0],
                extent1: p[1],
                amp2: p[2],
                extent2: p[3],
            }),
            ModelKind::StepFermi => Some(Response::StepFermi {
                amp1: p[0],
                extent1: p[1],
                amp2: p[2],
                extent2: p[3],
                width2: p[4],
            }),
            ModelKind::Fermi2 => Some(Response::Fermi2 {
                amp1: p[0],
                extent1: p[1],
                width1: p[2],
                amp2: p[3],
                extent2: p[4],
                width2: p[5],
            }),
            ModelKind::Patlak => None,
        }
    }

    /// Order a name→value map by the declared parameter names.
    ///
    /// Every declared name must be present and no other name may appear.
    pub fn bind(self, params: &BTreeMap<String, f64>) -> Result<Vec<f64>, FitError> {
        let missing: Vec<String> = self
            .param_names()
            .iter()
            .filter(|n| !params.contains_key(**n))
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(FitError::MissingFields {
                context: format!("parameters of model {self}"),
                fields: missing,
            });
        }
        if let Some(extra) = params.keys().find(|k| !self.param_names().contains(&k.as_str())) {
            return Err(self.unknown_parameter(extra));
        }
        Ok(self.param_names().iter().map(|n| params[*n]).collect())
    }

    pub(crate) fn unknown_parameter(self, name: &str) -> FitError {
        FitError::UnknownParameter {
            model: self.name().to_string(),
            name: name.to_string(),
            valid: self.param_names().iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s.trim())
            .ok_or_else(|| FitError::UnknownModel {
                name: s.to_string(),
                valid: ModelKind::ALL.iter().map(|m| m.name().to_string()).collect(),
            })
    }
}

/// Predict the tissue curve at every time point with default quadrature settings.
///
/// `params` must hold `model.param_count()` values in declared order; callers
/// outside the crate go through [`evaluate_model`], which validates them.
pub(crate) fn predict(model: ModelKind, t: &[f64], in_func: &[f64], params: &[f64]) -> Vec<f64> {
    predict_with(model, t, in_func, params, &QuadConfig::default())
}

/// Predict the tissue curve with explicit quadrature settings.
pub(crate) fn predict_with(
    model: ModelKind,
    t: &[f64],
    in_func: &[f64],
    params: &[f64],
    quad: &QuadConfig,
) -> Vec<f64> {
    assert_eq!(
        params.len(),
        model.param_count(),
        "model {model} expects {} parameters",
        model.param_count()
    );
    match model.response(params) {
        Some(response) => convolve(&response, t, in_func, quad),
        None => patlak(t, in_func, params[0], params[1]),
    }
}

/// Convolution of a kernel with the linearly interpolated input, at each `t`.
pub fn convolve(response: &Response, t: &[f64], in_func: &[f64], quad: &QuadConfig) -> Vec<f64> {
    let edges = response.edges();
    let mut breaks: Vec<f64> = Vec::with_capacity(t.len() + edges.len());

    t.iter()
        .map(|&ti| {
            breaks.clear();
            breaks.extend_from_slice(t);
            breaks.extend(edges.iter().map(|e| ti - e));

            let r = integrate(
                |tau| response.value(ti - tau) * interp(tau, t, in_func),
                0.0,
                ti,
                &breaks,
                quad,
            );
            if !r.converged {
                debug!(
                    t = ti,
                    abs_error = r.abs_error,
                    subintervals = r.subintervals,
                    "convolution integral did not reach tolerance"
                );
            }
            r.value
        })
        .collect()
}

/// Patlak model: `k1 * ∫₀ᵗ in + v0 * in(t)` using the trapezoidal rule on the samples.
pub fn patlak(t: &[f64], in_func: &[f64], k1: f64, v0: f64) -> Vec<f64> {
    cumulative_trapezoid(in_func, t)
        .into_iter()
        .zip(in_func.iter())
        .map(|(area, &c)| k1 * area + v0 * c)
        .collect()
}

/// Forward simulation by model name with named parameters.
pub fn evaluate_model(
    model_name: &str,
    t: &[f64],
    in_func: &[f64],
    params: &BTreeMap<String, f64>,
) -> Result<Vec<f64>, FitError> {
    let model: ModelKind = model_name.parse()?;
    if t.len() != in_func.len() {
        return Err(FitError::InvalidData(format!(
            "time points ({}) and input function ({}) differ in length",
            t.len(),
            in_func.len()
        )));
    }
    let values = model.bind(params)?;
    Ok(predict(model, t, in_func, &values))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TP: [f64; 5] = [0.0, 4.3, 7.5, 12.4, 16.2];
    const INP: [f64; 5] = [0.0, 10.3, 12.1, 8.1, 4.1];

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
            assert!((a - e).abs() < tol, "index {i}: got {a}, expected {e}");
        }
    }

    #[test]
    fn step_reference_values() {
        let m = predict(ModelKind::Step, &TP, &INP, &[0.7, 10.0]);
        assert_close(&m, &[0.0, 15.5015, 40.5895, 70.403_476_744, 61.547_281_25], 1e-6);
    }

    #[test]
    fn step_fermi_reference_values() {
        let tp = [0.0, 3.7, 7.1, 10.2, 13.5, 17.8];
        let inp = [0.0, 572.1, 3021.5, 123.7, 50.21, 10.5];
        let m = predict(ModelKind::StepFermi, &tp, &inp, &[0.1, 3.0, 0.3, 6.0, 3.0]);
        assert_eq!(m.len(), 6);
        assert!(m[0].abs() < 1e-4);
        assert!((m[1] - 400.0030).abs() < 0.05);
        assert!((m[2] - 2513.4540).abs() < 0.05);
        assert!((m[3] - 3199.0777).abs() < 0.005);
        assert!((m[4] - 1839.3696).abs() < 0.005);
        assert!((m[5] - 745.0176).abs() < 0.005);
    }

    #[test]
    fn fermi2_reference_values() {
        let tp = [0.0, 3.7, 7.1, 10.2, 13.5, 17.8];
        let inp = [0.0, 572.1, 3021.5, 123.7, 50.21, 10.5];
        let m = predict(ModelKind::Fermi2, &tp, &inp, &[0.4, 2.0, 1.0, 0.2, 8.0, 2.5]);
        assert_close(&m, &[0.0, 523.9318, 3187.7696, 3443.8594, 1710.2134, 673.7036], 1e-2);
    }

    #[test]
    fn step2_reference_values() {
        let tp = [0.0, 3.7, 7.1, 10.2, 13.5, 17.8];
        let inp = [0.0, 572.1, 3021.5, 123.7, 50.21, 10.5];
        let m = predict(ModelKind::Step2, &tp, &inp, &[0.5, 3.0, 0.2, 9.0]);
        assert_close(&m, &[0.0, 721.928, 4344.824, 4675.039, 2242.006, 337.876], 5e-2);
    }

    #[test]
    fn patlak_reference_values() {
        let m = predict(ModelKind::Patlak, &TP, &INP, &[3.0, 10.0]);
        assert_close(&m, &[0.0, 169.435, 294.955, 403.425, 432.965], 1e-3);
    }

    #[test]
    fn patlak_with_zero_coefficients_is_zero() {
        let m = patlak(&TP, &INP, 0.0, 0.0);
        assert_eq!(m, vec![0.0; 5]);
    }

    #[test]
    fn zero_input_gives_zero_curve_for_convolution_models() {
        let zero = [0.0; 5];
        let cases: [(ModelKind, &[f64]); 4] = [
            (ModelKind::Step, &[0.7, 10.0]),
            (ModelKind::Step2, &[0.5, 3.0, 0.2, 9.0]),
            (ModelKind::StepFermi, &[0.1, 3.0, 0.3, 6.0, 3.0]),
            (ModelKind::Fermi2, &[0.4, 2.0, 1.0, 0.2, 8.0, 2.5]),
        ];
        for (model, params) in cases {
            let m = predict(model, &TP, &zero, params);
            assert!(m.iter().all(|v| *v == 0.0), "{model}: {m:?}");
        }
    }

    #[test]
    fn single_point_at_zero_collapses() {
        let m = predict(ModelKind::Step, &[0.0], &[0.0], &[123.0, 4.5]);
        assert_eq!(m, vec![0.0]);
    }

    #[test]
    fn step2_equals_sum_of_two_steps() {
        let a = predict(ModelKind::Step2, &TP, &INP, &[0.5, 3.0, 0.2, 9.0]);
        let s1 = predict(ModelKind::Step, &TP, &INP, &[0.5, 3.0]);
        let s2 = predict(ModelKind::Step, &TP, &INP, &[0.2, 9.0]);
        for i in 0..TP.len() {
            assert!((a[i] - (s1[i] + s2[i])).abs() < 1e-9);
        }
    }

    #[test]
    fn model_names_round_trip() {
        for m in ModelKind::ALL {
            assert_eq!(m.name().parse::<ModelKind>().unwrap(), m);
        }
        let err = "gamma".parse::<ModelKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gamma"));
        assert!(msg.contains("step_fermi"));
    }

    #[test]
    fn evaluate_model_checks_parameter_names() {
        let mut params = BTreeMap::new();
        params.insert("amp".to_string(), 0.7);
        let err = evaluate_model("step", &TP, &INP, &params).unwrap_err();
        assert!(matches!(err, FitError::MissingFields { ref fields, .. } if fields == &vec!["extent".to_string()]));

        params.insert("extent".to_string(), 10.0);
        params.insert("width".to_string(), 1.0);
        let err = evaluate_model("step", &TP, &INP, &params).unwrap_err();
        assert!(matches!(err, FitError::UnknownParameter { .. }));

        params.remove("width");
        let m = evaluate_model("step", &TP, &INP, &params).unwrap();
        assert!((m[1] - 15.5015).abs() < 1e-6);
    }
}
