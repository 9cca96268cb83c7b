//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON / delimited text
//! - reloaded later for plotting or comparisons

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Name of the parameter holding `ln(σ)` of the observation noise in Bayesian fits.
pub const NOISE_PARAM: &str = "log_noise_scale";

/// A set of equally long, labelled numeric columns.
///
/// Column order is insertion order. One column conventionally holds the
/// acquisition times; [`TacTable::time_series`] additionally checks that it is
/// non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TacTable {
    labels: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl TacTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows (samples per column).
    pub fn len(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Insert or replace a column.
    ///
    /// Fails if the new column length differs from the other columns.
    pub fn insert(&mut self, label: impl Into<String>, values: Vec<f64>) -> Result<(), FitError> {
        let label = label.into();
        let existing = self.labels.iter().position(|l| *l == label);

        let others_len = self
            .columns
            .iter()
            .enumerate()
            .find(|(i, _)| Some(*i) != existing)
            .map(|(_, c)| c.len());
        if let Some(n) = others_len {
            if n != values.len() {
                return Err(FitError::Table(format!(
                    "column '{label}' has {} values, table has {n} rows",
                    values.len()
                )));
            }
        }

        match existing {
            Some(i) => self.columns[i] = values,
            None => {
                self.labels.push(label);
                self.columns.push(values);
            }
        }
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&[f64]> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.columns[i].as_slice())
    }

    /// Column lookup with a descriptive error.
    pub fn column(&self, label: &str) -> Result<&[f64], FitError> {
        self.get(label).ok_or_else(|| {
            FitError::Table(format!(
                "no column '{label}' (available: {})",
                self.labels.join(", ")
            ))
        })
    }

    /// Column lookup for acquisition times; rejects decreasing sequences.
    pub fn time_series(&self, label: &str) -> Result<&[f64], FitError> {
        let t = self.column(label)?;
        check_time_points(t)?;
        Ok(t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.labels
            .iter()
            .zip(self.columns.iter())
            .map(|(l, c)| (l.as_str(), c.as_slice()))
    }
}

/// Time points must be finite and non-decreasing.
pub fn check_time_points(t: &[f64]) -> Result<(), FitError> {
    if let Some(i) = t.iter().position(|v| !v.is_finite()) {
        return Err(FitError::InvalidData(format!("time point {i} is not finite")));
    }
    if let Some(i) = t.windows(2).position(|w| w[1] < w[0]) {
        return Err(FitError::InvalidData(format!(
            "time points must be non-decreasing (t[{}]={} > t[{}]={})",
            i,
            t[i],
            i + 1,
            t[i + 1]
        )));
    }
    Ok(())
}

/// Initial value and optional bounds of one fit parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub init: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, init: f64) -> Self {
        Self {
            name: name.into(),
            init,
            min: None,
            max: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn lower(&self) -> f64 {
        self.min.unwrap_or(f64::NEG_INFINITY)
    }

    pub fn upper(&self) -> f64 {
        self.max.unwrap_or(f64::INFINITY)
    }

    /// Prior support `[lower, upper)`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower() && value < self.upper()
    }
}

impl FromStr for ParamSpec {
    type Err = FitError;

    /// Parse `name=init[:min[:max]]`; empty bound fields mean unbounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| FitError::InvalidData(format!("invalid parameter '{s}': {why}"));

        let (name, rest) = s.split_once('=').ok_or_else(|| invalid("expected name=init[:min[:max]]"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("empty name"));
        }

        let mut fields = rest.split(':').map(str::trim);
        let parse = |v: &str| v.parse::<f64>().map_err(|e| invalid(&e.to_string()));

        let init = parse(fields.next().unwrap_or(""))?;
        let min = match fields.next() {
            Some(v) if !v.is_empty() => Some(parse(v)?),
            _ => None,
        };
        let max = match fields.next() {
            Some(v) if !v.is_empty() => Some(parse(v)?),
            _ => None,
        };
        if fields.next().is_some() {
            return Err(invalid("too many ':' separated fields"));
        }

        Ok(ParamSpec::new(name, init).with_bounds(min, max))
    }
}

/// Ordered collection of parameter specifications with unique names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    params: Vec<ParamSpec>,
}

impl ParameterSpec {
    pub fn new(params: Vec<ParamSpec>) -> Result<Self, FitError> {
        let mut spec = Self::default();
        for p in params {
            spec.push(p)?;
        }
        Ok(spec)
    }

    /// Append a parameter; duplicate names and inverted bounds are rejected.
    pub fn push(&mut self, param: ParamSpec) -> Result<(), FitError> {
        if self.get(&param.name).is_some() {
            return Err(FitError::InvalidData(format!(
                "parameter '{}' specified more than once",
                param.name
            )));
        }
        if !param.init.is_finite() {
            return Err(FitError::InvalidData(format!(
                "parameter '{}' has a non-finite initial value",
                param.name
            )));
        }
        if param.lower() >= param.upper() {
            return Err(FitError::InvalidData(format!(
                "parameter '{}' has min >= max",
                param.name
            )));
        }
        self.params.push(param);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParamSpec> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Labelled curves handed to the reporting / plotting sink.
///
/// `time`, `tissue` and `input` hold the full series; `best_fit` and the bands
/// cover the first `cutoff` samples. Bands are half-widths (`best_fit ± band`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurves {
    pub time_label: String,
    pub tissue_label: String,
    pub input_label: String,
    pub time: Vec<f64>,
    pub tissue: Vec<f64>,
    pub input: Vec<f64>,
    /// Number of leading samples used by the fit.
    pub cutoff: usize,
    pub best_fit: Vec<f64>,
    pub confidence_band: Vec<f64>,
    pub prediction_band: Vec<f64>,
}
