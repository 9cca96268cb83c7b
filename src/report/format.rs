//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use std::fmt;

use crate::fit::{AutocorrTime, BayesianFit, LeastSquaresFit};
use crate::models::ModelKind;

/// Correlations with a smaller magnitude are left out of the report.
const MIN_CORRELATION: f64 = 0.1;

/// Least-squares fit report: statistics, variables and notable correlations.
pub fn format_fit_report(fit: &LeastSquaresFit) -> String {
    let mut out = String::new();

    out.push_str("[[Model]]\n");
    out.push_str(&format!("    {}\n", fit.model));

    out.push_str("[[Fit Statistics]]\n");
    out.push_str("    # fitting method   = leastsq\n");
    out.push_str(&format!("    # function evals   = {}\n", fit.nfev));
    out.push_str(&format!("    # data points      = {}\n", fit.ndata));
    out.push_str(&format!("    # variables        = {}\n", fit.nvarys));
    out.push_str(&format!("    chi-square         = {}\n", fmt_g(fit.chisqr)));
    out.push_str(&format!("    reduced chi-square = {}\n", fmt_g(fit.redchi)));
    out.push_str(&format!("    Akaike info crit   = {}\n", fmt_g(fit.aic)));
    out.push_str(&format!("    Bayesian info crit = {}\n", fmt_g(fit.bic)));
    out.push_str(&format!("    message            = {}\n", fit.message));
    if fit.covariance.is_none() {
        out.push_str("##  Warning: uncertainties could not be estimated\n");
    }

    out.push_str("[[Variables]]\n");
    let width = fit.params.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for p in &fit.params {
        let mut line = format!("    {:<width$}  {}", format!("{}:", p.name), fmt_g(p.value), width = width + 1);
        if let Some(se) = p.stderr {
            line.push_str(&format!(" +/- {}", fmt_g(se)));
            if p.value != 0.0 {
                line.push_str(&format!(" ({:.2}%)", (se / p.value).abs() * 100.0));
            }
        }
        line.push_str(&format!(" (init = {})", fmt_g(p.init)));
        if p.min.is_some() || p.max.is_some() {
            line.push_str(&format!(
                " [{}, {}]",
                p.min.map(fmt_g).unwrap_or_else(|| "-inf".to_string()),
                p.max.map(fmt_g).unwrap_or_else(|| "inf".to_string())
            ));
        }
        out.push_str(&line);
        out.push('\n');
    }

    let mut pairs: Vec<(String, f64)> = Vec::new();
    for i in 0..fit.params.len() {
        for j in (i + 1)..fit.params.len() {
            if let Some(c) = fit.correlation(i, j) {
                if c.abs() > MIN_CORRELATION {
                    pairs.push((format!("C({}, {})", fit.params[i].name, fit.params[j].name), c));
                }
            }
        }
    }
    if !pairs.is_empty() {
        pairs.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal));
        out.push_str(&format!("[[Correlations]] (unreported correlations are < {MIN_CORRELATION:.3})\n"));
        let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (k, c) in pairs {
            out.push_str(&format!("    {k:<width$} = {c:+.4}\n"));
        }
    }

    out
}

impl fmt::Display for LeastSquaresFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_fit_report(self))
    }
}

/// Sampler summary: acceptance, autocorrelation diagnostics and marginal quantiles.
pub fn format_bayesian_summary(fit: &BayesianFit) -> String {
    let mut out = String::new();

    out.push_str(&format!("[[Posterior]] model = {}\n", fit.model));
    out.push_str(&format!(
        "    walkers = {}, steps = {}\n",
        fit.chains.n_walkers(),
        fit.chains.n_steps()
    ));
    out.push_str(&format!("    mean acceptance fraction = {:.3}\n", fit.mean_acceptance()));
    if fit.seed.is_none() {
        out.push_str("    walkers started from the initial values (least-squares seed failed)\n");
    }

    match &fit.autocorr {
        AutocorrTime::Available { tau } => {
            out.push_str(&format!("    autocorrelation time = {}\n", fmt_vec(tau)));
        }
        AutocorrTime::Unavailable { reason, estimate } => {
            out.push_str(&format!("    autocorrelation time unavailable: {reason}\n"));
            if !estimate.is_empty() {
                out.push_str(&format!("    (unreliable estimate {})\n", fmt_vec(estimate)));
            }
        }
    }

    let width = fit.quantiles.iter().map(|q| q.name.len()).max().unwrap_or(0).max(9);
    out.push_str(
        format!(
            "{:<width$} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "parameter", "5%", "16%", "50%", "84%", "95%"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&format!("{:-<width$} {:-<12} {:-<12} {:-<12} {:-<12} {:-<12}\n", "", "", "", "", "", ""));
    for q in &fit.quantiles {
        out.push_str(&format!(
            "{:<width$} {:>12} {:>12} {:>12} {:>12} {:>12}\n",
            q.name,
            fmt_g(q.p05),
            fmt_g(q.p16),
            fmt_g(q.p50),
            fmt_g(q.p84),
            fmt_g(q.p95)
        ));
    }

    out
}

/// Available models and their parameter names.
pub fn format_models() -> String {
    let mut out = String::new();
    for m in ModelKind::ALL {
        out.push_str(&format!("{:<12} {}\n", m.name(), m.param_names().join(", ")));
    }
    out
}

/// Seven significant digits, switching to exponent form for very small/large values.
pub fn fmt_g(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return format!("{v}");
    }
    let exp = v.abs().log10().floor();
    if !(-4.0..7.0).contains(&exp) {
        return format!("{v:.6e}");
    }
    let decimals = (6.0 - exp).max(0.0) as usize;
    let s = format!("{v:.decimals$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.3}")).collect();
    format!("[{}]", parts.join(", "))
}
