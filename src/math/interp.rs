//! Piecewise-linear access to tabulated signals.
//!
//! Input functions are only known at their sample times. Between samples we
//! interpolate linearly; outside the sampled range the end values are held.

/// Linearly interpolate `(xp, fp)` at `x`.
///
/// `xp` must be non-decreasing and have the same length as `fp`. Values of `x`
/// left of `xp[0]` return `fp[0]`, values right of the last sample return the
/// last value. An empty table evaluates to `0.0`.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return 0.0;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    // First index with xp[i] > x; x lies in [xp[i-1], xp[i]).
    let i = xp[..n].partition_point(|&v| v <= x);
    let (x0, x1) = (xp[i - 1], xp[i]);
    let (f0, f1) = (fp[i - 1], fp[i]);
    let dx = x1 - x0;
    if dx <= 0.0 {
        return f1;
    }
    f0 + (f1 - f0) * (x - x0) / dx
}

/// Delay a sampled curve by `delay`: element `i` is the curve at `t[i] - delay`.
///
/// Times before the first sample hold the first value.
pub fn shift_time(curve: &[f64], t: &[f64], delay: f64) -> Vec<f64> {
    t.iter().map(|&ti| interp(ti - delay, t, curve)).collect()
}

/// Running trapezoidal integral: element `i` integrates `y[0..=i]` over `x[0..=i]`.
pub fn cumulative_trapezoid(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    let mut out = Vec::with_capacity(n);
    let mut acc = 0.0;
    for i in 0..n {
        if i > 0 {
            acc += 0.5 * (x[i] - x[i - 1]) * (y[i - 1] + y[i]);
        }
        out.push(acc);
    }
    out
}
