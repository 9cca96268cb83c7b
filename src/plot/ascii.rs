//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Fit plot elements:
//! - tissue samples: `o`
//! - input samples: `x`
//! - fitted curve: `-` line
//! - confidence band: `:`, prediction band: `.`
//!
//! Series plots draw each labelled column with its own marker character.

use crate::domain::FitCurves;
use crate::fit::EnsembleChains;
use crate::math::interp;

/// Render measured curves, the fitted curve and its uncertainty bands.
pub fn render_fit_plot(curves: &FitCurves, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let n = curves.best_fit.len().min(curves.time.len());

    let (t_min, t_max) = range(curves.time.iter().copied()).unwrap_or((0.0, 1.0));
    let upper = (0..n).map(|i| curves.best_fit[i] + band(&curves.prediction_band, i));
    let lower = (0..n).map(|i| curves.best_fit[i] - band(&curves.prediction_band, i));
    let values = curves
        .tissue
        .iter()
        .chain(curves.input.iter())
        .copied()
        .chain(upper)
        .chain(lower);
    let (y_min, y_max) = range(values).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    if n >= 2 {
        let t_fit = &curves.time[..n];
        let t_end = t_fit[n - 1];
        for x in 0..width {
            let t = t_min + (t_max - t_min) * x as f64 / (width as f64 - 1.0);
            if t < t_fit[0] || t > t_end {
                continue;
            }
            let best = interp(t, t_fit, &curves.best_fit[..n]);
            let pred = interp(t, t_fit, &curves.prediction_band[..n]);
            let conf = interp(t, t_fit, &curves.confidence_band[..n]);
            for (half, ch) in [(pred, '.'), (conf, ':')] {
                let top = map_y(best + half, y_min, y_max, height);
                let bottom = map_y(best - half, y_min, y_max, height);
                fill_column(&mut grid, x, top, bottom, ch);
            }
        }

        let line: Vec<(f64, f64)> = t_fit
            .iter()
            .copied()
            .zip(curves.best_fit[..n].iter().copied())
            .collect();
        draw_curve(&mut grid, &line, t_min, t_max, y_min, y_max, '-');
    }

    for (&t, &y) in curves.time.iter().zip(curves.input.iter()) {
        grid[map_y(y, y_min, y_max, height)][map_x(t, t_min, t_max, width)] = 'x';
    }
    for (&t, &y) in curves.time.iter().zip(curves.tissue.iter()) {
        grid[map_y(y, y_min, y_max, height)][map_x(t, t_min, t_max, width)] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: {}=[{t_min:.3}, {t_max:.3}] | y=[{y_min:.2}, {y_max:.2}]\n",
        curves.time_label
    ));
    push_grid(&mut out, grid);
    out.push_str(&format!(
        "o {}  x {}  - fit  : confidence  . prediction\n",
        curves.tissue_label, curves.input_label
    ));
    out
}

/// Marker characters of successive series in [`render_series_plot`].
const SERIES_MARKERS: [char; 8] = ['o', 'x', '+', '*', '#', '@', '%', '&'];

/// Render labelled columns against a shared time axis.
///
/// Axis names default to `time_label` and `y`.
pub fn render_series_plot(
    time_label: &str,
    time: &[f64],
    series: &[(String, Vec<f64>)],
    xlabel: Option<&str>,
    ylabel: Option<&str>,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (t_min, t_max) = range(time.iter().copied()).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = range(series.iter().flat_map(|(_, v)| v.iter().copied())).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    for ((_, values), &ch) in series.iter().zip(SERIES_MARKERS.iter().cycle()) {
        let line: Vec<(f64, f64)> = time
            .iter()
            .copied()
            .zip(values.iter().copied())
            .filter(|(t, y)| t.is_finite() && y.is_finite())
            .collect();
        draw_curve(&mut grid, &line, t_min, t_max, y_min, y_max, ch);
    }

    let mut out = format!(
        "Plot: {}=[{t_min:.3}, {t_max:.3}] | {}=[{y_min:.2}, {y_max:.2}]\n",
        xlabel.unwrap_or(time_label),
        ylabel.unwrap_or("y")
    );
    push_grid(&mut out, grid);
    let legend: Vec<String> = series
        .iter()
        .zip(SERIES_MARKERS.iter().cycle())
        .map(|((label, _), ch)| format!("{ch} {label}"))
        .collect();
    out.push_str(&legend.join("  "));
    out.push('\n');
    out
}

/// Render every walker's chain of parameter `dim` against the step index.
pub fn render_traces(chains: &EnsembleChains, dim: usize, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let traces = chains.traces(dim);
    let steps = chains.n_steps();

    let (y_min, y_max) = range(traces.iter().flatten().copied()).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);
    let s_max = steps.saturating_sub(1).max(1) as f64;

    let mut grid = vec![vec![' '; width]; height];
    for trace in &traces {
        for (s, &v) in trace.iter().enumerate() {
            grid[map_y(v, y_min, y_max, height)][map_x(s as f64, 0.0, s_max, width)] = '.';
        }
    }

    let name = chains.names.get(dim).map(String::as_str).unwrap_or("?");
    let mut out = String::new();
    out.push_str(&format!(
        "Trace {name}: steps={steps} walkers={} | y=[{y_min:.4}, {y_max:.4}]\n",
        traces.len()
    ));
    push_grid(&mut out, grid);
    out
}

/// Horizontal histogram of one parameter's samples.
pub fn render_histogram(name: &str, values: &[f64], bins: usize, width: usize) -> String {
    let bins = bins.max(1);
    let width = width.max(1);
    let mut out = format!("Marginal {name} (n={})\n", values.len());

    let Some((lo, hi)) = range(values.iter().copied()) else {
        out.push_str("  (no spread)\n");
        return out;
    };
    let step = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values.iter().filter(|v| v.is_finite()) {
        let i = (((v - lo) / step) as usize).min(bins - 1);
        counts[i] += 1;
    }
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1);

    for (i, &c) in counts.iter().enumerate() {
        let bar = (c * width).div_ceil(max_count);
        out.push_str(
            format!("{:>12.5} | {}", lo + step * (i as f64 + 0.5), "#".repeat(bar)).trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Traces and histograms of every sampled parameter.
pub fn render_chain_summary(
    chains: &EnsembleChains,
    discard: usize,
    thin: usize,
    width: usize,
    height: usize,
) -> String {
    let flat = chains.flat_samples(discard, thin);
    let mut out = String::new();
    for (d, name) in chains.names.iter().enumerate() {
        out.push_str(&render_traces(chains, d, width, height));
        let values: Vec<f64> = flat.iter().map(|s| s[d]).collect();
        out.push_str(&render_histogram(name, &values, 10, width.saturating_sub(15)));
        out.push('\n');
    }
    out
}

fn band(values: &[f64], i: usize) -> f64 {
    values.get(i).copied().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Fill rows `top..=bottom` of column `x`, leaving other markers in place.
fn fill_column(grid: &mut [Vec<char>], x: usize, top: usize, bottom: usize, ch: char) {
    for row in grid.iter_mut().take(bottom + 1).skip(top) {
        if matches!(row[x], ' ' | '.' | ':') {
            row[x] = ch;
        }
    }
}

fn draw_curve(
    grid: &mut [Vec<char>],
    curve: &[(f64, f64)],
    t_min: f64,
    t_max: f64,
    y_min: f64,
    y_max: f64,
    ch: char,
) {
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, t_min, t_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, ch);
        } else if matches!(grid[yy][x], ' ' | '.' | ':') {
            grid[yy][x] = ch;
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish); only band or blank cells are overwritten.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0 && (y0 as usize) < grid.len() && x0 >= 0 && (x0 as usize) < grid[0].len() {
            let cell = &mut grid[y0 as usize][x0 as usize];
            if matches!(*cell, ' ' | '.' | ':') {
                *cell = ch;
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn push_grid(out: &mut String, grid: Vec<Vec<char>>) {
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_plot_golden_snapshot_small() {
        let curves = FitCurves {
            time_label: "tacq".to_string(),
            tissue_label: "roi".to_string(),
            input_label: "cin".to_string(),
            time: vec![0.0, 9.0],
            tissue: vec![0.0, 10.0],
            input: vec![10.0, 0.0],
            cutoff: 2,
            best_fit: vec![0.0, 10.0],
            confidence_band: vec![0.0, 0.0],
            prediction_band: vec![0.0, 0.0],
        };

        let txt = render_fit_plot(&curves, 10, 5);
        let expected = concat!(
            "Plot: tacq=[0.000, 9.000] | y=[-0.50, 10.50]\n",
            "x       -o\n",
            "      --: \n",
            "    --    \n",
            " :--      \n",
            "o-       x\n",
            "o roi  x cin  - fit  : confidence  . prediction\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn bands_surround_the_fit() {
        let curves = FitCurves {
            time_label: "t".to_string(),
            tissue_label: "roi".to_string(),
            input_label: "cin".to_string(),
            time: vec![0.0, 1.0, 2.0, 3.0],
            tissue: vec![5.0, 5.0, 5.0, 5.0],
            input: vec![0.0, 0.0, 0.0, 0.0],
            cutoff: 3,
            best_fit: vec![5.0, 5.0, 5.0],
            confidence_band: vec![1.0, 1.0, 1.0],
            prediction_band: vec![3.0, 3.0, 3.0],
        };
        let txt = render_fit_plot(&curves, 20, 11);
        assert!(txt.contains(':'));
        assert!(txt.contains('.'));
        // Nothing is drawn right of the fitted range except the markers.
        let rows: Vec<&str> = txt.lines().skip(1).take(11).collect();
        assert!(rows.iter().all(|r| !r.ends_with(':') && !r.ends_with('.')));
    }

    #[test]
    fn series_plot_golden_snapshot_small() {
        let series = vec![("roi".to_string(), vec![0.0, 10.0])];
        let txt = render_series_plot("tacq", &[0.0, 9.0], &series, None, Some("Bq/mL"), 10, 5);
        let expected = concat!(
            "Plot: tacq=[0.000, 9.000] | Bq/mL=[-0.50, 10.50]\n",
            "        oo\n",
            "      oo  \n",
            "    oo    \n",
            "  oo      \n",
            "oo        \n",
            "o roi\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn series_plot_gives_each_column_a_marker() {
        let series = vec![
            ("1".to_string(), vec![0.0, 5.0, 7.0, 3.0]),
            ("2".to_string(), vec![1.0, 2.0, 4.0, 8.0]),
        ];
        let txt = render_series_plot("tacq", &[0.0, 1.0, 2.0, 3.0], &series, Some("Time [sec]"), None, 20, 8);
        assert!(txt.starts_with("Plot: Time [sec]=[0.000, 3.000] | y=["));
        assert!(txt.ends_with("o 1  x 2\n"));
        let grid: String = txt.lines().skip(1).take(8).collect();
        assert!(grid.contains('o'));
        assert!(grid.contains('x'));
    }

    #[test]
    fn histogram_counts_every_sample() {
        let values = [1.0, 1.1, 1.2, 2.5, 3.0];
        let txt = render_histogram("amp", &values, 2, 10);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines[0], "Marginal amp (n=5)");
        assert!(lines[1].ends_with("##########"));
        assert!(lines[2].ends_with("#######"));
        assert_eq!(render_histogram("c", &[1.0, 1.0], 3, 10), "Marginal c (n=2)\n  (no spread)\n");
    }
}
