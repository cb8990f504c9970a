//! Diagnostics over PDSI output
//!
//! Percentiles drive the self-calibration; trend and correlation are the
//! usual summaries of a gridded PDSI run. Non-finite samples are skipped, and
//! every function returns `None` instead of NaN when the statistic is
//! undefined.

use crate::batch::TimeCellArray;

/// Empirical percentile with linear interpolation between order statistics
///
/// `pct` is in `[0, 100]`. Returns `None` for an empty (or all non-finite)
/// sample or an out-of-range `pct`.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, pct))
}

/// Percentile of an already sorted, non-empty sample
pub(crate) fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Ordinary least-squares slope of `series` per year
///
/// Sample `i` sits at `i * years_per_step` years (`1/12` for monthly data).
///
/// # Returns
/// Slope in series units per year, or `None` with fewer than two finite
/// samples or a non-positive step
pub fn linear_trend(series: &[f64], years_per_step: f64) -> Option<f64> {
    if !(years_per_step.is_finite() && years_per_step > 0.0) {
        return None;
    }
    let (times, values): (Vec<f64>, Vec<f64>) = series
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i as f64 * years_per_step, v))
        .unzip();
    covariance_ratio(&times, &values).map(|(cov, var_t, _)| cov / var_t)
}

/// Pearson correlation of two equally long series
///
/// Only months where both values are finite are used. Returns `None` for
/// mismatched lengths, fewer than two shared samples or a constant series.
pub fn temporal_corr(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .unzip();
    let (cov, var_x, var_y) = covariance_ratio(&xs, &ys)?;
    if var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

/// Per-cell trend of a time × cell array
pub fn linear_trend_map(array: &TimeCellArray, years_per_step: f64) -> Vec<Option<f64>> {
    (0..array.n_cells())
        .map(|cell| linear_trend(&array.cell_series(cell), years_per_step))
        .collect()
}

/// Per-cell correlation of two time × cell arrays
///
/// Returns `None` for every cell when the shapes differ.
pub fn temporal_corr_map(a: &TimeCellArray, b: &TimeCellArray) -> Vec<Option<f64>> {
    if a.n_months() != b.n_months() || a.n_cells() != b.n_cells() {
        return vec![None; a.n_cells()];
    }
    (0..a.n_cells())
        .map(|cell| temporal_corr(&a.cell_series(cell), &b.cell_series(cell)))
        .collect()
}

/// Centered sums `(Σdxdy, Σdx², Σdy²)`; `None` if fewer than two samples or
/// `x` is constant
fn covariance_ratio(xs: &[f64], ys: &[f64]) -> Option<(f64, f64, f64)> {
    if xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let (cov, var_x, var_y) = xs.iter().zip(ys).fold(
        (0.0, 0.0, 0.0),
        |(cov, var_x, var_y), (&x, &y)| {
            let dx = x - x_mean;
            let dy = y - y_mean;
            (cov + dx * dy, var_x + dx * dx, var_y + dy * dy)
        },
    );
    (var_x > 0.0).then_some((cov, var_x, var_y))
}
