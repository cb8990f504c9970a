//! Duration-factor self-calibration
//!
//! Each cell gets its own persistence/weight pair `(p, q)` for wet and for dry
//! spells, fitted from the magnitude of its most extreme cumulative Z over a
//! set of window lengths:
//!
//! ```text
//! extreme sum(t) ≈ m·t + b      p = 1 − m / (m + b)      q = C / (m + b)
//! ```
//!
//! with `C = +4` on the wet side and `−4` on the dry side. With the factors
//! fixed, Z is then rescaled (positive and negative parts separately) until
//! the 98th and 2nd percentiles of PDSI sit at ±4. Each rescaling takes the
//! square root of the full step. If the tolerance is not reached, the pass
//! closest to the target is kept.
//!
//! # Scientific References
//! - Wells, N., Goddard, S., Hayes, M.J. (2004). "A Self-Calibrating Palmer
//!   Drought Severity Index". Journal of Climate, 17, 2335-2351

use crate::config::{CalibrationConfig, PdsiConfig};
use crate::error::CalibrationWarning;
use crate::metrics::percentile_sorted;
use crate::spell::{run_recursion, SpellRecord, SpellSide};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Smallest `|m + b|` accepted from the duration fit
const MIN_FIT_SCALE: f64 = 1e-9;

/// Percentiles closer to zero than this carry no scaling information
const MIN_PERCENTILE: f64 = 1e-6;

/// Bounds on a single Z scaling step
const MIN_SCALE_STEP: f64 = 0.1;
const MAX_SCALE_STEP: f64 = 10.0;

/// Persistence and weight of the recursion `X = p·X_prev + q·Z`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpellFactors {
    /// Persistence of the previous month's index
    pub p: f64,
    /// Weight of the current month's Z
    pub q: f64,
}

impl SpellFactors {
    /// Palmer's original constants
    pub const PALMER: SpellFactors = SpellFactors {
        p: 0.897,
        q: 1.0 / 3.0,
    };

    /// One step of the recursion
    #[inline]
    pub fn next(&self, previous: f64, z: f64) -> f64 {
        self.p * previous + self.q * z
    }

    /// Both factors strictly positive and finite
    pub fn is_valid(&self) -> bool {
        self.p.is_finite() && self.q.is_finite() && self.p > 0.0 && self.q > 0.0
    }
}

/// Duration factors for both sides of a cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationFactors {
    /// Factors for wet spells (Z ≥ 0)
    pub wet: SpellFactors,
    /// Factors for dry spells (Z < 0)
    pub dry: SpellFactors,
}

impl DurationFactors {
    /// Same factors on both sides
    pub fn uniform(factors: SpellFactors) -> Self {
        Self {
            wet: factors,
            dry: factors,
        }
    }

    /// Factors for a side
    #[inline]
    pub fn for_side(&self, side: SpellSide) -> SpellFactors {
        match side {
            SpellSide::Wet => self.wet,
            SpellSide::Dry => self.dry,
        }
    }

    /// Factors selected by the sign of an anomaly
    #[inline]
    pub fn for_anomaly(&self, z: f64) -> SpellFactors {
        if z >= 0.0 {
            self.wet
        } else {
            self.dry
        }
    }
}

/// Outcome of the calibration for one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Factors used by the final recursion
    pub factors: DurationFactors,
    /// Cumulative multiplier applied to positive Z
    pub wet_scale: f64,
    /// Cumulative multiplier applied to negative Z
    pub dry_scale: f64,
    /// Number of recursion passes run
    pub iterations: usize,
    /// Whether the Z scaling reached its tolerance
    pub converged: bool,
    /// Whether literature factors replaced a fit on either side
    pub fallback_used: bool,
    /// Recoverable problems met on the way
    pub warnings: Vec<CalibrationWarning>,
}

/// Calibration together with the Z series and recursion it settled on
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedSeries {
    /// Factors, scales and diagnostics
    pub calibration: Calibration,
    /// Z after scaling
    pub z: Vec<f64>,
    /// Recursion over the scaled Z
    pub record: SpellRecord,
}

/// Result of fitting one side
#[derive(Debug, Clone, Copy, PartialEq)]
enum SideFit {
    Fitted(SpellFactors),
    Degenerate,
}

/// Rolling window sums of `z` for window length `duration`
fn window_sums(z: &[f64], duration: usize) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(z.len() + 1);
    prefix.push(0.0);
    for &value in z {
        prefix.push(prefix[prefix.len() - 1] + value);
    }
    (duration..=z.len())
        .map(|end| prefix[end] - prefix[end - duration])
        .collect()
}

/// Extreme cumulative Z per duration, as `(duration, sum)` points
fn extreme_points(z: &[f64], side: SpellSide, config: &CalibrationConfig) -> Vec<(f64, f64)> {
    let pct = match side {
        SpellSide::Wet => config.extreme_percentile,
        SpellSide::Dry => 100.0 - config.extreme_percentile,
    };
    config
        .durations
        .iter()
        .filter(|&&duration| duration <= z.len())
        .map(|&duration| {
            let mut sums = window_sums(z, duration);
            sums.sort_unstable_by(f64::total_cmp);
            (duration as f64, percentile_sorted(&sums, pct))
        })
        .collect()
}

/// Least-squares line `sum = m·t + b` through the points
fn fit_line(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let (st, stt, sy, sty) = points.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(st, stt, sy, sty), &(t, y)| (st + t, stt + t * t, sy + y, sty + t * y),
    );
    let normal = Matrix2::new(stt, st, st, points.len() as f64);
    let solution = normal.lu().solve(&Vector2::new(sty, sy))?;
    Some((solution[0], solution[1]))
}

fn fit_side(z: &[f64], side: SpellSide, config: &CalibrationConfig) -> SideFit {
    let Some((slope, intercept)) = fit_line(&extreme_points(z, side, config)) else {
        return SideFit::Degenerate;
    };
    let scale = slope + intercept;
    if !scale.is_finite() || scale.abs() < MIN_FIT_SCALE {
        return SideFit::Degenerate;
    }

    let factors = SpellFactors {
        p: 1.0 - slope / scale,
        q: side.sign() * config.severity_target / scale,
    };
    if factors.p.is_finite() && factors.q.is_finite() && factors.q > 0.0 {
        SideFit::Fitted(factors)
    } else {
        SideFit::Degenerate
    }
}

/// Fit, clamp or fall back for one side
fn resolve_side(
    z: &[f64],
    side: SpellSide,
    config: &CalibrationConfig,
    warnings: &mut Vec<CalibrationWarning>,
) -> (SpellFactors, bool) {
    match fit_side(z, side, config) {
        SideFit::Fitted(raw) => {
            let clamped = SpellFactors {
                p: config.p_range.clamp(raw.p),
                q: config.q_range.clamp(raw.q),
            };
            if clamped != raw {
                warn!(
                    "{} duration factors p={:.4}, q={:.4} outside valid range, clamped to p={:.4}, q={:.4}",
                    side, raw.p, raw.q, clamped.p, clamped.q
                );
                warnings.push(CalibrationWarning::FactorsClamped { side, raw });
            }
            (clamped, false)
        }
        SideFit::Degenerate => {
            warn!("No {} spell signal in history, using fallback factors", side);
            warnings.push(CalibrationWarning::DegenerateHistory { side });
            (config.fallback, true)
        }
    }
}

/// Scale steps `(wet, dry)` that would move the extreme percentiles of
/// `pdsi` onto the severity target
fn scale_steps(pdsi: &[f64], config: &CalibrationConfig) -> (f64, f64) {
    let mut sorted: Vec<f64> = pdsi.iter().copied().filter(|x| x.is_finite()).collect();
    if sorted.is_empty() {
        return (1.0, 1.0);
    }
    sorted.sort_unstable_by(f64::total_cmp);

    let upper = percentile_sorted(&sorted, config.extreme_percentile);
    let lower = percentile_sorted(&sorted, 100.0 - config.extreme_percentile);
    let target = config.severity_target;

    let wet = if upper > MIN_PERCENTILE {
        (target / upper).clamp(MIN_SCALE_STEP, MAX_SCALE_STEP)
    } else {
        1.0
    };
    let dry = if lower < -MIN_PERCENTILE {
        (-target / lower).clamp(MIN_SCALE_STEP, MAX_SCALE_STEP)
    } else {
        1.0
    };
    (wet, dry)
}

/// Largest deviation of a scale step from 1
fn step_residual(wet_step: f64, dry_step: f64) -> f64 {
    (wet_step - 1.0).abs().max((dry_step - 1.0).abs())
}

/// One pass of the Z-scaling loop
#[derive(Debug, Clone)]
struct ScaledIterate {
    z: Vec<f64>,
    wet_scale: f64,
    dry_scale: f64,
    record: SpellRecord,
    residual: f64,
}

/// Run without calibration or Z scaling
fn fixed(
    z: &[f64],
    config: &PdsiConfig,
    fallback_used: bool,
    warnings: Vec<CalibrationWarning>,
) -> CalibratedSeries {
    let factors = DurationFactors::uniform(config.calibration.fallback);
    CalibratedSeries {
        calibration: Calibration {
            factors,
            wet_scale: 1.0,
            dry_scale: 1.0,
            iterations: 1,
            converged: true,
            fallback_used,
            warnings,
        },
        z: z.to_vec(),
        record: run_recursion(z, factors, &config.spell),
    }
}

/// Calibrate duration factors and Z scaling for one cell
///
/// # Arguments
/// * `z` - Raw Z-index series (full history)
/// * `config` - Engine configuration
///
/// # Returns
/// Calibration metadata, the scaled Z series and the recursion over it.
/// Problems are reported as warnings; this never fails.
pub fn self_calibrate(z: &[f64], config: &PdsiConfig) -> CalibratedSeries {
    let cal = &config.calibration;

    if !cal.enabled {
        return fixed(z, config, false, Vec::new());
    }
    if z.len() < cal.min_history_months {
        warn!(
            "History of {} months is shorter than {}, using fallback duration factors",
            z.len(),
            cal.min_history_months
        );
        let warning = CalibrationWarning::InsufficientHistory {
            months: z.len(),
            required: cal.min_history_months,
        };
        return fixed(z, config, true, vec![warning]);
    }

    let mut warnings = Vec::new();
    let (wet, wet_fallback) = resolve_side(z, SpellSide::Wet, cal, &mut warnings);
    let (dry, dry_fallback) = resolve_side(z, SpellSide::Dry, cal, &mut warnings);
    let factors = DurationFactors { wet, dry };
    debug!(
        "Fitted duration factors: wet p={:.4} q={:.4}, dry p={:.4} q={:.4}",
        wet.p, wet.q, dry.p, dry.q
    );

    let mut current = ScaledIterate {
        z: z.to_vec(),
        wet_scale: 1.0,
        dry_scale: 1.0,
        record: run_recursion(z, factors, &config.spell),
        residual: 0.0,
    };
    let mut best: Option<ScaledIterate> = None;
    let mut iterations = 1;

    let (outcome, converged) = loop {
        let (wet_step, dry_step) = scale_steps(&current.record.pdsi, cal);
        current.residual = step_residual(wet_step, dry_step);

        if current.residual < cal.tolerance {
            debug!("Z scaling converged after {} iterations", iterations);
            break (current, true);
        }
        let improved = match &best {
            Some(b) => current.residual < b.residual,
            None => true,
        };
        if improved {
            best = Some(current.clone());
        }
        if iterations >= cal.max_iterations {
            let outcome = best.unwrap_or(current);
            warn!(
                "Z scaling did not converge after {} iterations, keeping best residual {:.2e}",
                iterations, outcome.residual
            );
            warnings.push(CalibrationWarning::NumericDivergence {
                iterations,
                residual: outcome.residual,
            });
            break (outcome, false);
        }

        // Half of the full step in log space
        let (wet_step, dry_step) = (wet_step.sqrt(), dry_step.sqrt());
        for value in &mut current.z {
            *value *= if *value > 0.0 { wet_step } else { dry_step };
        }
        current.wet_scale *= wet_step;
        current.dry_scale *= dry_step;
        current.record = run_recursion(&current.z, factors, &config.spell);
        iterations += 1;
    };

    CalibratedSeries {
        calibration: Calibration {
            factors,
            wet_scale: outcome.wet_scale,
            dry_scale: outcome.dry_scale,
            iterations,
            converged,
            fallback_used: wet_fallback || dry_fallback,
            warnings,
        },
        z: outcome.z,
        record: outcome.record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::percentile;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Monthly Z with a seasonal swing plus noise
    fn noisy_z(seed: u64, months: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..months)
            .map(|i| (i as f64 * 0.21).sin() * 1.5 + rng.random_range(-2.0..2.0))
            .collect()
    }

    #[test]
    fn test_window_sums() {
        assert_eq!(window_sums(&[1.0, 2.0, 3.0, 4.0], 2), vec![3.0, 5.0, 7.0]);
        assert_eq!(window_sums(&[1.0, 2.0], 2), vec![3.0]);
        assert!(window_sums(&[1.0], 3).is_empty());
    }

    #[test]
    fn test_fit_line_exact() {
        let points: Vec<(f64, f64)> = [3.0, 6.0, 12.0, 24.0]
            .iter()
            .map(|&t| (t, 0.4 * t + 2.0))
            .collect();
        let (m, b) = fit_line(&points).unwrap();
        assert_relative_eq!(m, 0.4, epsilon = 1e-10);
        assert_relative_eq!(b, 2.0, epsilon = 1e-10);

        assert!(fit_line(&points[..1]).is_none());
    }

    #[test]
    fn test_zero_history_is_degenerate() {
        let config = PdsiConfig::default();
        let result = self_calibrate(&[0.0; 120], &config);
        let cal = &result.calibration;

        assert!(cal.fallback_used);
        assert!(cal.converged);
        assert_eq!(cal.iterations, 1);
        assert_eq!(cal.factors, DurationFactors::uniform(SpellFactors::PALMER));
        assert!(cal.warnings.contains(&CalibrationWarning::DegenerateHistory {
            side: SpellSide::Wet
        }));
        assert!(cal.warnings.contains(&CalibrationWarning::DegenerateHistory {
            side: SpellSide::Dry
        }));
        assert!(result.record.pdsi.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_short_history_falls_back() {
        let config = PdsiConfig::default();
        let z = noisy_z(1, 36);
        let result = self_calibrate(&z, &config);

        assert!(result.calibration.fallback_used);
        assert_eq!(
            result.calibration.warnings,
            vec![CalibrationWarning::InsufficientHistory {
                months: 36,
                required: 60
            }]
        );
        assert_eq!(result.z, z);
        assert_eq!(result.calibration.wet_scale, 1.0);
    }

    #[test]
    fn test_disabled_uses_palmer_constants() {
        let mut config = PdsiConfig::default();
        config.calibration.enabled = false;
        let z = noisy_z(2, 240);
        let result = self_calibrate(&z, &config);

        assert_eq!(result.calibration.factors.wet, SpellFactors::PALMER);
        assert_eq!(result.calibration.factors.dry, SpellFactors::PALMER);
        assert!(!result.calibration.fallback_used);
        assert!(result.calibration.warnings.is_empty());
        assert_eq!(result.z, z);
    }

    #[test]
    fn test_calibrated_factors_are_valid_and_in_range() {
        let config = PdsiConfig::default();
        for seed in 0..5 {
            let result = self_calibrate(&noisy_z(seed, 480), &config);
            let cal = &result.calibration;
            for factors in [cal.factors.wet, cal.factors.dry] {
                assert!(factors.is_valid());
                assert!(config.calibration.p_range.contains(factors.p));
                assert!(config.calibration.q_range.contains(factors.q));
            }
            assert!((1..=config.calibration.max_iterations).contains(&cal.iterations));
            assert!(cal.wet_scale > 0.0 && cal.dry_scale > 0.0);
        }
    }

    #[test]
    fn test_converged_percentiles_hit_target() {
        let config = PdsiConfig::default();
        let mut converged_any = false;
        for seed in 10..22 {
            let result = self_calibrate(&noisy_z(seed, 600), &config);
            if !result.calibration.converged {
                assert!(matches!(
                    result.calibration.warnings.last(),
                    Some(CalibrationWarning::NumericDivergence { .. })
                ));
                continue;
            }
            converged_any = true;
            let upper = percentile(&result.record.pdsi, 98.0).unwrap();
            let lower = percentile(&result.record.pdsi, 2.0).unwrap();
            assert_relative_eq!(upper, 4.0, max_relative = 5e-3);
            assert_relative_eq!(lower, -4.0, max_relative = 5e-3);
        }
        assert!(converged_any);
    }

    #[test]
    fn test_unconverged_scaling_keeps_best_pass() {
        let config = PdsiConfig::default();
        let cal = &config.calibration;
        for seed in 10..30 {
            let z = noisy_z(seed, 600);
            let result = self_calibrate(&z, &config);
            let factors = result.calibration.factors;

            // Returned record is the recursion over the returned Z
            assert_eq!(result.record, run_recursion(&result.z, factors, &config.spell));

            let (wet_step, dry_step) = scale_steps(&result.record.pdsi, cal);
            let residual = step_residual(wet_step, dry_step);
            if result.calibration.converged {
                assert!(residual < cal.tolerance);
                continue;
            }

            match result.calibration.warnings.last() {
                Some(CalibrationWarning::NumericDivergence {
                    iterations,
                    residual: reported,
                }) => {
                    assert_eq!(*iterations, cal.max_iterations);
                    assert_eq!(*reported, residual);
                }
                other => panic!("expected divergence warning, got {other:?}"),
            }

            // Never worse than leaving Z unscaled
            let unscaled = run_recursion(&z, factors, &config.spell);
            let (wet_step, dry_step) = scale_steps(&unscaled.pdsi, cal);
            assert!(residual <= step_residual(wet_step, dry_step));
        }
    }

    #[test]
    fn test_scaling_preserves_sign() {
        let config = PdsiConfig::default();
        let z = noisy_z(3, 360);
        let result = self_calibrate(&z, &config);
        for (raw, scaled) in z.iter().zip(&result.z) {
            assert!(raw.signum() == scaled.signum() || *raw == 0.0);
        }
    }

    #[test]
    fn test_calibration_is_deterministic() {
        let config = PdsiConfig::default();
        let z = noisy_z(4, 300);
        assert_eq!(self_calibrate(&z, &config), self_calibrate(&z, &config));
    }
}
