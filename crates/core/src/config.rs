//! Engine configuration
//!
//! Every tunable of the water balance, the self-calibration and the spell
//! classifier lives here and is passed explicitly into the pipeline. All
//! sections deserialize with defaults, so a partial JSON document is enough:
//!
//! ```
//! use scpdsi_core::PdsiConfig;
//!
//! let config = PdsiConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.calibration.extreme_percentile, 98.0);
//! ```

use crate::calibration::SpellFactors;
use crate::core_types::Millimeters;
use crate::error::PdsiError;
use serde::{Deserialize, Serialize};

/// Closed interval used to clamp fitted duration factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    /// Lower bound (inclusive)
    pub min: f64,
    /// Upper bound (inclusive)
    pub max: f64,
}

impl ParamRange {
    /// Create a new range
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp a value into the range
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Whether the value lies inside the range
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    fn is_valid_positive(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min > 0.0 && self.min <= self.max
    }
}

/// Two-layer soil configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoilConfig {
    /// Capacity of the surface layer; the underlying layer holds the rest of AWC
    pub surface_capacity: Millimeters,
    /// Fraction of each layer's capacity filled at the start of the record
    pub initial_fill: f64,
    /// AWC below this is treated as "no soil storage"
    pub degenerate_awc: Millimeters,
}

impl Default for SoilConfig {
    fn default() -> Self {
        Self {
            surface_capacity: Millimeters::ONE_INCH,
            initial_fill: 1.0,
            degenerate_awc: Millimeters::new(1e-6),
        }
    }
}

/// Duration-factor self-calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Fit duration factors per cell; when false, `fallback` is used as the
    /// classic constant pair and Z is not rescaled
    pub enabled: bool,
    /// Shortest history (months) that is self-calibrated
    pub min_history_months: usize,
    /// Window lengths (months) searched for extreme cumulative Z
    pub durations: Vec<usize>,
    /// Percentile defining "extreme" (wet side); the dry side uses `100 - p`
    pub extreme_percentile: f64,
    /// PDSI magnitude that the extreme percentile is calibrated to
    pub severity_target: f64,
    /// Upper bound on Z scaling iterations
    pub max_iterations: usize,
    /// Convergence tolerance on the scale step
    pub tolerance: f64,
    /// Valid range for the persistence factor `p`
    pub p_range: ParamRange,
    /// Valid range for the Z weight `q`
    pub q_range: ParamRange,
    /// Literature factors used on fallback
    pub fallback: SpellFactors,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_history_months: 60,
            durations: vec![3, 6, 9, 12, 18, 24, 30, 36, 42, 48],
            extreme_percentile: 98.0,
            severity_target: 4.0,
            max_iterations: 50,
            tolerance: 1e-3,
            p_range: ParamRange::new(0.6, 0.99),
            q_range: ParamRange::new(0.05, 1.5),
            fallback: SpellFactors::PALMER,
        }
    }
}

/// Spell classifier thresholds (PDSI units unless noted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpellConfig {
    /// Incipient index magnitude that opens an incipient spell
    pub incipient_threshold: f64,
    /// Incipient index magnitude that establishes a spell
    pub established_threshold: f64,
    /// Index magnitude a spell must be driven to (on the opposite side) to end
    pub ending_target: f64,
    /// Z offset giving the effective wetness/dryness that works against a spell
    pub effective_offset: f64,
    /// Maximum number of provisional months held for backtracking
    pub max_backtrack_months: usize,
}

impl Default for SpellConfig {
    fn default() -> Self {
        Self {
            incipient_threshold: 0.5,
            established_threshold: 1.0,
            ending_target: 0.5,
            effective_offset: 0.15,
            max_backtrack_months: 120,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PdsiConfig {
    /// Water-balance settings
    pub soil: SoilConfig,
    /// Self-calibration settings
    pub calibration: CalibrationConfig,
    /// Spell classifier settings
    pub spell: SpellConfig,
}

impl PdsiConfig {
    /// Check internal consistency
    ///
    /// # Errors
    /// Returns `PdsiError::InvalidConfig` naming the first offending setting
    pub fn validate(&self) -> Result<(), PdsiError> {
        let soil = &self.soil;
        if !soil.surface_capacity.is_finite() || *soil.surface_capacity <= 0.0 {
            return Err(PdsiError::invalid_config(format!(
                "soil.surface_capacity must be positive, got {}",
                *soil.surface_capacity
            )));
        }
        if !(0.0..=1.0).contains(&soil.initial_fill) {
            return Err(PdsiError::invalid_config(format!(
                "soil.initial_fill must be within [0, 1], got {}",
                soil.initial_fill
            )));
        }
        if !soil.degenerate_awc.is_finite() || *soil.degenerate_awc < 0.0 {
            return Err(PdsiError::invalid_config(
                "soil.degenerate_awc must be finite and non-negative",
            ));
        }

        let cal = &self.calibration;
        if cal.durations.is_empty() || cal.durations.contains(&0) {
            return Err(PdsiError::invalid_config(
                "calibration.durations must be non-empty and strictly positive",
            ));
        }
        if !(cal.extreme_percentile > 50.0 && cal.extreme_percentile < 100.0) {
            return Err(PdsiError::invalid_config(format!(
                "calibration.extreme_percentile must be within (50, 100), got {}",
                cal.extreme_percentile
            )));
        }
        if !(cal.severity_target.is_finite() && cal.severity_target > 0.0) {
            return Err(PdsiError::invalid_config(
                "calibration.severity_target must be positive",
            ));
        }
        if cal.max_iterations == 0 {
            return Err(PdsiError::invalid_config(
                "calibration.max_iterations must be at least 1",
            ));
        }
        if !(cal.tolerance.is_finite() && cal.tolerance > 0.0) {
            return Err(PdsiError::invalid_config(
                "calibration.tolerance must be positive",
            ));
        }
        if !cal.p_range.is_valid_positive() || !cal.q_range.is_valid_positive() {
            return Err(PdsiError::invalid_config(
                "calibration.p_range and q_range must be positive, finite and ordered",
            ));
        }
        if cal.p_range.max >= 1.0 {
            return Err(PdsiError::invalid_config(format!(
                "calibration.p_range.max must be below 1, got {}",
                cal.p_range.max
            )));
        }
        if !cal.fallback.is_valid() || cal.fallback.p >= 1.0 {
            return Err(PdsiError::invalid_config(
                "calibration.fallback factors must be positive and finite with p below 1",
            ));
        }

        let spell = &self.spell;
        if !(spell.incipient_threshold > 0.0
            && spell.incipient_threshold < spell.established_threshold
            && spell.established_threshold.is_finite())
        {
            return Err(PdsiError::invalid_config(
                "spell thresholds must satisfy 0 < incipient < established",
            ));
        }
        if !(spell.ending_target.is_finite() && spell.ending_target >= 0.0) {
            return Err(PdsiError::invalid_config(
                "spell.ending_target must be finite and non-negative",
            ));
        }
        if !(spell.effective_offset.is_finite() && spell.effective_offset >= 0.0) {
            return Err(PdsiError::invalid_config(
                "spell.effective_offset must be finite and non-negative",
            ));
        }
        if spell.max_backtrack_months == 0 {
            return Err(PdsiError::invalid_config(
                "spell.max_backtrack_months must be at least 1",
            ));
        }

        Ok(())
    }
}
