//! Per-cell scPDSI pipeline
//!
//! Water balance → CAFEC departures → K and Z → self-calibration (which runs
//! the spell recursion while it iterates) → output record.

use crate::cafec::CafecCoefficients;
use crate::calibration::{self_calibrate, SpellFactors};
use crate::config::PdsiConfig;
use crate::error::{CalibrationWarning, PdsiError};
use crate::forcing::CellForcing;
use crate::spell::{SpellPhase, SpellTransition};
use crate::water_balance::{run_water_balance, WaterBalanceMonth};
use crate::zindex::ClimaticCoefficients;
use serde::Serialize;
use tracing::debug;

/// Calibration summary for one cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationMetadata {
    /// Climatic characteristic per calendar month
    pub k: [f64; 12],
    /// CAFEC coefficients per calendar month
    pub cafec: CafecCoefficients,
    /// Wet-spell duration factors
    pub wet: SpellFactors,
    /// Dry-spell duration factors
    pub dry: SpellFactors,
    /// Multiplier applied to positive Z
    pub wet_scale: f64,
    /// Multiplier applied to negative Z
    pub dry_scale: f64,
    /// Recursion passes run during calibration
    pub iterations: usize,
    /// Whether the Z scaling converged
    pub converged: bool,
    /// Whether literature factors were used on either side
    pub fallback_used: bool,
    /// Recoverable calibration problems
    pub warnings: Vec<CalibrationWarning>,
}

/// Everything computed for one cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellOutput {
    /// PDSI per month
    pub pdsi: Vec<f64>,
    /// Calibrated Z per month (the series the recursion ran on)
    pub z_index: Vec<f64>,
    /// Z before self-calibration scaling
    pub raw_z_index: Vec<f64>,
    /// Spell phase at the end of each month
    pub phases: Vec<SpellPhase>,
    /// All phase changes
    pub transitions: Vec<SpellTransition>,
    /// Phase after the last month
    pub terminal_phase: SpellPhase,
    /// Water-balance terms per month
    pub water_balance: Vec<WaterBalanceMonth>,
    /// Calibration summary
    pub metadata: CalibrationMetadata,
}

impl CellOutput {
    /// Number of months
    pub fn len(&self) -> usize {
        self.pdsi.len()
    }

    /// True for an empty record
    pub fn is_empty(&self) -> bool {
        self.pdsi.is_empty()
    }
}

/// Compute scPDSI for one cell
///
/// # Errors
/// `PdsiError::InvalidConfig` if `config` fails validation. Forcing is
/// validated when the `CellForcing` is built, so no other error can occur.
pub fn compute_cell(forcing: &CellForcing, config: &PdsiConfig) -> Result<CellOutput, PdsiError> {
    config.validate()?;
    Ok(compute_validated(forcing, config))
}

/// Compute with an already validated configuration
pub(crate) fn compute_validated(forcing: &CellForcing, config: &PdsiConfig) -> CellOutput {
    let water_balance = run_water_balance(forcing, &config.soil);
    let cafec = CafecCoefficients::from_history(&water_balance);
    let departures = cafec.departures(&water_balance);
    let climate = ClimaticCoefficients::from_history(&water_balance, &departures);
    let raw_z_index = climate.z_index(&departures);

    let calibrated = self_calibrate(&raw_z_index, config);
    let calibration = calibrated.calibration;
    let record = calibrated.record;

    debug!(
        "Cell computed: {} months, {} transitions, {} calibration iterations",
        forcing.len(),
        record.transitions.len(),
        calibration.iterations
    );

    CellOutput {
        pdsi: record.pdsi,
        z_index: calibrated.z,
        raw_z_index,
        phases: record.phases,
        transitions: record.transitions,
        terminal_phase: record.terminal_phase,
        water_balance,
        metadata: CalibrationMetadata {
            k: *climate.k(),
            cafec,
            wet: calibration.factors.wet,
            dry: calibration.factors.dry,
            wet_scale: calibration.wet_scale,
            dry_scale: calibration.dry_scale,
            iterations: calibration.iterations,
            converged: calibration.converged,
            fallback_used: calibration.fallback_used,
            warnings: calibration.warnings,
        },
    }
}
