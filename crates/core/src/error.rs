//! Error and warning types for the self-calibrating PDSI engine
//!
//! Errors are fatal for the cell they belong to; warnings are attached to the
//! calibration metadata of a cell whose output is still valid.

use crate::calibration::SpellFactors;
use crate::spell::SpellSide;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Forcing variable that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForcingField {
    /// Monthly precipitation (mm)
    Precipitation,
    /// Monthly potential evapotranspiration (mm)
    PotentialEvapotranspiration,
    /// Available water capacity of the cell (mm)
    AvailableWaterCapacity,
    /// Supplied actual evapotranspiration (mm)
    Evapotranspiration,
    /// Supplied soil recharge (mm)
    Recharge,
    /// Supplied runoff (mm)
    Runoff,
    /// Supplied soil moisture loss (mm)
    Loss,
}

impl fmt::Display for ForcingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForcingField::Precipitation => write!(f, "precipitation"),
            ForcingField::PotentialEvapotranspiration => write!(f, "potential evapotranspiration"),
            ForcingField::AvailableWaterCapacity => write!(f, "available water capacity"),
            ForcingField::Evapotranspiration => write!(f, "evapotranspiration"),
            ForcingField::Recharge => write!(f, "recharge"),
            ForcingField::Runoff => write!(f, "runoff"),
            ForcingField::Loss => write!(f, "loss"),
        }
    }
}

/// Fatal error for a single cell (or for construction of inputs)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PdsiError {
    /// Negative or non-finite forcing value
    InvalidForcing {
        /// Offending variable
        field: ForcingField,
        /// Month index, `None` for per-cell scalars such as AWC
        month: Option<usize>,
        /// The rejected value
        value: f64,
    },
    /// Array lengths disagree
    ShapeMismatch {
        /// What was being checked (e.g. `"pet"`)
        what: &'static str,
        /// Expected number of elements
        expected: usize,
        /// Actual number of elements
        actual: usize,
    },
    /// A cell has no months at all
    EmptyHistory,
    /// Configuration failed validation
    InvalidConfig(String),
}

impl PdsiError {
    /// Short stable label, used as a key when summarising batch failures
    pub fn kind(&self) -> &'static str {
        match self {
            PdsiError::InvalidForcing { .. } => "invalid_forcing",
            PdsiError::ShapeMismatch { .. } => "shape_mismatch",
            PdsiError::EmptyHistory => "empty_history",
            PdsiError::InvalidConfig(_) => "invalid_config",
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        PdsiError::InvalidConfig(message.into())
    }
}

impl fmt::Display for PdsiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdsiError::InvalidForcing {
                field,
                month: Some(month),
                value,
            } => write!(f, "Invalid forcing: {field} = {value} at month {month}"),
            PdsiError::InvalidForcing {
                field,
                month: None,
                value,
            } => write!(f, "Invalid forcing: {field} = {value}"),
            PdsiError::ShapeMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "Shape mismatch for {what}: expected {expected} values, got {actual}"
            ),
            PdsiError::EmptyHistory => write!(f, "Forcing history is empty"),
            PdsiError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for PdsiError {}

/// Recoverable calibration problem; the cell output is still produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalibrationWarning {
    /// History too short to self-calibrate; fallback factors used for both sides
    InsufficientHistory {
        /// Months available
        months: usize,
        /// Months required
        required: usize,
    },
    /// No usable magnitude/duration relationship for one side; fallback factors used
    DegenerateHistory {
        /// Side that could not be fitted
        side: SpellSide,
    },
    /// Fitted factors were outside the configured range and were clamped
    FactorsClamped {
        /// Side whose factors were clamped
        side: SpellSide,
        /// Factors before clamping
        raw: SpellFactors,
    },
    /// Z scaling did not converge within the iteration budget
    NumericDivergence {
        /// Iterations performed
        iterations: usize,
        /// Largest deviation of a scale step from 1 in the pass that was kept
        residual: f64,
    },
}

impl fmt::Display for CalibrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationWarning::InsufficientHistory { months, required } => write!(
                f,
                "Insufficient history: {months} months (need {required}), using fallback duration factors"
            ),
            CalibrationWarning::DegenerateHistory { side } => write!(
                f,
                "No {side} spell signal in history, using fallback duration factors"
            ),
            CalibrationWarning::FactorsClamped { side, raw } => write!(
                f,
                "{side} duration factors p={:.4}, q={:.4} clamped to valid range",
                raw.p, raw.q
            ),
            CalibrationWarning::NumericDivergence {
                iterations,
                residual,
            } => write!(
                f,
                "Z scaling did not converge after {iterations} iterations (residual {residual:.2e})"
            ),
        }
    }
}
