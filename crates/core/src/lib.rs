//! Self-calibrating Palmer Drought Severity Index
//!
//! Computes scPDSI for gridded monthly forcing (precipitation, potential
//! evapotranspiration and available water capacity per cell).
//!
//! ## Pipeline
//!
//! - Two-layer soil water balance producing actual and potential terms
//! - CAFEC coefficients and moisture departure per calendar month
//! - Climatic characteristic K and the Z-index
//! - Per-cell duration-factor self-calibration with Z scaling
//! - Month-by-month PDSI recursion as an explicit spell state machine
//!
//! Cells are independent; [`BatchRunner`] spreads them over a rayon pool with
//! per-cell failure isolation.
//!
//! ```
//! use scpdsi_core::{compute_cell, CellForcing, PdsiConfig};
//!
//! let forcing = CellForcing::new(vec![60.0; 120], vec![60.0; 120], 150.0).unwrap();
//! let output = compute_cell(&forcing, &PdsiConfig::default()).unwrap();
//! assert!(output.pdsi.iter().all(|x| x.abs() < 1e-12));
//! ```

// Core types and utilities
pub mod core_types;

pub mod config;
pub mod error;
pub mod forcing;

// Index computation
pub mod cafec;
pub mod calibration;
pub mod pipeline;
pub mod spell;
pub mod water_balance;
pub mod zindex;

// Grid processing and diagnostics
pub mod batch;
pub mod metrics;
pub mod synthetic;

pub use core_types::{Inches, Millimeters};

pub use config::{CalibrationConfig, ParamRange, PdsiConfig, SoilConfig, SpellConfig};
pub use error::{CalibrationWarning, ForcingField, PdsiError};
pub use forcing::{CellForcing, GridForcing, HydrologicComponents};

pub use cafec::CafecCoefficients;
pub use calibration::{self_calibrate, Calibration, DurationFactors, SpellFactors};
pub use pipeline::{compute_cell, CalibrationMetadata, CellOutput};
pub use spell::{run_recursion, SpellPhase, SpellRecord, SpellSide, SpellTracker, SpellTransition};
pub use water_balance::{run_water_balance, SoilMoisture, WaterBalanceMonth};
pub use zindex::ClimaticCoefficients;

pub use batch::{BatchResult, BatchRunner, CancellationToken, CellFailure, TimeCellArray};
pub use metrics::{linear_trend, percentile, temporal_corr};
pub use synthetic::{DroughtEvent, SyntheticForcing};
