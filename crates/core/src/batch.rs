//! Parallel batch processing over grid cells
//!
//! Cells are independent, so the runner fans them out over the rayon pool and
//! collects results in cell order. Each cell's forcing is extracted and
//! validated inside its own task; a bad cell fails alone.
//!
//! Cancellation is coarse: a cell checks the token when it starts, so cells
//! already running finish normally and the rest report
//! [`CellFailure::Cancelled`].

use crate::config::PdsiConfig;
use crate::error::PdsiError;
use crate::forcing::GridForcing;
use crate::pipeline::{compute_validated, CalibrationMetadata, CellOutput};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared flag used to stop a batch early
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// New, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; cells that have not started will be skipped
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a cell produced no output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CellFailure {
    /// Invalid forcing or shape for this cell
    Pdsi(PdsiError),
    /// The batch was cancelled before this cell started
    Cancelled,
}

impl CellFailure {
    /// Short stable label used by [`BatchResult::failure_summary`]
    pub fn kind(&self) -> &'static str {
        match self {
            CellFailure::Pdsi(err) => err.kind(),
            CellFailure::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CellFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellFailure::Pdsi(err) => write!(f, "{err}"),
            CellFailure::Cancelled => write!(f, "Cancelled before start"),
        }
    }
}

impl std::error::Error for CellFailure {}

impl From<PdsiError> for CellFailure {
    fn from(err: PdsiError) -> Self {
        CellFailure::Pdsi(err)
    }
}

/// Values laid out time-major (`[month * n_cells + cell]`); cells without
/// output read as `None`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeCellArray {
    n_months: usize,
    n_cells: usize,
    values: Vec<f64>,
    valid: Vec<bool>,
}

impl TimeCellArray {
    /// Assemble from per-cell series; `None` marks a failed cell
    ///
    /// Series longer than `n_months` are truncated; missing months read as
    /// `None`.
    pub fn from_cells(n_months: usize, cells: Vec<Option<Vec<f64>>>) -> Self {
        let n_cells = cells.len();
        let mut values = vec![f64::NAN; n_months * n_cells];
        let mut valid = vec![false; n_cells];

        for (cell, series) in cells.into_iter().enumerate() {
            let Some(series) = series else { continue };
            valid[cell] = true;
            for (month, value) in series.into_iter().take(n_months).enumerate() {
                values[month * n_cells + cell] = value;
            }
        }

        Self {
            n_months,
            n_cells,
            values,
            valid,
        }
    }

    /// Number of months
    pub fn n_months(&self) -> usize {
        self.n_months
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Whether the cell produced output
    pub fn is_valid(&self, cell: usize) -> bool {
        self.valid.get(cell).copied().unwrap_or(false)
    }

    /// Value at `(month, cell)`
    pub fn get(&self, month: usize, cell: usize) -> Option<f64> {
        if month >= self.n_months || !self.is_valid(cell) {
            return None;
        }
        let value = self.values[month * self.n_cells + cell];
        value.is_finite().then_some(value)
    }

    /// One cell's series, NaN where there is no value
    pub fn cell_series(&self, cell: usize) -> Vec<f64> {
        (0..self.n_months)
            .map(|month| self.get(month, cell).unwrap_or(f64::NAN))
            .collect()
    }

    /// Raw time-major buffer (NaN for missing values)
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Per-cell outcomes of a batch run, in cell order
#[derive(Debug, Clone)]
pub struct BatchResult {
    n_months: usize,
    cells: Vec<Result<CellOutput, CellFailure>>,
}

impl BatchResult {
    /// Number of months in the grid
    pub fn n_months(&self) -> usize {
        self.n_months
    }

    /// Number of cells in the grid
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// All per-cell outcomes
    pub fn cells(&self) -> &[Result<CellOutput, CellFailure>] {
        &self.cells
    }

    /// Outcome for one cell
    pub fn cell(&self, cell: usize) -> Option<&Result<CellOutput, CellFailure>> {
        self.cells.get(cell)
    }

    /// Number of cells with output
    pub fn succeeded(&self) -> usize {
        self.cells.iter().filter(|c| c.is_ok()).count()
    }

    /// Calibration metadata of a successful cell
    pub fn metadata(&self, cell: usize) -> Option<&CalibrationMetadata> {
        self.cells.get(cell)?.as_ref().ok().map(|output| &output.metadata)
    }

    /// PDSI as a time × cell array
    pub fn pdsi(&self) -> TimeCellArray {
        self.gather(|output| &output.pdsi)
    }

    /// Calibrated Z-index as a time × cell array
    pub fn z_index(&self) -> TimeCellArray {
        self.gather(|output| &output.z_index)
    }

    /// Failure counts keyed by failure kind
    pub fn failure_summary(&self) -> FxHashMap<&'static str, usize> {
        let mut summary = FxHashMap::default();
        for failure in self.cells.iter().filter_map(|c| c.as_ref().err()) {
            *summary.entry(failure.kind()).or_insert(0) += 1;
        }
        summary
    }

    /// Take ownership of the per-cell outcomes
    pub fn into_cells(self) -> Vec<Result<CellOutput, CellFailure>> {
        self.cells
    }

    fn gather(&self, field: impl Fn(&CellOutput) -> &Vec<f64>) -> TimeCellArray {
        TimeCellArray::from_cells(
            self.n_months,
            self.cells
                .iter()
                .map(|c| c.as_ref().ok().map(|output| field(output).clone()))
                .collect(),
        )
    }
}

/// Runs the per-cell pipeline over a grid
#[derive(Debug, Clone)]
pub struct BatchRunner {
    config: PdsiConfig,
    threads: Option<usize>,
}

impl BatchRunner {
    /// Create a runner; the configuration is validated once here
    ///
    /// # Errors
    /// `PdsiError::InvalidConfig` if the configuration is inconsistent
    pub fn new(config: PdsiConfig) -> Result<Self, PdsiError> {
        config.validate()?;
        Ok(Self {
            config,
            threads: None,
        })
    }

    /// Run on a dedicated pool of `threads` workers instead of the global pool
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &PdsiConfig {
        &self.config
    }

    /// Process every cell of the grid
    pub fn run(&self, grid: &GridForcing, cancel: Option<&CancellationToken>) -> BatchResult {
        info!(
            "Running scPDSI batch: {} cells x {} months",
            grid.n_cells(),
            grid.n_months()
        );

        let work = || -> Vec<Result<CellOutput, CellFailure>> {
            (0..grid.n_cells())
                .into_par_iter()
                .map(|cell| self.run_cell(grid, cell, cancel))
                .collect()
        };

        let cells = match self.threads {
            Some(threads) => match ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(work),
                Err(e) => {
                    warn!("Failed to build {} worker pool, using global pool: {}", threads, e);
                    work()
                }
            },
            None => work(),
        };

        let result = BatchResult {
            n_months: grid.n_months(),
            cells,
        };
        let failed = result.n_cells() - result.succeeded();
        if failed > 0 {
            warn!(
                "{} of {} cells failed: {:?}",
                failed,
                result.n_cells(),
                result.failure_summary()
            );
        }
        info!("Batch complete: {} cells succeeded", result.succeeded());
        result
    }

    fn run_cell(
        &self,
        grid: &GridForcing,
        cell: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<CellOutput, CellFailure> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(CellFailure::Cancelled);
        }
        let forcing = grid.cell(cell)?;
        Ok(compute_validated(&forcing, &self.config))
    }
}
