//! Validated monthly forcing for single cells and whole grids
//!
//! A `CellForcing` is the unit of work for the pipeline: monthly precipitation
//! and potential evapotranspiration plus the cell's available water capacity.
//! `GridForcing` stores many cells in time-major layout and only checks shapes;
//! value validation happens per cell so one bad cell cannot fail a batch.
//!
//! Either may also carry externally computed water-balance terms (E, R, RO, L),
//! e.g. from a land-surface model. When present they replace the actual terms
//! of the built-in soil store; the potentials still come from the store.

use crate::core_types::Millimeters;
use crate::error::{ForcingField, PdsiError};
use serde::Serialize;

fn check_series(values: &[f64], field: ForcingField) -> Result<(), PdsiError> {
    match values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        Some((month, &value)) => Err(PdsiError::InvalidForcing {
            field,
            month: Some(month),
            value,
        }),
        None => Ok(()),
    }
}

fn check_length(what: &'static str, values: &[f64], expected: usize) -> Result<(), PdsiError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(PdsiError::ShapeMismatch {
            what,
            expected,
            actual: values.len(),
        })
    }
}

/// Externally supplied actual water-balance terms (mm per month)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydrologicComponents {
    evapotranspiration: Vec<f64>,
    recharge: Vec<f64>,
    runoff: Vec<f64>,
    loss: Vec<f64>,
}

impl HydrologicComponents {
    fn check_lengths(&self, expected: usize) -> Result<(), PdsiError> {
        check_length("evapotranspiration", &self.evapotranspiration, expected)?;
        check_length("recharge", &self.recharge, expected)?;
        check_length("runoff", &self.runoff, expected)?;
        check_length("loss", &self.loss, expected)
    }

    fn check_values(&self) -> Result<(), PdsiError> {
        check_series(&self.evapotranspiration, ForcingField::Evapotranspiration)?;
        check_series(&self.recharge, ForcingField::Recharge)?;
        check_series(&self.runoff, ForcingField::Runoff)?;
        check_series(&self.loss, ForcingField::Loss)
    }

    /// Actual evapotranspiration E
    pub fn evapotranspiration(&self) -> &[f64] {
        &self.evapotranspiration
    }

    /// Recharge R
    pub fn recharge(&self) -> &[f64] {
        &self.recharge
    }

    /// Runoff RO
    pub fn runoff(&self) -> &[f64] {
        &self.runoff
    }

    /// Loss L
    pub fn loss(&self) -> &[f64] {
        &self.loss
    }

    /// `(E, R, RO, L)` for one month
    pub fn month(&self, month: usize) -> (f64, f64, f64, f64) {
        (
            self.evapotranspiration[month],
            self.recharge[month],
            self.runoff[month],
            self.loss[month],
        )
    }
}

/// Monthly forcing for one grid cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellForcing {
    precip: Vec<f64>,
    pet: Vec<f64>,
    awc: Millimeters,
    components: Option<HydrologicComponents>,
}

impl CellForcing {
    /// Create forcing with validation
    ///
    /// # Errors
    /// - `EmptyHistory` if there are no months
    /// - `ShapeMismatch` if `pet` and `precip` lengths differ
    /// - `InvalidForcing` for any negative or non-finite value
    pub fn new(precip: Vec<f64>, pet: Vec<f64>, awc: f64) -> Result<Self, PdsiError> {
        if precip.is_empty() {
            return Err(PdsiError::EmptyHistory);
        }
        if precip.len() != pet.len() {
            return Err(PdsiError::ShapeMismatch {
                what: "pet",
                expected: precip.len(),
                actual: pet.len(),
            });
        }
        if !awc.is_finite() || awc < 0.0 {
            return Err(PdsiError::InvalidForcing {
                field: ForcingField::AvailableWaterCapacity,
                month: None,
                value: awc,
            });
        }
        check_series(&precip, ForcingField::Precipitation)?;
        check_series(&pet, ForcingField::PotentialEvapotranspiration)?;

        Ok(Self {
            precip,
            pet,
            awc: Millimeters::new(awc),
            components: None,
        })
    }

    /// Attach externally computed actual E, R, RO and L
    ///
    /// # Errors
    /// - `ShapeMismatch` if any series differs in length from `precip`
    /// - `InvalidForcing` for any negative or non-finite value
    pub fn with_components(
        mut self,
        evapotranspiration: Vec<f64>,
        recharge: Vec<f64>,
        runoff: Vec<f64>,
        loss: Vec<f64>,
    ) -> Result<Self, PdsiError> {
        let components = HydrologicComponents {
            evapotranspiration,
            recharge,
            runoff,
            loss,
        };
        components.check_lengths(self.len())?;
        components.check_values()?;
        self.components = Some(components);
        Ok(self)
    }

    /// Number of months
    pub fn len(&self) -> usize {
        self.precip.len()
    }

    /// Always false for a validated forcing
    pub fn is_empty(&self) -> bool {
        self.precip.is_empty()
    }

    /// Monthly precipitation (mm)
    pub fn precip(&self) -> &[f64] {
        &self.precip
    }

    /// Monthly potential evapotranspiration (mm)
    pub fn pet(&self) -> &[f64] {
        &self.pet
    }

    /// Available water capacity
    pub fn awc(&self) -> Millimeters {
        self.awc
    }

    /// Supplied water-balance terms, if any
    pub fn components(&self) -> Option<&HydrologicComponents> {
        self.components.as_ref()
    }

    /// Iterate `(precip, pet)` pairs in month order
    pub fn months(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.precip.iter().copied().zip(self.pet.iter().copied())
    }
}

/// Forcing for a grid of cells, stored time-major (`[month * n_cells + cell]`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridForcing {
    n_months: usize,
    n_cells: usize,
    precip: Vec<f64>,
    pet: Vec<f64>,
    awc: Vec<f64>,
    components: Option<HydrologicComponents>,
}

impl GridForcing {
    /// Create a grid from time-major arrays
    ///
    /// Only shapes are checked here.
    ///
    /// # Errors
    /// `EmptyHistory` for zero months, `ShapeMismatch` for wrong lengths
    pub fn new(
        n_months: usize,
        n_cells: usize,
        precip: Vec<f64>,
        pet: Vec<f64>,
        awc: Vec<f64>,
    ) -> Result<Self, PdsiError> {
        if n_months == 0 {
            return Err(PdsiError::EmptyHistory);
        }
        let expected = n_months * n_cells;
        if precip.len() != expected {
            return Err(PdsiError::ShapeMismatch {
                what: "precip",
                expected,
                actual: precip.len(),
            });
        }
        if pet.len() != expected {
            return Err(PdsiError::ShapeMismatch {
                what: "pet",
                expected,
                actual: pet.len(),
            });
        }
        if awc.len() != n_cells {
            return Err(PdsiError::ShapeMismatch {
                what: "awc",
                expected: n_cells,
                actual: awc.len(),
            });
        }
        Ok(Self {
            n_months,
            n_cells,
            precip,
            pet,
            awc,
            components: None,
        })
    }

    /// Attach time-major E, R, RO and L arrays for every cell
    ///
    /// Only shapes are checked here, values are checked per cell.
    ///
    /// # Errors
    /// `ShapeMismatch` if any array is not `n_months * n_cells` long
    pub fn with_components(
        mut self,
        evapotranspiration: Vec<f64>,
        recharge: Vec<f64>,
        runoff: Vec<f64>,
        loss: Vec<f64>,
    ) -> Result<Self, PdsiError> {
        let components = HydrologicComponents {
            evapotranspiration,
            recharge,
            runoff,
            loss,
        };
        components.check_lengths(self.n_months * self.n_cells)?;
        self.components = Some(components);
        Ok(self)
    }

    /// Build a grid from per-cell `(precip, pet, awc)` columns
    ///
    /// # Errors
    /// `EmptyHistory` or `ShapeMismatch` if the columns disagree in length
    pub fn from_columns(columns: Vec<(Vec<f64>, Vec<f64>, f64)>) -> Result<Self, PdsiError> {
        let n_cells = columns.len();
        let n_months = columns.first().map_or(0, |(p, _, _)| p.len());
        let mut precip = vec![0.0; n_months * n_cells];
        let mut pet = vec![0.0; n_months * n_cells];
        let mut awc = Vec::with_capacity(n_cells);

        for (cell, (p, e, capacity)) in columns.into_iter().enumerate() {
            if p.len() != n_months {
                return Err(PdsiError::ShapeMismatch {
                    what: "precip",
                    expected: n_months,
                    actual: p.len(),
                });
            }
            if e.len() != n_months {
                return Err(PdsiError::ShapeMismatch {
                    what: "pet",
                    expected: n_months,
                    actual: e.len(),
                });
            }
            for month in 0..n_months {
                precip[month * n_cells + cell] = p[month];
                pet[month * n_cells + cell] = e[month];
            }
            awc.push(capacity);
        }

        Self::new(n_months, n_cells, precip, pet, awc)
    }

    /// Number of months
    pub fn n_months(&self) -> usize {
        self.n_months
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Extract and validate one cell's forcing
    ///
    /// # Errors
    /// `InvalidForcing` if the cell carries negative or non-finite values,
    /// `ShapeMismatch` if `cell` is out of range
    pub fn cell(&self, cell: usize) -> Result<CellForcing, PdsiError> {
        if cell >= self.n_cells {
            return Err(PdsiError::ShapeMismatch {
                what: "cell index",
                expected: self.n_cells,
                actual: cell,
            });
        }
        let column = |data: &[f64]| -> Vec<f64> {
            (0..self.n_months)
                .map(|month| data[month * self.n_cells + cell])
                .collect()
        };
        let forcing = CellForcing::new(column(&self.precip), column(&self.pet), self.awc[cell])?;
        match &self.components {
            Some(c) => forcing.with_components(
                column(&c.evapotranspiration),
                column(&c.recharge),
                column(&c.runoff),
                column(&c.loss),
            ),
            None => Ok(forcing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_forcing_validation() {
        assert!(CellForcing::new(vec![10.0, 20.0], vec![30.0, 40.0], 150.0).is_ok());
        assert_eq!(
            CellForcing::new(vec![], vec![], 150.0),
            Err(PdsiError::EmptyHistory)
        );
        assert!(matches!(
            CellForcing::new(vec![10.0], vec![30.0, 40.0], 150.0),
            Err(PdsiError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_negative_and_non_finite_rejected() {
        let err = CellForcing::new(vec![10.0, -1.0], vec![30.0, 40.0], 150.0).unwrap_err();
        assert_eq!(
            err,
            PdsiError::InvalidForcing {
                field: ForcingField::Precipitation,
                month: Some(1),
                value: -1.0
            }
        );

        let err = CellForcing::new(vec![10.0, 1.0], vec![f64::INFINITY, 40.0], 150.0).unwrap_err();
        assert!(matches!(
            err,
            PdsiError::InvalidForcing {
                field: ForcingField::PotentialEvapotranspiration,
                month: Some(0),
                ..
            }
        ));

        let err = CellForcing::new(vec![10.0], vec![30.0], f64::NAN).unwrap_err();
        assert!(matches!(
            err,
            PdsiError::InvalidForcing {
                field: ForcingField::AvailableWaterCapacity,
                month: None,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_awc_accepted() {
        let forcing = CellForcing::new(vec![10.0], vec![30.0], 0.0).unwrap();
        assert_eq!(forcing.awc(), Millimeters::ZERO);
    }

    #[test]
    fn test_grid_time_major_layout() {
        let grid = GridForcing::from_columns(vec![
            (vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], 100.0),
            (vec![7.0, 8.0, 9.0], vec![1.0, 1.0, 1.0], 200.0),
        ])
        .unwrap();

        assert_eq!(grid.n_months(), 3);
        assert_eq!(grid.n_cells(), 2);

        let cell = grid.cell(1).unwrap();
        assert_eq!(cell.precip(), &[7.0, 8.0, 9.0]);
        assert_eq!(cell.awc(), Millimeters::new(200.0));
        assert!(grid.cell(2).is_err());
    }

    #[test]
    fn test_grid_defers_value_validation_to_cells() {
        let grid = GridForcing::from_columns(vec![
            (vec![1.0, f64::NAN], vec![4.0, 5.0], 100.0),
            (vec![7.0, 8.0], vec![1.0, 1.0], 200.0),
        ])
        .unwrap();

        assert!(grid.cell(0).is_err());
        assert!(grid.cell(1).is_ok());
    }

    #[test]
    fn test_components_validated_like_forcing() {
        let forcing = || CellForcing::new(vec![50.0, 10.0], vec![40.0, 40.0], 150.0).unwrap();

        let ok = forcing()
            .with_components(vec![40.0, 30.0], vec![10.0, 0.0], vec![0.0, 0.0], vec![0.0, 20.0])
            .unwrap();
        let components = ok.components().unwrap();
        assert_eq!(components.month(1), (30.0, 0.0, 0.0, 20.0));
        assert!(forcing().components().is_none());

        assert!(matches!(
            forcing().with_components(vec![40.0], vec![0.0; 2], vec![0.0; 2], vec![0.0; 2]),
            Err(PdsiError::ShapeMismatch {
                what: "evapotranspiration",
                expected: 2,
                actual: 1
            })
        ));
        assert_eq!(
            forcing()
                .with_components(vec![0.0; 2], vec![0.0; 2], vec![0.0, -3.0], vec![0.0; 2])
                .unwrap_err(),
            PdsiError::InvalidForcing {
                field: ForcingField::Runoff,
                month: Some(1),
                value: -3.0
            }
        );
        assert!(matches!(
            forcing().with_components(vec![0.0; 2], vec![0.0; 2], vec![0.0; 2], vec![f64::NAN, 0.0]),
            Err(PdsiError::InvalidForcing {
                field: ForcingField::Loss,
                month: Some(0),
                ..
            })
        ));
    }

    #[test]
    fn test_grid_components_follow_cells() {
        // Two months, two cells, time-major
        let grid = GridForcing::new(2, 2, vec![10.0; 4], vec![20.0; 4], vec![100.0; 2])
            .unwrap()
            .with_components(
                vec![1.0, 2.0, 3.0, 4.0],
                vec![0.0; 4],
                vec![0.0; 4],
                vec![0.0, -1.0, 0.0, 0.0],
            )
            .unwrap();

        assert!(matches!(
            grid.cell(1),
            Err(PdsiError::InvalidForcing {
                field: ForcingField::Loss,
                month: Some(0),
                ..
            })
        ));
        let cell = grid.cell(0).unwrap();
        assert_eq!(cell.components().unwrap().evapotranspiration(), &[1.0, 3.0]);

        let short = GridForcing::new(2, 2, vec![10.0; 4], vec![20.0; 4], vec![100.0; 2])
            .unwrap()
            .with_components(vec![0.0; 4], vec![0.0; 3], vec![0.0; 4], vec![0.0; 4]);
        assert!(matches!(
            short,
            Err(PdsiError::ShapeMismatch { what: "recharge", .. })
        ));
    }

    #[test]
    fn test_grid_shape_mismatch() {
        let result = GridForcing::new(2, 2, vec![0.0; 4], vec![0.0; 3], vec![100.0; 2]);
        assert!(matches!(
            result,
            Err(PdsiError::ShapeMismatch { what: "pet", .. })
        ));
    }
}
