//! Reproducible synthetic forcing
//!
//! Generates gridded monthly forcing for demos and tests:
//! - precipitation ~ Gamma(`precip_shape`, `precip_scale`), shape 2 by default
//! - PET as a seasonal sinusoid plus uniform noise, floored at zero
//! - AWC drawn uniformly per cell
//!
//! An optional [`DroughtEvent`] overrides precipitation over a window for every
//! cell. The same seed always gives the same grid.

use crate::error::PdsiError;
use crate::forcing::GridForcing;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Fixed-precipitation window applied to every cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DroughtEvent {
    /// First month of the event
    pub start: usize,
    /// Length in months
    pub months: usize,
    /// Precipitation during the event (mm/month)
    pub precip: f64,
}

impl DroughtEvent {
    /// Whether `month` falls inside the event
    pub fn contains(&self, month: usize) -> bool {
        (self.start..self.start.saturating_add(self.months)).contains(&month)
    }
}

/// Synthetic grid generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticForcing {
    /// Months per cell
    pub n_months: usize,
    /// Number of cells
    pub n_cells: usize,
    /// RNG seed
    pub seed: u64,
    /// Gamma shape of monthly precipitation
    pub precip_shape: f64,
    /// Gamma scale of monthly precipitation (mm); the mean is shape × scale
    pub precip_scale: f64,
    /// Annual mean PET (mm/month)
    pub pet_mean: f64,
    /// Seasonal PET amplitude (mm/month)
    pub pet_amplitude: f64,
    /// Half-width of the uniform PET noise (mm/month)
    pub pet_noise: f64,
    /// AWC range `(min, max)` in mm
    pub awc_range: (f64, f64),
    /// Optional imposed drought
    pub drought: Option<DroughtEvent>,
}

impl Default for SyntheticForcing {
    fn default() -> Self {
        Self {
            n_months: 360,
            n_cells: 16,
            seed: 42,
            precip_shape: 2.0,
            precip_scale: 40.0,
            pet_mean: 70.0,
            pet_amplitude: 40.0,
            pet_noise: 10.0,
            awc_range: (100.0, 200.0),
            drought: None,
        }
    }
}

impl SyntheticForcing {
    /// Impose a drought window on every cell
    pub fn with_drought(mut self, drought: DroughtEvent) -> Self {
        self.drought = Some(drought);
        self
    }

    fn validate(&self) -> Result<(), PdsiError> {
        if self.n_months == 0 {
            return Err(PdsiError::EmptyHistory);
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !(non_negative(self.pet_mean)
            && non_negative(self.pet_amplitude)
            && non_negative(self.pet_noise))
        {
            return Err(PdsiError::invalid_config(
                "synthetic PET parameters must be finite and non-negative",
            ));
        }
        let (low, high) = self.awc_range;
        if !(non_negative(low) && high.is_finite() && low <= high) {
            return Err(PdsiError::invalid_config(format!(
                "synthetic awc_range must be ordered and non-negative, got ({low}, {high})"
            )));
        }
        if let Some(drought) = self.drought {
            if !non_negative(drought.precip) {
                return Err(PdsiError::invalid_config(
                    "drought precipitation must be finite and non-negative",
                ));
            }
        }
        Ok(())
    }

    /// Generate the grid
    ///
    /// # Errors
    /// `PdsiError::EmptyHistory` for zero months, `PdsiError::InvalidConfig`
    /// for negative or non-finite parameters or a non-positive gamma shape
    /// or scale
    pub fn generate(&self) -> Result<GridForcing, PdsiError> {
        self.validate()?;
        let rainfall = Gamma::new(self.precip_shape, self.precip_scale).map_err(|e| {
            PdsiError::invalid_config(format!(
                "precipitation gamma (shape {}, scale {}): {}",
                self.precip_shape, self.precip_scale, e
            ))
        })?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let (awc_low, awc_high) = self.awc_range;

        let columns = (0..self.n_cells)
            .map(|_| {
                let awc = if awc_high > awc_low {
                    rng.random_range(awc_low..awc_high)
                } else {
                    awc_low
                };
                let mut precip = Vec::with_capacity(self.n_months);
                let mut pet = Vec::with_capacity(self.n_months);
                for month in 0..self.n_months {
                    let rain = rainfall.sample(&mut rng);
                    precip.push(match self.drought {
                        Some(event) if event.contains(month) => event.precip,
                        _ => rain,
                    });
                    pet.push(self.seasonal_pet(&mut rng, month));
                }
                (precip, pet, awc)
            })
            .collect();

        GridForcing::from_columns(columns)
    }

    fn seasonal_pet(&self, rng: &mut StdRng, month: usize) -> f64 {
        let phase = 2.0 * PI * (month % 12) as f64 / 12.0;
        let noise = if self.pet_noise > 0.0 {
            rng.random_range(-self.pet_noise..self.pet_noise)
        } else {
            0.0
        };
        (self.pet_mean + self.pet_amplitude * phase.sin() + noise).max(0.0)
    }
}
