//! Palmer two-layer soil water balance
//!
//! Implements the monthly bookkeeping of Palmer (1965):
//! - a surface layer (conventionally one inch) that recharges first and dries first
//! - an underlying layer holding the remainder of the available water capacity,
//!   which loses moisture at a rate proportional to its remaining fraction
//!
//! Alongside the actual fluxes each month yields the CAFEC potentials
//! (potential recharge, runoff and loss) computed from the storage at the start
//! of the month, without perturbing the running state.
//!
//! Forcing that carries its own E, R, RO and L keeps the store running for the
//! potentials but reports the supplied terms as the actual ones. Such months
//! balance only as well as the supplied terms do.
//!
//! # Scientific References
//! - Palmer, W.C. (1965). "Meteorological Drought". Research Paper 45,
//!   US Weather Bureau
//! - Alley, W.M. (1984). "The Palmer Drought Severity Index: Limitations and
//!   Assumptions". Journal of Climate and Applied Meteorology, 23, 1100-1109

use crate::config::SoilConfig;
use crate::core_types::Millimeters;
use crate::forcing::CellForcing;
use serde::{Deserialize, Serialize};

/// Water-balance terms for one month (all mm, all non-negative)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WaterBalanceMonth {
    /// Precipitation P
    pub precip: f64,
    /// Potential evapotranspiration PE
    pub pet: f64,
    /// Actual evapotranspiration E
    pub evapotranspiration: f64,
    /// Recharge R
    pub recharge: f64,
    /// Runoff RO
    pub runoff: f64,
    /// Loss L (moisture withdrawn from storage)
    pub loss: f64,
    /// Potential recharge PR
    pub potential_recharge: f64,
    /// Potential runoff PRO
    pub potential_runoff: f64,
    /// Potential loss PL
    pub potential_loss: f64,
    /// Surface storage at the start of the month
    pub surface_start: f64,
    /// Underlying storage at the start of the month
    pub underlying_start: f64,
    /// Surface storage at the end of the month
    pub surface_end: f64,
    /// Underlying storage at the end of the month
    pub underlying_end: f64,
}

impl WaterBalanceMonth {
    /// Change in total storage over the month
    pub fn storage_change(&self) -> f64 {
        (self.surface_end + self.underlying_end) - (self.surface_start + self.underlying_start)
    }

    /// Residual of `P + L = E + R + RO`; zero up to rounding
    pub fn mass_balance_residual(&self) -> f64 {
        (self.precip + self.loss) - (self.evapotranspiration + self.recharge + self.runoff)
    }
}

/// Two-layer soil moisture store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilMoisture {
    surface: f64,
    underlying: f64,
    surface_capacity: f64,
    underlying_capacity: f64,
    degenerate: bool,
}

impl SoilMoisture {
    /// Create a store for the given capacity, filled to `config.initial_fill`
    pub fn new(awc: Millimeters, config: &SoilConfig) -> Self {
        let degenerate = awc <= config.degenerate_awc;
        let (surface_capacity, underlying_capacity) = if degenerate {
            (0.0, 0.0)
        } else {
            let surface = *awc.min_depth(config.surface_capacity);
            (surface, *awc - surface)
        };

        Self {
            surface: surface_capacity * config.initial_fill,
            underlying: underlying_capacity * config.initial_fill,
            surface_capacity,
            underlying_capacity,
            degenerate,
        }
    }

    /// Current surface-layer storage (mm)
    pub fn surface(&self) -> f64 {
        self.surface
    }

    /// Current underlying-layer storage (mm)
    pub fn underlying(&self) -> f64 {
        self.underlying
    }

    /// Total storage (mm)
    pub fn total(&self) -> f64 {
        self.surface + self.underlying
    }

    /// Total capacity (mm)
    pub fn capacity(&self) -> f64 {
        self.surface_capacity + self.underlying_capacity
    }

    /// Layer capacities `(surface, underlying)`
    pub fn capacities(&self) -> (f64, f64) {
        (self.surface_capacity, self.underlying_capacity)
    }

    /// True when the cell has no usable storage
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Potential recharge, runoff and loss for the current state
    fn potentials(&self, pet: f64) -> (f64, f64, f64) {
        let awc = self.capacity();
        let storage = self.total();
        let surface_loss = pet.min(self.surface);
        let underlying_loss = (pet - surface_loss) * self.underlying / awc;
        let potential_loss = (surface_loss + underlying_loss).min(storage);
        (awc - storage, storage, potential_loss)
    }

    /// Advance one month
    pub fn step(&mut self, precip: f64, pet: f64) -> WaterBalanceMonth {
        let surface_start = self.surface;
        let underlying_start = self.underlying;

        if self.degenerate {
            let evapotranspiration = precip.min(pet);
            return WaterBalanceMonth {
                precip,
                pet,
                evapotranspiration,
                runoff: precip - evapotranspiration,
                ..WaterBalanceMonth::default()
            };
        }

        let (potential_recharge, potential_runoff, potential_loss) = self.potentials(pet);
        let mut month = WaterBalanceMonth {
            precip,
            pet,
            potential_recharge,
            potential_runoff,
            potential_loss,
            surface_start,
            underlying_start,
            ..WaterBalanceMonth::default()
        };

        if precip >= pet {
            // Surplus fills the surface layer, then the underlying layer
            let excess = precip - pet;
            let surface_recharge = excess.min(self.surface_capacity - self.surface);
            let underlying_recharge =
                (excess - surface_recharge).min(self.underlying_capacity - self.underlying);

            self.surface += surface_recharge;
            self.underlying += underlying_recharge;

            month.evapotranspiration = pet;
            month.recharge = surface_recharge + underlying_recharge;
            month.runoff = excess - month.recharge;
        } else {
            // Deficit dries the surface layer, then the underlying layer
            let deficit = pet - precip;
            let surface_loss = self.surface.min(deficit);
            let underlying_loss = self
                .underlying
                .min((deficit - surface_loss) * self.underlying / self.capacity());

            self.surface -= surface_loss;
            self.underlying -= underlying_loss;

            month.loss = surface_loss + underlying_loss;
            month.evapotranspiration = precip + month.loss;
        }

        month.surface_end = self.surface;
        month.underlying_end = self.underlying;
        month
    }
}

/// Run the water balance over a cell's whole record
pub fn run_water_balance(forcing: &CellForcing, config: &SoilConfig) -> Vec<WaterBalanceMonth> {
    let mut soil = SoilMoisture::new(forcing.awc(), config);
    let components = forcing.components();
    forcing
        .months()
        .enumerate()
        .map(|(i, (precip, pet))| {
            let mut month = soil.step(precip, pet);
            if let Some(components) = components {
                (month.evapotranspiration, month.recharge, month.runoff, month.loss) =
                    components.month(i);
            }
            month
        })
        .collect()
}
