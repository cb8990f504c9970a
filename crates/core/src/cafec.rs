//! CAFEC coefficients and moisture departure
//!
//! "Climatically appropriate for existing conditions" precipitation is the
//! amount a month would need given the cell's own climatology:
//!
//! ```text
//! P̂ = α·PE + β·PR + γ·PRO − δ·PL
//! ```
//!
//! where each coefficient is the ratio of actual to potential term summed over
//! every occurrence of the same calendar month. The departure `d = P − P̂` is
//! reported in inches, the unit the climatic characteristic K is defined on.

use crate::core_types::Millimeters;
use crate::water_balance::WaterBalanceMonth;
use serde::{Deserialize, Serialize};

/// Denominators below this are treated as zero
const MIN_DENOMINATOR: f64 = 1e-9;

fn ratio(numerator: f64, denominator: f64, default: f64) -> f64 {
    if denominator.abs() > MIN_DENOMINATOR {
        numerator / denominator
    } else {
        default
    }
}

/// Per-calendar-month CAFEC coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CafecCoefficients {
    /// Evapotranspiration coefficient ΣE / ΣPE
    pub alpha: [f64; 12],
    /// Recharge coefficient ΣR / ΣPR
    pub beta: [f64; 12],
    /// Runoff coefficient ΣRO / ΣPRO
    pub gamma: [f64; 12],
    /// Loss coefficient ΣL / ΣPL
    pub delta: [f64; 12],
}

#[derive(Debug, Clone, Copy, Default)]
struct MonthSums {
    evapotranspiration: f64,
    pet: f64,
    recharge: f64,
    potential_recharge: f64,
    runoff: f64,
    potential_runoff: f64,
    loss: f64,
    potential_loss: f64,
}

impl CafecCoefficients {
    /// Statistics pass over the full water-balance history
    ///
    /// A calendar month whose potential term never exceeds zero gets α = 1
    /// and β = γ = δ = 0.
    pub fn from_history(history: &[WaterBalanceMonth]) -> Self {
        let mut sums = [MonthSums::default(); 12];
        for (i, month) in history.iter().enumerate() {
            let s = &mut sums[i % 12];
            s.evapotranspiration += month.evapotranspiration;
            s.pet += month.pet;
            s.recharge += month.recharge;
            s.potential_recharge += month.potential_recharge;
            s.runoff += month.runoff;
            s.potential_runoff += month.potential_runoff;
            s.loss += month.loss;
            s.potential_loss += month.potential_loss;
        }

        Self {
            alpha: sums.map(|s| ratio(s.evapotranspiration, s.pet, 1.0)),
            beta: sums.map(|s| ratio(s.recharge, s.potential_recharge, 0.0)),
            gamma: sums.map(|s| ratio(s.runoff, s.potential_runoff, 0.0)),
            delta: sums.map(|s| ratio(s.loss, s.potential_loss, 0.0)),
        }
    }

    /// CAFEC precipitation P̂ for a month at series index `index` (mm)
    pub fn cafec_precip(&self, index: usize, month: &WaterBalanceMonth) -> f64 {
        let m = index % 12;
        self.alpha[m] * month.pet
            + self.beta[m] * month.potential_recharge
            + self.gamma[m] * month.potential_runoff
            - self.delta[m] * month.potential_loss
    }

    /// Moisture departures `d = P − P̂` in inches
    pub fn departures(&self, history: &[WaterBalanceMonth]) -> Vec<f64> {
        history
            .iter()
            .enumerate()
            .map(|(i, month)| {
                *Millimeters::new(month.precip - self.cafec_precip(i, month)).to_inches()
            })
            .collect()
    }
}
