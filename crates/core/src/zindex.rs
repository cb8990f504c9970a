//! Climatic characteristic K and the Palmer Z-index
//!
//! Two passes over the history: the statistics pass derives one K per
//! calendar month from the cell's own water balance and departures; the
//! anomaly pass weights each month's departure with it, `Z = K·d`.
//!
//! K is rescaled so that `Σ D̄·K = 17.67`, which makes Z comparable across
//! climates.

use crate::water_balance::WaterBalanceMonth;
use serde::{Deserialize, Serialize};

/// Sum of `D̄·K` over the year after normalisation
const ANNUAL_WEIGHTED_DEPARTURE: f64 = 17.67;

/// Floor on the mean absolute departure (inches)
const MIN_MEAN_DEPARTURE: f64 = 1e-3;

/// Floor on the supply term `P̄ + L̄` (mm)
const MIN_SUPPLY: f64 = 1e-3;

/// Floor on the unnormalised K'
const MIN_K: f64 = 0.01;

/// Per-calendar-month climatic characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimaticCoefficients {
    k: [f64; 12],
}

impl ClimaticCoefficients {
    /// Statistics pass
    ///
    /// # Arguments
    /// * `history` - Water balance for every month
    /// * `departures` - Moisture departures `d` in inches, same length
    pub fn from_history(history: &[WaterBalanceMonth], departures: &[f64]) -> Self {
        let mut k_prime = [0.0; 12];
        let mut mean_departure = [0.0; 12];

        for m in 0..12 {
            let (count, demand, supply, abs_departure) = history
                .iter()
                .zip(departures)
                .skip(m)
                .step_by(12)
                .fold(
                    (0usize, 0.0, 0.0, 0.0),
                    |(count, demand, supply, abs_departure), (month, d)| {
                        (
                            count + 1,
                            demand + month.pet + month.recharge + month.runoff,
                            supply + month.precip + month.loss,
                            abs_departure + d.abs(),
                        )
                    },
                );
            if count == 0 {
                k_prime[m] = MIN_K;
                mean_departure[m] = MIN_MEAN_DEPARTURE;
                continue;
            }
            let n = count as f64;
            let demand = demand / n;
            let supply = (supply / n).max(MIN_SUPPLY);
            let d_bar = (abs_departure / n).max(MIN_MEAN_DEPARTURE);

            k_prime[m] = (1.5 * ((demand / supply + 2.8) / d_bar).log10() + 0.5).max(MIN_K);
            mean_departure[m] = d_bar;
        }

        let weighted: f64 = k_prime
            .iter()
            .zip(&mean_departure)
            .map(|(k, d)| k * d)
            .sum();
        let k = if weighted > 1e-9 {
            k_prime.map(|kp| ANNUAL_WEIGHTED_DEPARTURE * kp / weighted)
        } else {
            k_prime
        };

        Self { k }
    }

    /// K per calendar month
    pub fn k(&self) -> &[f64; 12] {
        &self.k
    }

    /// Anomaly pass: `Z_i = K[i mod 12] · d_i`
    pub fn z_index(&self, departures: &[f64]) -> Vec<f64> {
        departures
            .iter()
            .enumerate()
            .map(|(i, d)| self.k[i % 12] * d)
            .collect()
    }
}
