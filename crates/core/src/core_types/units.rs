//! Semantic unit types for water-balance depths
//!
//! Forcing arrives in millimetres per month, while Palmer's climatic
//! characteristic is defined on departures measured in inches. The newtypes
//! keep the two from being mixed silently.
//!
//! # Usage
//! ```
//! use scpdsi_core::core_types::units::{Inches, Millimeters};
//!
//! let awc = Millimeters::new(254.0);
//! let inches: Inches = awc.into();
//! assert!((*inches - 10.0).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Deref, Mul, Sub};

/// Millimetres in one inch
pub const MM_PER_INCH: f64 = 25.4;

/// Compare f64 values with total ordering (NaN sorts above all values)
#[inline]
fn f64_total_cmp(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

// ============================================================================
// MILLIMETRES
// ============================================================================

/// Water depth in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Millimeters(f64);

impl Eq for Millimeters {}

impl PartialOrd for Millimeters {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Millimeters {
    fn cmp(&self, other: &Self) -> Ordering {
        f64_total_cmp(self.0, other.0)
    }
}

impl Deref for Millimeters {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl Millimeters {
    /// Zero depth
    pub const ZERO: Millimeters = Millimeters(0.0);

    /// One inch of water, the conventional surface-layer capacity
    pub const ONE_INCH: Millimeters = Millimeters(MM_PER_INCH);

    /// Create a new depth. Values are not validated here; forcing
    /// validation rejects negative or non-finite depths with an error.
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Millimeters(value)
    }

    /// Get the raw f64 value
    #[inline]
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Convert to inches
    #[inline]
    #[must_use]
    pub fn to_inches(self) -> Inches {
        Inches(self.0 / MM_PER_INCH)
    }

    /// Smaller of two depths
    #[inline]
    #[must_use]
    pub fn min_depth(self, other: Millimeters) -> Millimeters {
        Millimeters(self.0.min(other.0))
    }
}

impl From<f64> for Millimeters {
    fn from(v: f64) -> Self {
        Millimeters(v)
    }
}

impl From<Millimeters> for f64 {
    fn from(m: Millimeters) -> f64 {
        m.0
    }
}

impl From<Millimeters> for Inches {
    fn from(m: Millimeters) -> Inches {
        m.to_inches()
    }
}

impl Add for Millimeters {
    type Output = Millimeters;
    fn add(self, rhs: Millimeters) -> Millimeters {
        Millimeters(self.0 + rhs.0)
    }
}

impl Sub for Millimeters {
    type Output = Millimeters;
    fn sub(self, rhs: Millimeters) -> Millimeters {
        Millimeters(self.0 - rhs.0)
    }
}

impl Mul<f64> for Millimeters {
    type Output = Millimeters;
    fn mul(self, rhs: f64) -> Millimeters {
        Millimeters(self.0 * rhs)
    }
}

impl fmt::Display for Millimeters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} mm", self.0)
    }
}

// ============================================================================
// INCHES
// ============================================================================

/// Water depth in inches
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Inches(f64);

impl Deref for Inches {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl Inches {
    /// Create a new depth in inches
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Inches(value)
    }

    /// Convert to millimetres
    #[inline]
    #[must_use]
    pub fn to_millimeters(self) -> Millimeters {
        Millimeters(self.0 * MM_PER_INCH)
    }
}

impl fmt::Display for Inches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} in", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millimeter_inch_conversion() {
        let mm = Millimeters::new(50.8);
        assert!((*mm.to_inches() - 2.0).abs() < 1e-12);
        assert!((*Inches::new(2.0).to_millimeters() - 50.8).abs() < 1e-12);
    }

    #[test]
    fn test_millimeter_ordering_and_arithmetic() {
        let a = Millimeters::new(10.0);
        let b = Millimeters::new(30.0);
        assert_eq!(a.min_depth(b), a);
        assert_eq!(a.max(b), b);
        assert_eq!(b - a, Millimeters::new(20.0));
        assert_eq!(a + a, Millimeters::new(20.0));
        assert_eq!(a * 0.5, Millimeters::new(5.0));
        assert_eq!(format!("{}", Millimeters::ONE_INCH), "25.4 mm");
    }
}
