//! Signed 24.8 fixed-point numbers.
//!
//! # Example
//!
//! ```
//! use westfield_core::codec::Fixed;
//!
//! let f = Fixed::from_f64(1.5);
//! assert_eq!(f.raw(), 384);
//! assert_eq!(f.to_f64(), 1.5);
//! assert_eq!(f.as_int(), 1);
//! ```

use std::fmt;

/// A real number stored as `value * 256`, truncated toward zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i32);

impl Fixed {
    /// Wrap a raw wire value.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    /// Convert a floating point value. Fractions below 1/256 are dropped.
    #[inline]
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * 256.0) as i32)
    }

    /// Convert an integer exactly.
    #[inline]
    pub const fn from_int(value: i32) -> Self {
        Fixed(value.wrapping_mul(256))
    }

    /// Raw wire value.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 256.0
    }

    /// Integer part, truncated toward zero.
    #[inline]
    pub const fn as_int(self) -> i32 {
        self.0 / 256
    }
}

impl From<f64> for Fixed {
    fn from(value: f64) -> Self {
        Fixed::from_f64(value)
    }
}

impl From<i32> for Fixed {
    fn from(value: i32) -> Self {
        Fixed::from_int(value)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_values_exact() {
        for v in [-8_388_608, -1000, -1, 0, 1, 42, 8_388_607] {
            let f = Fixed::from_int(v);
            assert_eq!(f.as_int(), v);
            assert_eq!(Fixed::from_f64(f64::from(v)), f);
        }
    }

    #[test]
    fn test_fraction_truncated_to_resolution() {
        // 1/512 is below the resolution and vanishes.
        assert_eq!(Fixed::from_f64(1.0 + 1.0 / 512.0).to_f64(), 1.0);
        assert_eq!(Fixed::from_f64(0.25).raw(), 64);
    }

    #[test]
    fn test_negative_truncates_toward_zero() {
        assert_eq!(Fixed::from_f64(-1.5).raw(), -384);
        assert_eq!(Fixed::from_f64(-1.5).as_int(), -1);
        assert_eq!(Fixed::from_f64(-0.001).raw(), 0);
    }
}
