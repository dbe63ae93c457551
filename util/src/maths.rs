//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into the range `[min, max]`.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    if value > max {
        max
    }
    else if value < min {
        min
    }
    else {
        value
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it. Due to floating point
/// round-off the result may equal `rhs.abs()` when `lhs` is a tiny negative number, callers that
/// need a strict half-open range must fold that case themselves (see [`wrap_positive`]).
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap a value into `[0, period)`.
pub fn wrap_positive<T>(value: T, period: T) -> T
where
    T: Float
{
    let r = rem_euclid(value, period);
    if r >= period { T::zero() } else { r }
}

/// Wrap a value into `(-period/2, period/2]`.
///
/// The lower bound is open so that a difference of exactly half a period always comes out
/// positive.
pub fn wrap_signed<T>(value: T, period: T) -> T
where
    T: Float
{
    let half = period / (T::one() + T::one());
    let r = rem_euclid(value + half, period) - half;

    if r <= -half { r + period } else { r }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_positive() {
        assert_eq!(wrap_positive(370.0, 360.0), 10.0);
        assert_eq!(wrap_positive(-10.0, 360.0), 350.0);
        assert_eq!(wrap_positive(360.0, 360.0), 0.0);
        assert_eq!(wrap_positive(-1e-20f64, 360.0), 0.0);
    }

    #[test]
    fn test_wrap_signed() {
        assert_eq!(wrap_signed(340.0, 360.0), -20.0);
        assert_eq!(wrap_signed(-340.0, 360.0), 20.0);
        assert_eq!(wrap_signed(180.0, 360.0), 180.0);
        assert_eq!(wrap_signed(-180.0, 360.0), 180.0);
        assert_eq!(wrap_signed(0.0, 360.0), 0.0);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(0.5, 0.0, 1.0), 0.5);
    }
}
