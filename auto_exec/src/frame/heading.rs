//! Heading operations
//!
//! All headings are in degrees, 0° facing relative +Y and clockwise positive. Any heading leaving
//! one of these functions is back in `[0, 360)`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use util::maths::{wrap_positive, wrap_signed};

use super::{Frame, Point};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const FULL_TURN_DEG: f64 = 360.0;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Normalise a heading into `[0, 360)`.
pub fn normalize_heading(heading_deg: f64) -> f64 {
    wrap_positive(heading_deg, FULL_TURN_DEG)
}

/// Signed shortest rotation from `current_deg` to `target_deg`, in `(-180, 180]`.
///
/// A difference of exactly half a turn is reported as `+180`.
pub fn heading_error(target_deg: f64, current_deg: f64) -> f64 {
    wrap_signed(
        normalize_heading(target_deg) - normalize_heading(current_deg),
        FULL_TURN_DEG,
    )
}

/// Heading of the same direction after rotating the frame by 180°.
pub fn rotate_180_heading(heading_deg: f64) -> f64 {
    normalize_heading(heading_deg + 180.0)
}

/// Mirrored heading, `180 - h`.
pub fn mirror_heading(heading_deg: f64) -> f64 {
    normalize_heading(180.0 - heading_deg)
}

/// Heading which faces `to` when standing at `from`.
///
/// Returns 0 if the points coincide.
pub fn heading_to<F: Frame>(from: &Point<F>, to: &Point<F>) -> f64 {
    let d = to.vec() - from.vec();
    normalize_heading(d[0].atan2(d[1]).to_degrees())
}
