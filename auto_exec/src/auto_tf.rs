//! # Auto transform composer
//!
//! Routines are tuned once, for the canonical red alliance right-hand start. The other three
//! starts are produced mechanically from that tuning:
//!
//! | Alliance | Side  | Transform                            |
//! |----------|-------|--------------------------------------|
//! | Red      | Right | identity                             |
//! | Red      | Left  | mirror across forward axis           |
//! | Blue     | Right | rotate 180                           |
//! | Blue     | Left  | rotate 180, then mirror across fwd   |
//!
//! The alliance rotation is always applied before the side mirror.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::frame::{
    mirror_across_forward_axis, mirror_heading, normalize_heading, rotate_180, rotate_180_heading,
    FieldOrigin, Frame, Point,
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which side of the field the robot starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// The alliance colour for the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alliance {
    Red,
    Blue,
}

/// Errors parsing a side or alliance from a string.
#[derive(Debug, thiserror::Error)]
pub enum ParseStartError {
    #[error("Unknown side \"{0}\", expected \"left\" or \"right\"")]
    UnknownSide(String),

    #[error("Unknown alliance \"{0}\", expected \"red\" or \"blue\"")]
    UnknownAlliance(String),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The composed transform for one (side, alliance) pair.
///
/// This maps canonical tuning onto the requested start. Values already transformed for a start
/// must not be passed through it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoTransform {
    pub side: Side,
    pub alliance: Alliance,
}

/// The two physical start squares' field origins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartOrigins {
    pub red_left: FieldOrigin,
    pub red_right: FieldOrigin,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AutoTransform {
    pub fn new(side: Side, alliance: Alliance) -> Self {
        Self { side, alliance }
    }

    /// Transform a canonical point into the requested start.
    pub fn point<F: Frame>(&self, p: Point<F>) -> Point<F> {
        transform_point(p, self.side, self.alliance)
    }

    /// Transform a canonical heading into the requested start.
    pub fn heading(&self, heading_deg: f64) -> f64 {
        transform_heading(heading_deg, self.side, self.alliance)
    }

    /// Apply only the alliance rotation to a point.
    pub fn alliance_point<F: Frame>(&self, p: Point<F>) -> Point<F> {
        transform_alliance_only(p, self.alliance)
    }

    /// Apply only the alliance rotation to a heading.
    pub fn alliance_heading(&self, heading_deg: f64) -> f64 {
        transform_alliance_only_heading(heading_deg, self.alliance)
    }

    /// True if this start physically uses the red-left start square.
    ///
    /// Blue right is red left rotated about the field centre, so the two share a square shape and
    /// origin.
    pub fn is_red_left_geometry(&self) -> bool {
        matches!(
            (self.alliance, self.side),
            (Alliance::Red, Side::Left) | (Alliance::Blue, Side::Right)
        )
    }
}

impl fmt::Display for AutoTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.alliance, self.side)
    }
}

impl StartOrigins {
    /// Build from the canonical red-left origin. The red-right origin is its mirror across the
    /// field X axis.
    pub fn from_red_left(red_left: FieldOrigin) -> Self {
        Self {
            red_left,
            red_right: red_left.mirrored(),
        }
    }

    /// Select the field origin the run with this side and alliance starts from.
    pub fn select(&self, side: Side, alliance: Alliance) -> FieldOrigin {
        if AutoTransform::new(side, alliance).is_red_left_geometry() {
            self.red_left
        } else {
            self.red_right
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

impl FromStr for Side {
    type Err = ParseStartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" | "l" => Ok(Side::Left),
            "right" | "r" => Ok(Side::Right),
            _ => Err(ParseStartError::UnknownSide(s.into())),
        }
    }
}

impl fmt::Display for Alliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alliance::Red => write!(f, "red"),
            Alliance::Blue => write!(f, "blue"),
        }
    }
}

impl FromStr for Alliance {
    type Err = ParseStartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" => Ok(Alliance::Red),
            "blue" => Ok(Alliance::Blue),
            _ => Err(ParseStartError::UnknownAlliance(s.into())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Rotate for a blue alliance, then mirror for a left start.
pub fn transform_point<F: Frame>(p: Point<F>, side: Side, alliance: Alliance) -> Point<F> {
    let mut out = transform_alliance_only(p, alliance);

    if side == Side::Left {
        out = mirror_across_forward_axis(out);
    }

    out
}

/// Rotate for a blue alliance, then mirror for a left start. The result is normalised.
pub fn transform_heading(heading_deg: f64, side: Side, alliance: Alliance) -> f64 {
    let mut out = transform_alliance_only_heading(heading_deg, alliance);

    if side == Side::Left {
        out = mirror_heading(out);
    }

    normalize_heading(out)
}

/// Identity unless the alliance is blue, in which case the point is rotated 180°.
pub fn transform_alliance_only<F: Frame>(p: Point<F>, alliance: Alliance) -> Point<F> {
    match alliance {
        Alliance::Red => p,
        Alliance::Blue => rotate_180(p),
    }
}

/// Identity (normalised) unless the alliance is blue, in which case the heading is rotated 180°.
pub fn transform_alliance_only_heading(heading_deg: f64, alliance: Alliance) -> f64 {
    match alliance {
        Alliance::Red => normalize_heading(heading_deg),
        Alliance::Blue => rotate_180_heading(heading_deg),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
