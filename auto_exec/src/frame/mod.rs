//! # Frame transform module
//!
//! Two frames are in use during an autonomous run:
//!
//! - The **field** frame: absolute field inches as read off the field diagrams and measurement
//!   tool. Tuned waypoints are authored here.
//! - The **relative** frame: the odometry frame of the motion controller, with its origin at the
//!   robot's starting pose point. +Y is into the field from the start, +X is robot-right at the
//!   start, and a heading of 0° faces +Y (clockwise positive).
//!
//! The mapping between the two is an axis swap plus negation, not a translation, so the axes of
//! the two frames are never parallel:
//!
//! ```text
//! relative.x = origin.y - field.y
//! relative.y = field.x  - origin.x
//! ```
//!
//! Points carry their frame as a type parameter so a field point can't be commanded by mistake.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod heading;

pub use heading::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, marker::PhantomData};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, AutoError};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Marker for a coordinate frame.
pub trait Frame: fmt::Debug + Clone + Copy + PartialEq + Default {
    /// Short name used when printing points.
    const NAME: &'static str;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Absolute field frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Field;

/// Start-relative odometry frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Relative;

/// A 2D point in inches, in the frame `F`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Point<F: Frame> {
    pub x: f64,
    pub y: f64,

    #[serde(skip)]
    frame: PhantomData<F>,
}

/// A point in the absolute field frame.
pub type FieldPoint = Point<Field>;

/// A point in the start-relative frame, which is the frame the motion controller works in.
pub type RelativePoint = Point<Relative>;

/// Where the relative frame's origin sits in field coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldOrigin {
    pub start_x: f64,
    pub start_y: f64,
}

/// The field origin active for one autonomous run.
///
/// Every conversion between the field and relative frames goes through one of these. It is held by
/// the run's [`AutoCtx`](crate::AutoCtx) rather than being global, so only the run that owns it can
/// re-anchor it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateContext {
    origin: FieldOrigin,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Frame for Field {
    const NAME: &'static str = "field";
}

impl Frame for Relative {
    const NAME: &'static str = "rel";
}

impl<F: Frame> Point<F> {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            frame: PhantomData,
        }
    }

    pub fn from_vec(v: Vector2<f64>) -> Self {
        Self::new(v[0], v[1])
    }

    pub fn vec(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Euclidean distance to another point in the same frame.
    pub fn distance_to(&self, other: &Self) -> f64 {
        (other.vec() - self.vec()).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl<F: Frame> Default for Point<F> {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl<F: Frame> fmt::Display for Point<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:.2}, {:.2})", F::NAME, self.x, self.y)
    }
}

impl FieldOrigin {
    pub fn new(start_x: f64, start_y: f64) -> Self {
        Self { start_x, start_y }
    }

    /// The origin of the start square mirrored across the field X axis.
    ///
    /// The right-hand starts sit at the same field X as the left-hand ones with Y negated.
    pub fn mirrored(&self) -> Self {
        Self::new(self.start_x, -self.start_y)
    }
}

impl CoordinateContext {
    /// Create a new context, rejecting a non-finite origin.
    pub fn new(origin: FieldOrigin) -> Result<Self, AutoError> {
        ensure_finite("field origin", &[origin.start_x, origin.start_y])?;
        Ok(Self { origin })
    }

    /// Build the context in which the field point `field` is seen at `relative` by odometry.
    ///
    /// Used to re-anchor after physically seating the robot against a known field feature.
    pub fn anchored_at(field: FieldPoint, relative: RelativePoint) -> Result<Self, AutoError> {
        Self::new(FieldOrigin::new(field.x - relative.y, field.y + relative.x))
    }

    pub fn origin(&self) -> FieldOrigin {
        self.origin
    }

    /// Convert a field point into the relative frame.
    pub fn to_relative(&self, field: FieldPoint) -> RelativePoint {
        to_relative(field, &self.origin)
    }

    /// Convert a relative point back into the field frame.
    pub fn to_field(&self, relative: RelativePoint) -> FieldPoint {
        to_field(relative, &self.origin)
    }

    /// Shorthand for converting raw field coordinates, as tuning tables are written.
    pub fn relative(&self, field_x: f64, field_y: f64) -> RelativePoint {
        self.to_relative(FieldPoint::new(field_x, field_y))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert a field point into the relative frame of `origin`.
pub fn to_relative(field: FieldPoint, origin: &FieldOrigin) -> RelativePoint {
    RelativePoint::new(origin.start_y - field.y, field.x - origin.start_x)
}

/// Convert a relative point into the field frame. Exact inverse of [`to_relative`].
pub fn to_field(relative: RelativePoint, origin: &FieldOrigin) -> FieldPoint {
    FieldPoint::new(relative.y + origin.start_x, origin.start_y - relative.x)
}

/// Reflect across the forward (Y) axis by negating X.
///
/// This swaps a left start for a right start while keeping "into the field" unchanged.
pub fn mirror_across_forward_axis<F: Frame>(p: Point<F>) -> Point<F> {
    Point::new(-p.x, p.y)
}

/// Reflect across the lateral (X) axis by negating Y.
pub fn mirror_across_lateral_axis<F: Frame>(p: Point<F>) -> Point<F> {
    Point::new(p.x, -p.y)
}

/// Rotate 180° about the frame origin.
pub fn rotate_180<F: Frame>(p: Point<F>) -> Point<F> {
    Point::new(-p.x, -p.y)
}

/// Project a point along a heading by a signed distance. Negative distances move backwards.
///
/// Headings follow the relative frame convention (0° faces +Y, clockwise positive).
pub fn offset_along_heading<F: Frame>(p: Point<F>, heading_deg: f64, distance_in: f64) -> Point<F> {
    Point::from_vec(p.vec() + heading_unit_vector(heading_deg) * distance_in)
}

/// Pose point of the robot when its front bumper touches `contact` while facing `heading_deg`.
///
/// Tuned targets at goals are recorded as the contact point, so re-measuring the bumper length
/// only changes `front_bumper_in`.
pub fn pose_from_front_contact<F: Frame>(
    contact: Point<F>,
    heading_deg: f64,
    front_bumper_in: f64,
) -> Point<F> {
    offset_along_heading(contact, heading_deg, -front_bumper_in)
}

/// Pose point of the robot when its back bumper touches `contact` while facing `heading_deg`.
pub fn pose_from_back_contact<F: Frame>(
    contact: Point<F>,
    heading_deg: f64,
    back_bumper_in: f64,
) -> Point<F> {
    offset_along_heading(contact, heading_deg, back_bumper_in)
}

/// Unit vector pointing along a heading.
pub fn heading_unit_vector(heading_deg: f64) -> Vector2<f64> {
    let rad = heading_deg.to_radians();
    Vector2::new(rad.sin(), rad.cos())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
