//! # Motion interfaces
//!
//! The closed-loop motion controller, the sensor drivers and the time source are all external to
//! the autonomy core. This module defines the narrow interfaces the core drives them through.
//!
//! Motion commands are synchronous to issue and asynchronous to complete: each `MotionController`
//! command returns immediately, and completion is observed by polling [`MotionController::pose`]
//! and [`MotionController::is_in_motion`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::frame::{normalize_heading, RelativePoint};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The external closed-loop motion controller.
///
/// All points and headings are in the start-relative frame.
pub trait MotionController {
    /// True once the controller and the sensors it depends on are initialised.
    fn is_ready(&self) -> bool;

    /// Begin driving to a point.
    fn drive_to_point(&mut self, target: RelativePoint, timeout: Duration, params: &DriveParams);

    /// Begin driving to a point, arriving at the given heading.
    fn drive_to_pose(
        &mut self,
        target: RelativePoint,
        heading_deg: f64,
        timeout: Duration,
        params: &DriveParams,
    );

    /// Begin turning in place to a heading.
    fn turn_to_heading(&mut self, heading_deg: f64, timeout: Duration, params: &TurnParams);

    /// Stop any in-flight motion. Calling this with nothing in flight is a no-op.
    fn cancel_all_motions(&mut self);

    /// Current estimated pose.
    fn pose(&self) -> Pose;

    /// True while a commanded motion is still running.
    fn is_in_motion(&self) -> bool;
}

/// Scalar sensor queries, used for diagnostics only.
pub trait Sensors {
    /// Inertial heading in degrees, `[0, 360)`.
    fn inertial_heading_deg(&self) -> Option<f64>;

    /// Continuous (unwrapped) inertial rotation in degrees.
    fn inertial_rotation_deg(&self) -> Option<f64>;

    /// Distance travelled by the tracking wheel in inches.
    fn tracking_wheel_distance_in(&self) -> Option<f64>;
}

/// Monotonic time source.
///
/// Times are measured from an arbitrary fixed point, only differences between them are
/// meaningful.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Suspend the calling thread.
    fn sleep(&self, duration: Duration);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Robot pose in the start-relative frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,

    /// Units: degrees, clockwise from relative +Y
    pub heading_deg: f64,
}

/// Tuning for a drive-to-point or drive-to-pose command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveParams {
    /// Drive with the front leading. When false the robot reverses to the target.
    pub forwards: bool,

    pub max_speed: f64,

    pub min_speed: f64,

    /// Distance from the target at which the controller may end the motion early.
    ///
    /// Units: inches
    pub early_exit_range_in: f64,
}

/// Tuning for a turn-to-heading command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnParams {
    pub max_speed: f64,
    pub min_speed: f64,
    pub direction: TurnDirection,
}

/// Sensors which report nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSensors;

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which way a turn may rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    /// Shortest way round
    Auto,
    Clockwise,
    CounterClockwise,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(x: f64, y: f64, heading_deg: f64) -> Self {
        Self { x, y, heading_deg }
    }

    pub fn point(&self) -> RelativePoint {
        RelativePoint::new(self.x, self.y)
    }

    /// Heading normalised into `[0, 360)`.
    pub fn heading(&self) -> f64 {
        normalize_heading(self.heading_deg)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.2}, {:.2}, {:.1}°)",
            self.x, self.y, self.heading_deg
        )
    }
}

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            forwards: true,
            max_speed: 127.0,
            min_speed: 0.0,
            early_exit_range_in: 0.0,
        }
    }
}

impl DriveParams {
    pub fn backwards() -> Self {
        Self {
            forwards: false,
            ..Default::default()
        }
    }

    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = max_speed;
        self
    }
}

impl Default for TurnParams {
    fn default() -> Self {
        Self {
            max_speed: 127.0,
            min_speed: 0.0,
            direction: TurnDirection::Auto,
        }
    }
}

impl Default for TurnDirection {
    fn default() -> Self {
        TurnDirection::Auto
    }
}

impl Sensors for NoSensors {
    fn inertial_heading_deg(&self) -> Option<f64> {
        None
    }

    fn inertial_rotation_deg(&self) -> Option<f64> {
        None
    }

    fn tracking_wheel_distance_in(&self) -> Option<f64> {
        None
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}
