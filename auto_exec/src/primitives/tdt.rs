//! Turn-drive-turn request and report

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use serde::Serialize;

use super::{AT_TARGET_DISTANCE_IN, DEFAULT_DRIVE_TIMEOUT, DEFAULT_TURN_TIMEOUT};
use crate::{
    error::{ensure_finite, AutoError},
    frame::{heading_to, normalize_heading, RelativePoint},
    motion::{DriveParams, Pose, TurnParams},
    supervisor::{WaitReport, WaitRequest},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How the drive stage of a turn-drive-turn is supervised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveWait {
    /// Wait for the motion to end, bounded by the drive's motion timeout plus the grace period.
    MotionTimeout,

    /// Wait for the motion to end, bounded by `wait_timeout`.
    Timeout { wait_timeout: Duration },

    /// Exit early if the robot stalls near the target.
    StallNearTarget {
        wait_timeout: Duration,
        window: Duration,
        epsilon_in: f64,
        radius_in: f64,
    },

    /// Exit once position and heading converge on the target pose.
    ///
    /// The heading is the final heading if there is one, otherwise the heading of travel.
    PoseClose {
        wait_timeout: Duration,
        min_time: Duration,
        distance_tol_in: f64,
        heading_tol_deg: f64,
    },
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A turn-drive-turn to a relative point.
///
/// Each stage is independently toggleable.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDriveTurn {
    pub label: String,
    pub target: RelativePoint,

    /// Heading to turn to after the drive. No post turn is made without one.
    pub final_heading_deg: Option<f64>,

    /// Turn to face the target before driving.
    pub pre_turn: bool,

    /// Turn to `final_heading_deg` after driving.
    pub post_turn: bool,

    pub turn_timeout: Duration,
    pub drive_timeout: Duration,
    pub turn_params: TurnParams,
    pub drive_params: DriveParams,
    pub drive_wait: DriveWait,
}

/// Reports of each stage of a turn-drive-turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundReport {
    pub pre_turn: Option<WaitReport>,
    pub drive: WaitReport,
    pub retries: Vec<WaitReport>,
    pub post_turn: Option<WaitReport>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DriveWait {
    fn default() -> Self {
        DriveWait::StallNearTarget {
            wait_timeout: DEFAULT_DRIVE_TIMEOUT,
            window: Duration::from_millis(300),
            epsilon_in: 0.35,
            radius_in: 6.0,
        }
    }
}

impl DriveWait {
    /// Build the wait request for a drive stage.
    pub(crate) fn request(
        &self,
        label: &str,
        tdt: &TurnDriveTurn,
        heading_deg: f64,
        grace: Duration,
    ) -> WaitRequest {
        let target = tdt.target;

        match *self {
            DriveWait::MotionTimeout => {
                WaitRequest::timeout(label, tdt.drive_timeout + grace).with_target(target)
            }
            DriveWait::Timeout { wait_timeout } => {
                WaitRequest::timeout(label, wait_timeout).with_target(target)
            }
            DriveWait::StallNearTarget {
                wait_timeout,
                window,
                epsilon_in,
                radius_in,
            } => WaitRequest::stalled_near_target(
                label,
                wait_timeout,
                window,
                epsilon_in,
                target,
                radius_in,
            ),
            DriveWait::PoseClose {
                wait_timeout,
                min_time,
                distance_tol_in,
                heading_tol_deg,
            } => WaitRequest::pose_close(
                label,
                wait_timeout,
                target,
                heading_deg,
                distance_tol_in,
                heading_tol_deg,
            )
            .with_min_time(min_time),
        }
    }

    fn values(&self) -> Vec<f64> {
        match *self {
            DriveWait::MotionTimeout | DriveWait::Timeout { .. } => Vec::new(),
            DriveWait::StallNearTarget {
                epsilon_in,
                radius_in,
                ..
            } => vec![epsilon_in, radius_in],
            DriveWait::PoseClose {
                distance_tol_in,
                heading_tol_deg,
                ..
            } => vec![distance_tol_in, heading_tol_deg],
        }
    }
}

impl TurnDriveTurn {
    /// A turn-drive-turn with a pre turn and the default timeouts and wait. The post turn is only
    /// made once a final heading is set.
    pub fn new<L: Into<String>>(label: L, target: RelativePoint) -> Self {
        Self {
            label: label.into(),
            target,
            final_heading_deg: None,
            pre_turn: true,
            post_turn: true,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            drive_timeout: DEFAULT_DRIVE_TIMEOUT,
            turn_params: TurnParams::default(),
            drive_params: DriveParams::default(),
            drive_wait: DriveWait::default(),
        }
    }

    pub fn with_final_heading(mut self, heading_deg: f64) -> Self {
        self.final_heading_deg = Some(heading_deg);
        self
    }

    pub fn with_pre_turn(mut self, pre_turn: bool) -> Self {
        self.pre_turn = pre_turn;
        self
    }

    pub fn with_post_turn(mut self, post_turn: bool) -> Self {
        self.post_turn = post_turn;
        self
    }

    pub fn with_timeouts(mut self, turn_timeout: Duration, drive_timeout: Duration) -> Self {
        self.turn_timeout = turn_timeout;
        self.drive_timeout = drive_timeout;
        self
    }

    pub fn with_turn_params(mut self, params: TurnParams) -> Self {
        self.turn_params = params;
        self
    }

    pub fn with_drive_params(mut self, params: DriveParams) -> Self {
        self.drive_params = params;
        self
    }

    pub fn with_drive_wait(mut self, wait: DriveWait) -> Self {
        self.drive_wait = wait;
        self
    }

    /// Heading the robot should have on arrival, seen from `from`.
    ///
    /// Without a final heading this is the heading of travel, or the current heading if the robot
    /// is already on the target.
    pub fn arrival_heading(&self, from: &Pose) -> f64 {
        match self.final_heading_deg {
            Some(h) => normalize_heading(h),
            None if from.point().distance_to(&self.target) < AT_TARGET_DISTANCE_IN => {
                normalize_heading(from.heading_deg)
            }
            None => {
                let facing = heading_to(&from.point(), &self.target);
                if self.drive_params.forwards {
                    facing
                } else {
                    normalize_heading(facing + 180.0)
                }
            }
        }
    }

    /// Reject requests holding NaN or infinite values.
    pub fn validate(&self) -> Result<(), AutoError> {
        ensure_finite("turn-drive-turn target", &[self.target.x, self.target.y])?;
        ensure_finite(
            "turn-drive-turn speeds",
            &[
                self.drive_params.max_speed,
                self.drive_params.min_speed,
                self.drive_params.early_exit_range_in,
                self.turn_params.max_speed,
                self.turn_params.min_speed,
            ],
        )?;
        ensure_finite("turn-drive-turn wait", &self.drive_wait.values())?;

        if let Some(h) = self.final_heading_deg {
            ensure_finite("turn-drive-turn final heading", &[h])?;
        }

        Ok(())
    }
}

impl CompoundReport {
    /// The report of the last drive made, the final retry if there was one.
    pub fn last_drive(&self) -> &WaitReport {
        self.retries.last().unwrap_or(&self.drive)
    }

    /// Every stage report in the order the stages ran.
    pub fn into_stages(self) -> Vec<WaitReport> {
        let mut stages = Vec::with_capacity(self.retries.len() + 3);
        stages.extend(self.pre_turn);
        stages.push(self.drive);
        stages.extend(self.retries);
        stages.extend(self.post_turn);
        stages
    }

    /// Distance to the target after the last drive.
    pub fn final_distance_in(&self) -> Option<f64> {
        self.last_drive().final_distance_in
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::supervisor::WaitPolicy;

    #[test]
    fn test_arrival_heading() {
        let tdt = TurnDriveTurn::new("a", RelativePoint::new(0.0, -10.0));
        let from = Pose::new(0.0, 0.0, 0.0);

        assert!((tdt.arrival_heading(&from) - 180.0).abs() < 1e-9);

        let tdt = tdt.with_drive_params(DriveParams::backwards());
        assert!(tdt.arrival_heading(&from).abs() < 1e-9);

        let tdt = tdt.with_final_heading(-45.0);
        assert_eq!(tdt.arrival_heading(&from), 315.0);
    }

    #[test]
    fn test_arrival_heading_on_target() {
        let tdt = TurnDriveTurn::new("here", RelativePoint::new(5.0, 5.0));

        // Keeps the current heading rather than the heading of a zero length path
        assert_eq!(tdt.arrival_heading(&Pose::new(5.0, 5.0, 90.0)), 90.0);
        assert_eq!(tdt.arrival_heading(&Pose::new(5.1, 5.0, -90.0)), 270.0);

        let tdt = tdt.with_drive_params(DriveParams::backwards());
        assert_eq!(tdt.arrival_heading(&Pose::new(5.0, 5.0, 90.0)), 90.0);
    }

    #[test]
    fn test_requests() {
        let tdt = TurnDriveTurn::new("b", RelativePoint::new(1.0, 2.0));
        let grace = Duration::from_millis(250);

        let req = DriveWait::MotionTimeout.request("b.drive", &tdt, 0.0, grace);
        assert_eq!(req.timeout, Duration::from_millis(5750));
        assert_eq!(req.policy, WaitPolicy::Timeout);
        assert_eq!(req.target(), Some(tdt.target));

        let req = DriveWait::PoseClose {
            wait_timeout: Duration::from_millis(1900),
            min_time: Duration::from_millis(400),
            distance_tol_in: 1.25,
            heading_tol_deg: 6.0,
        }
        .request("b.drive", &tdt, 90.0, grace);
        assert_eq!(req.min_time, Duration::from_millis(400));
        assert_eq!(req.heading_deg(), Some(90.0));
        assert_eq!(req.label, "b.drive");
    }

    #[test]
    fn test_validate() {
        let tdt = TurnDriveTurn::new("c", RelativePoint::new(1.0, 2.0));
        assert!(tdt.validate().is_ok());

        let bad = tdt.clone().with_final_heading(std::f64::NAN);
        assert!(matches!(bad.validate(), Err(AutoError::NonFinite(_))));

        let bad = tdt.with_drive_wait(DriveWait::StallNearTarget {
            wait_timeout: Duration::from_secs(1),
            window: Duration::from_millis(300),
            epsilon_in: std::f64::INFINITY,
            radius_in: 6.0,
        });
        assert!(bad.validate().is_err());
    }
}
