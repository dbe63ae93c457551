//! # Compound motion primitives
//!
//! Sequences of commands and supervised waits built on [`AutoCtx`]. Each stage's wait returns
//! before the next stage is commanded, and no stage outcome is fatal: the primitives report how
//! each stage ended and leave it to the routine to carry on.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod retry;
mod tdt;

pub use retry::RetryPolicy;
pub use tdt::{CompoundReport, DriveWait, TurnDriveTurn};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    ctx::AutoCtx,
    error::{ensure_finite, AutoError},
    frame::{heading_to, normalize_heading, offset_along_heading, FieldPoint, RelativePoint},
    motion::{Clock, DriveParams, MotionController, Sensors, TurnParams},
    supervisor::{WaitReport, WaitRequest},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default motion timeout of a drive stage.
pub const DEFAULT_DRIVE_TIMEOUT: Duration = Duration::from_millis(5500);

/// Default motion timeout of a turn stage.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_millis(1300);

/// Within this distance of its target the robot is treated as already there, and has no heading
/// of travel to face.
///
/// Units: inches
pub const AT_TARGET_DISTANCE_IN: f64 = 0.5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Stall detection used to cut a relative push short on contact.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct StallExit {
    pub window_ms: u64,

    /// Units: inches
    pub epsilon_in: f64,
}

/// Convergence tolerances for a supervised drive to a pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseTolerance {
    /// Units: inches
    pub distance_tol_in: f64,

    /// Units: degrees
    pub heading_tol_deg: f64,

    /// Convergence is not accepted before this time has elapsed.
    pub min_time: Duration,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for StallExit {
    fn default() -> Self {
        Self {
            window_ms: 300,
            epsilon_in: 0.35,
        }
    }
}

impl Default for PoseTolerance {
    fn default() -> Self {
        Self {
            distance_tol_in: 1.25,
            heading_tol_deg: 6.0,
            min_time: Duration::from_millis(400),
        }
    }
}

impl StallExit {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl<C, S, K> AutoCtx<C, S, K>
where
    C: MotionController,
    S: Sensors,
    K: Clock,
{
    // ---- SINGLE MOTIONS ----

    /// Drive to a relative point and wait for the motion to end.
    ///
    /// The wait is bounded by the motion timeout plus the turn grace period.
    pub fn drive_to(
        &mut self,
        label: &str,
        target: RelativePoint,
        timeout: Duration,
        params: &DriveParams,
    ) -> Result<WaitReport, AutoError> {
        self.ensure_ready()?;
        ensure_finite("drive target", &[target.x, target.y])?;

        self.controller_mut().drive_to_point(target, timeout, params);

        let grace = self.params().supervisor.turn_grace();
        self.wait(&WaitRequest::timeout(label, timeout + grace).with_target(target))
    }

    /// Turn to a relative heading and wait for the turn to end.
    pub fn turn_to(
        &mut self,
        label: &str,
        heading_deg: f64,
        timeout: Duration,
        params: &TurnParams,
    ) -> Result<WaitReport, AutoError> {
        self.ensure_ready()?;
        ensure_finite("turn heading", &[heading_deg])?;

        let heading_deg = normalize_heading(heading_deg);
        self.controller_mut()
            .turn_to_heading(heading_deg, timeout, params);

        let grace = self.params().supervisor.turn_grace();
        self.wait(&WaitRequest::timeout(label, timeout + grace).with_heading(heading_deg))
    }

    /// Drive to a canonical point, transformed for this run's side and alliance.
    pub fn auto_drive_to(
        &mut self,
        label: &str,
        canonical: RelativePoint,
        timeout: Duration,
        params: &DriveParams,
    ) -> Result<WaitReport, AutoError> {
        let target = self.transform().point(canonical);
        debug!("{}: canonical {} -> {}", label, canonical, target);

        self.drive_to(label, target, timeout, params)
    }

    /// Turn to a canonical heading, transformed for this run's side and alliance.
    pub fn auto_turn_to(
        &mut self,
        label: &str,
        canonical_deg: f64,
        timeout: Duration,
        params: &TurnParams,
    ) -> Result<WaitReport, AutoError> {
        ensure_finite("turn heading", &[canonical_deg])?;
        let heading_deg = self.transform().heading(canonical_deg);

        self.turn_to(label, heading_deg, timeout, params)
    }

    /// Drive to a pose, supervised by convergence on that same pose.
    ///
    /// The wait is bounded by the motion timeout plus the turn grace period.
    #[allow(clippy::too_many_arguments)]
    pub fn drive_to_pose(
        &mut self,
        label: &str,
        target: RelativePoint,
        heading_deg: f64,
        timeout: Duration,
        params: &DriveParams,
        tol: PoseTolerance,
    ) -> Result<WaitReport, AutoError> {
        self.ensure_ready()?;
        ensure_finite("pose target", &[target.x, target.y, heading_deg])?;
        ensure_finite("pose tolerance", &[tol.distance_tol_in, tol.heading_tol_deg])?;

        let heading_deg = normalize_heading(heading_deg);
        self.controller_mut()
            .drive_to_pose(target, heading_deg, timeout, params);

        let grace = self.params().supervisor.turn_grace();
        let req = WaitRequest::pose_close(
            label,
            timeout + grace,
            target,
            heading_deg,
            tol.distance_tol_in,
            tol.heading_tol_deg,
        )
        .with_min_time(tol.min_time);

        self.wait(&req)
    }

    // ---- COMPOUND ----

    /// Turn to face the target, drive to it, then optionally turn to a final heading.
    ///
    /// If the drive ends farther from the target than the retry policy's trigger distance, the
    /// drive is re-issued at a reduced speed through the same wait, up to the policy's attempt
    /// limit.
    pub fn turn_drive_to(&mut self, tdt: &TurnDriveTurn) -> Result<CompoundReport, AutoError> {
        self.ensure_ready()?;
        tdt.validate()?;

        let label = tdt.label.as_str();
        let target = tdt.target;
        info!("{}: turn-drive-turn to {}", label, target);
        self.log_field_target(label, target);

        // Pre turn, skipped if already on the target as there is nothing to face
        let on_target = self.pose().point().distance_to(&target) < AT_TARGET_DISTANCE_IN;
        if tdt.pre_turn && on_target {
            debug!("{}: already on target, skipping pre turn", label);
        }

        let pre_turn = if tdt.pre_turn && !on_target {
            let mut facing = heading_to(&self.pose().point(), &target);
            if !tdt.drive_params.forwards {
                facing = normalize_heading(facing + 180.0);
            }

            Some(self.turn_to(
                &format!("{}.pre_turn", label),
                facing,
                tdt.turn_timeout,
                &tdt.turn_params,
            )?)
        } else {
            None
        };

        // Drive
        let drive = self.tdt_drive(tdt, &format!("{}.drive", label), &tdt.drive_params)?;

        // Retries
        let policy = self.params().retry;
        let mut retries = Vec::new();
        let mut dist = self.pose().point().distance_to(&target);
        let mut attempt = 0;

        let mut outcome = drive.outcome;

        while policy.should_retry(attempt, outcome, dist) {
            attempt += 1;

            let speed = policy.retry_speed(tdt.drive_params.max_speed, attempt);
            warn!(
                "{}: still {:.2} in from target, retrying at speed {:.0}",
                label, dist, speed
            );

            let params = tdt.drive_params.with_max_speed(speed);
            let report = self.tdt_drive(tdt, &format!("{}.retry", label), &params)?;
            outcome = report.outcome;
            retries.push(report);

            dist = self.pose().point().distance_to(&target);
        }

        // Post turn
        let post_turn = match tdt.final_heading_deg {
            Some(h) if tdt.post_turn => Some(self.turn_to(
                &format!("{}.post_turn", label),
                h,
                tdt.turn_timeout,
                &tdt.turn_params,
            )?),
            _ => None,
        };

        Ok(CompoundReport {
            pre_turn,
            drive,
            retries,
            post_turn,
        })
    }

    /// Issue the drive stage of a turn-drive-turn and run its supervised wait.
    fn tdt_drive(
        &mut self,
        tdt: &TurnDriveTurn,
        label: &str,
        params: &DriveParams,
    ) -> Result<WaitReport, AutoError> {
        self.controller_mut()
            .drive_to_point(tdt.target, tdt.drive_timeout, params);

        let heading = tdt.arrival_heading(&self.pose());
        let grace = self.params().supervisor.turn_grace();
        let req = tdt.drive_wait.request(label, tdt, heading, grace);

        self.wait(&req)
    }

    /// Drive a distance along the robot's current heading.
    ///
    /// When `forwards` is false the robot reverses the distance while keeping its heading.
    pub fn drive_relative(
        &mut self,
        label: &str,
        distance_in: f64,
        timeout: Duration,
        forwards: bool,
    ) -> Result<WaitReport, AutoError> {
        self.ensure_ready()?;
        ensure_finite("relative distance", &[distance_in])?;

        let target = self.relative_target(distance_in, forwards);
        let params = DriveParams {
            forwards,
            max_speed: self.params().speeds.max_speed,
            ..Default::default()
        };

        self.drive_to(label, target, timeout, &params)
    }

    /// Drive a distance along the current heading, exiting early once progress stalls.
    ///
    /// Used to push into a field element until contact rather than for the nominal distance.
    #[allow(clippy::too_many_arguments)]
    pub fn drive_relative_stall_exit(
        &mut self,
        label: &str,
        distance_in: f64,
        timeout: Duration,
        forwards: bool,
        stall: StallExit,
        max_speed: f64,
    ) -> Result<WaitReport, AutoError> {
        self.ensure_ready()?;
        ensure_finite(
            "relative stall exit drive",
            &[distance_in, stall.epsilon_in, max_speed],
        )?;

        let target = self.relative_target(distance_in, forwards);
        let params = DriveParams {
            forwards,
            max_speed,
            ..Default::default()
        };

        self.controller_mut().drive_to_point(target, timeout, &params);

        self.wait(
            &WaitRequest::stalled(label, timeout, stall.window(), stall.epsilon_in)
                .with_target(target),
        )
    }

    /// The point `distance_in` ahead of (or behind) the current pose along the current heading.
    fn relative_target(&self, distance_in: f64, forwards: bool) -> RelativePoint {
        let pose = self.pose();
        let d = if forwards { distance_in } else { -distance_in };

        offset_along_heading(pose.point(), pose.heading_deg, d)
    }

    /// Field point of the current pose.
    pub fn field_position(&self) -> FieldPoint {
        self.coords().to_field(self.pose().point())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        auto_tf::{Alliance, Side},
        motion::Pose,
        params::AutoParams,
        sim::{SimBounds, SimClock, SimCommand, SimController, SimParams, SimSensors},
        supervisor::Outcome,
    };

    type SimCtx = AutoCtx<SimController, SimSensors, SimClock>;

    fn ctx_with(ctrl: SimController, clock: SimClock) -> SimCtx {
        let sensors = ctrl.sensors();
        let params = AutoParams::default();
        AutoCtx::new(ctrl, sensors, clock, params, Side::Left, Alliance::Red).unwrap()
    }

    fn ctx() -> SimCtx {
        let clock = SimClock::new();
        ctx_with(SimController::new(clock.clone(), SimParams::default()), clock)
    }

    fn drive_speeds(c: &SimCtx) -> Vec<f64> {
        c.controller()
            .commands()
            .iter()
            .filter_map(|cmd| match cmd {
                SimCommand::DriveToPoint { params, .. } => Some(params.max_speed),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_turn_drive_turn() {
        let mut c = ctx();

        let tdt =
            TurnDriveTurn::new("goal", RelativePoint::new(20.0, 20.0)).with_final_heading(180.0);
        let report = c.turn_drive_to(&tdt).unwrap();

        let pre = report.pre_turn.unwrap();
        assert_eq!(pre.outcome, Outcome::MotionEnded);
        assert!((pre.final_pose.heading_deg - 45.0).abs() < 1e-9);

        assert!(report.retries.is_empty());
        assert!(report.drive.final_distance_in.unwrap() < 0.01);

        let post = report.post_turn.unwrap();
        assert!((post.final_pose.heading_deg - 180.0).abs() < 1e-9);

        let cmds = c.controller().commands();
        assert_eq!(cmds.len(), 3);
        assert!(matches!(cmds[0], SimCommand::TurnToHeading { .. }));
        assert!(matches!(cmds[1], SimCommand::DriveToPoint { .. }));
        assert!(matches!(cmds[2], SimCommand::TurnToHeading { .. }));
    }

    #[test]
    fn test_backwards_pre_turn_faces_away() {
        let mut c = ctx();

        let tdt = TurnDriveTurn::new("retreat", RelativePoint::new(0.0, -24.0))
            .with_drive_params(DriveParams::backwards());
        let report = c.turn_drive_to(&tdt).unwrap();

        // Facing away from a target directly behind means no turn at all
        assert!(report.pre_turn.unwrap().final_pose.heading_deg.abs() < 1e-9);
        assert!(report.post_turn.is_none());
        assert_eq!(c.pose().point(), RelativePoint::new(0.0, -24.0));
    }

    #[test]
    fn test_retry_when_short() {
        let mut c = ctx();
        c.controller().inject_early_stop(8.0);

        let tdt = TurnDriveTurn::new("short", RelativePoint::new(0.0, 30.0))
            .with_pre_turn(false)
            .with_drive_params(DriveParams::default().with_max_speed(100.0));
        let report = c.turn_drive_to(&tdt).unwrap();

        assert_eq!(report.drive.outcome, Outcome::MotionEnded);
        assert!((report.drive.final_distance_in.unwrap() - 8.0).abs() < 1e-6);

        assert_eq!(report.retries.len(), 1);
        assert!(report.retries[0].final_distance_in.unwrap() < 0.01);
        assert!(report.final_distance_in().unwrap() < 0.01);

        assert_eq!(drive_speeds(&c), vec![100.0, 70.0]);
    }

    #[test]
    fn test_no_retry_when_converged() {
        // Stopping 4 in short is outside the retry trigger but inside the convergence tolerance
        let mut c = ctx();
        c.controller().inject_early_stop(4.0);

        let tdt = TurnDriveTurn::new("converged", RelativePoint::new(0.0, 30.0))
            .with_pre_turn(false)
            .with_drive_wait(DriveWait::PoseClose {
                wait_timeout: Duration::from_millis(1900),
                min_time: Duration::from_millis(0),
                distance_tol_in: 5.0,
                heading_tol_deg: 6.0,
            });
        let report = c.turn_drive_to(&tdt).unwrap();

        assert_eq!(report.drive.outcome, Outcome::Converged);
        assert!(report.drive.final_distance_in.unwrap() > c.params().retry.trigger_distance_in);
        assert!(report.retries.is_empty());
        assert_eq!(drive_speeds(&c).len(), 1);
    }

    #[test]
    fn test_no_retry_within_trigger() {
        let mut c = ctx();
        c.controller().inject_early_stop(2.0);

        let tdt = TurnDriveTurn::new("close", RelativePoint::new(0.0, 30.0)).with_pre_turn(false);
        let report = c.turn_drive_to(&tdt).unwrap();

        assert!(report.retries.is_empty());
        assert_eq!(drive_speeds(&c).len(), 1);
    }

    #[test]
    fn test_at_target_skips_pre_turn() {
        let clock = SimClock::new();
        let ctrl = SimController::new(clock.clone(), SimParams::default())
            .with_pose(Pose::new(5.0, 5.0, 90.0));
        let mut c = ctx_with(ctrl, clock);

        let report = c
            .turn_drive_to(&TurnDriveTurn::new("here", RelativePoint::new(5.0, 5.0)))
            .unwrap();

        assert!(report.pre_turn.is_none());
        assert!(report.retries.is_empty());
        assert!(!c
            .controller()
            .commands()
            .iter()
            .any(|cmd| matches!(cmd, SimCommand::TurnToHeading { .. })));
        assert!((c.pose().heading_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_at_target_pose_close_keeps_heading() {
        let clock = SimClock::new();
        let ctrl = SimController::new(clock.clone(), SimParams::default())
            .with_pose(Pose::new(5.0, 5.0, 90.0));
        let mut c = ctx_with(ctrl, clock);

        let tdt = TurnDriveTurn::new("here", RelativePoint::new(5.0, 5.0))
            .with_drive_wait(DriveWait::PoseClose {
                wait_timeout: Duration::from_millis(1000),
                min_time: Duration::from_millis(100),
                distance_tol_in: 1.0,
                heading_tol_deg: 5.0,
            });
        let report = c.turn_drive_to(&tdt).unwrap();

        assert_eq!(report.drive.outcome, Outcome::Converged);
        assert!(report.drive.final_heading_error_deg.unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_drive_to_pose_waits_on_commanded_pose() {
        let mut c = ctx();
        let target = RelativePoint::new(10.0, 10.0);

        let report = c
            .drive_to_pose(
                "pose",
                target,
                45.0,
                Duration::from_millis(2000),
                &DriveParams::default(),
                PoseTolerance::default(),
            )
            .unwrap();

        assert_eq!(report.outcome, Outcome::Converged);
        assert_eq!(report.elapsed, Duration::from_millis(400));
        assert!(report.final_distance_in.unwrap() < 0.01);
        assert!(report.final_heading_error_deg.unwrap().abs() < 1e-9);

        match c.controller().commands().as_slice() {
            [SimCommand::DriveToPose {
                target: t,
                heading_deg,
                ..
            }] => {
                assert_eq!(*t, target);
                assert_eq!(*heading_deg, 45.0);
            }
            cmds => panic!("unexpected commands: {:?}", cmds),
        }
    }

    #[test]
    fn test_pose_close_wait() {
        let mut c = ctx();

        let tdt = TurnDriveTurn::new("low_goal", RelativePoint::new(10.0, 10.0))
            .with_final_heading(45.0)
            .with_drive_wait(DriveWait::PoseClose {
                wait_timeout: Duration::from_millis(1900),
                min_time: Duration::from_millis(400),
                distance_tol_in: 1.25,
                heading_tol_deg: 6.0,
            });
        let report = c.turn_drive_to(&tdt).unwrap();

        // Arrives in ~240ms but must wait out the min time
        assert_eq!(report.drive.outcome, Outcome::Converged);
        assert_eq!(report.drive.elapsed, Duration::from_millis(400));
        assert!(report.drive.final_heading_error_deg.unwrap().abs() < 1e-9);
        assert!(report.retries.is_empty());
    }

    #[test]
    fn test_drive_relative_uses_current_heading() {
        let clock = SimClock::new();
        let ctrl = SimController::new(clock.clone(), SimParams::default())
            .with_pose(Pose::new(1.0, 2.0, 90.0));
        let mut c = ctx_with(ctrl, clock);

        c.drive_relative("fwd", 10.0, Duration::from_secs(2), true).unwrap();
        assert!(c.pose().point().distance_to(&RelativePoint::new(11.0, 2.0)) < 1e-9);

        // Backwards keeps the heading and reverses along it
        c.drive_relative("back", 4.0, Duration::from_secs(2), false).unwrap();
        let pose = c.pose();
        assert!(pose.point().distance_to(&RelativePoint::new(7.0, 2.0)) < 1e-9);
        assert!((pose.heading_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_stall_exit_at_wall() {
        let clock = SimClock::new();
        let bounds = SimBounds {
            min_x: -50.0,
            max_x: 50.0,
            min_y: -50.0,
            max_y: 12.0,
        };
        let ctrl = SimController::new(clock.clone(), SimParams::default()).with_bounds(bounds);
        let mut c = ctx_with(ctrl, clock);

        let report = c
            .drive_relative_stall_exit(
                "push",
                24.0,
                Duration::from_secs(3),
                true,
                StallExit::default(),
                127.0,
            )
            .unwrap();

        assert_eq!(report.outcome, Outcome::Stalled);
        assert!(report.elapsed < Duration::from_secs(1));
        assert!((c.pose().y - 12.0).abs() < 1e-9);
        assert_eq!(c.controller().cancel_count(), 1);
    }

    #[test]
    fn test_not_ready_commands_nothing() {
        let mut c = ctx();
        c.controller().set_ready(false);

        let tdt = TurnDriveTurn::new("nope", RelativePoint::new(5.0, 5.0));
        assert!(matches!(c.turn_drive_to(&tdt), Err(AutoError::NotReady)));
        assert!(matches!(
            c.drive_relative("nope", 5.0, Duration::from_secs(1), true),
            Err(AutoError::NotReady)
        ));
        assert!(matches!(
            c.auto_turn_to("nope", 90.0, DEFAULT_TURN_TIMEOUT, &TurnParams::default()),
            Err(AutoError::NotReady)
        ));

        assert!(c.controller().commands().is_empty());
        assert_eq!(c.elapsed(), Duration::from_millis(0));
    }

    #[test]
    fn test_non_finite_commands_nothing() {
        let mut c = ctx();

        let tdt = TurnDriveTurn::new("nan", RelativePoint::new(std::f64::NAN, 5.0));
        assert!(matches!(c.turn_drive_to(&tdt), Err(AutoError::NonFinite(_))));
        assert!(matches!(
            c.drive_relative("inf", std::f64::INFINITY, Duration::from_secs(1), true),
            Err(AutoError::NonFinite(_))
        ));
        assert!(matches!(
            c.turn_to("nan", std::f64::NAN, DEFAULT_TURN_TIMEOUT, &TurnParams::default()),
            Err(AutoError::NonFinite(_))
        ));

        assert!(c.controller().commands().is_empty());
    }

    #[test]
    fn test_auto_variants_transform() {
        // Red left mirrors across the forward axis
        let mut c = ctx();

        c.auto_turn_to("turn", 30.0, DEFAULT_TURN_TIMEOUT, &TurnParams::default())
            .unwrap();
        assert!((c.pose().heading_deg - 150.0).abs() < 1e-9);

        c.auto_drive_to(
            "drive",
            RelativePoint::new(5.0, 10.0),
            DEFAULT_DRIVE_TIMEOUT,
            &DriveParams::default(),
        )
        .unwrap();
        assert_eq!(c.pose().point(), RelativePoint::new(-5.0, 10.0));
    }
}
