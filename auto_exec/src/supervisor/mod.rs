//! # Motion completion supervisor
//!
//! Once a motion has been commanded the supervisor decides when it is done. Every wait runs the
//! same polling loop:
//!
//! 1. Sleep for the poll interval.
//! 2. If the overall timeout has elapsed, cancel the motion and exit [`Outcome::TimedOut`].
//! 3. Query the pose and evaluate the request's [`WaitPolicy`]. If it fires, cancel the motion and
//!    exit with the policy's outcome.
//! 4. If the controller no longer reports motion, and at least `min_time` has elapsed, exit
//!    [`Outcome::MotionEnded`].
//!
//! The supervisor is the only part of the core which cancels motions, and it does so at most once
//! per wait. Every wait logs exactly one summary line on exit, including the final distance to the
//! target and heading error where they are known.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;

pub use params::SupervisorParams;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, time::Duration};

use log::{info, log_enabled, trace, Level};
use serde::Serialize;

use crate::{
    error::{ensure_finite, AutoError},
    frame::{heading_error, RelativePoint},
    motion::{Clock, MotionController, Pose, Sensors},
};
use util::time::as_millis_u64;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Log target of the per-poll progress traces.
///
/// Pass this to the logger's trace targets to see wait progress without enabling every other
/// trace record.
pub const TRACE_TARGET: &str = "sbot_wait_trace";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The early-exit predicate of a wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitPolicy {
    /// No predicate, wait for the motion to end or the timeout.
    Timeout,

    /// Exit once the robot has moved and then made no net progress of `epsilon_in` for `window`.
    ///
    /// A robot which never moves at all falls through to the timeout.
    Stall { epsilon_in: f64, window: Duration },

    /// As [`WaitPolicy::Stall`], but only armed within `radius_in` of `target`.
    StallNearTarget {
        epsilon_in: f64,
        window: Duration,
        target: RelativePoint,
        radius_in: f64,
    },

    /// Exit once the pose is within both tolerances of the target pose, and `min_time` has
    /// elapsed.
    PoseConverge {
        target: RelativePoint,
        heading_deg: f64,
        distance_tol_in: f64,
        heading_tol_deg: f64,
    },
}

/// How a supervised wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Pose converged within tolerance.
    Converged,

    /// The overall timeout elapsed.
    TimedOut,

    /// Progress stopped after the robot had started moving.
    Stalled,

    /// Progress stopped within the arming radius of the target.
    StalledNearTarget,

    /// The controller finished (or abandoned) the motion by itself.
    MotionEnded,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single supervised wait.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitRequest {
    /// Label printed in the wait summary.
    pub label: String,

    /// Overall timeout of the wait.
    pub timeout: Duration,

    pub policy: WaitPolicy,

    /// The wait will not exit through convergence or the motion ending before this has elapsed.
    pub min_time: Duration,

    /// Target used for diagnostics when the policy doesn't carry one.
    pub diag_target: Option<RelativePoint>,

    /// Target heading used for diagnostics when the policy doesn't carry one.
    pub diag_heading_deg: Option<f64>,
}

/// The result of a supervised wait.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitReport {
    pub label: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
    pub final_pose: Pose,

    /// Distance from the final pose to the target, if there was one.
    pub final_distance_in: Option<f64>,

    /// Signed heading error from the final pose to the target heading, if there was one.
    pub final_heading_error_deg: Option<f64>,

    /// Whether the controller still reported motion when the wait exited.
    pub in_motion_at_exit: bool,
}

/// Net-movement bookkeeping for the stall policies.
#[derive(Debug, Clone, Copy)]
struct StallTracker {
    anchor: RelativePoint,
    last_moved: Duration,
    has_moved: bool,
}

/// Progress trace bookkeeping.
struct Tracer {
    period: Duration,
    next: Duration,
    last_pose: Pose,
    last_wheel_in: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WaitRequest {
    fn with_policy<L: Into<String>>(label: L, timeout: Duration, policy: WaitPolicy) -> Self {
        Self {
            label: label.into(),
            timeout,
            policy,
            min_time: Duration::from_millis(0),
            diag_target: None,
            diag_heading_deg: None,
        }
    }

    /// Wait for the motion to end, bounded by `timeout`.
    pub fn timeout<L: Into<String>>(label: L, timeout: Duration) -> Self {
        Self::with_policy(label, timeout, WaitPolicy::Timeout)
    }

    /// Wait for the motion to end or stall.
    pub fn stalled<L: Into<String>>(
        label: L,
        timeout: Duration,
        window: Duration,
        epsilon_in: f64,
    ) -> Self {
        Self::with_policy(label, timeout, WaitPolicy::Stall { epsilon_in, window })
    }

    /// Wait for the motion to end, or stall within `radius_in` of `target`.
    pub fn stalled_near_target<L: Into<String>>(
        label: L,
        timeout: Duration,
        window: Duration,
        epsilon_in: f64,
        target: RelativePoint,
        radius_in: f64,
    ) -> Self {
        Self::with_policy(
            label,
            timeout,
            WaitPolicy::StallNearTarget {
                epsilon_in,
                window,
                target,
                radius_in,
            },
        )
    }

    /// Wait for the motion to end, or for the pose to converge on the target pose.
    pub fn pose_close<L: Into<String>>(
        label: L,
        timeout: Duration,
        target: RelativePoint,
        heading_deg: f64,
        distance_tol_in: f64,
        heading_tol_deg: f64,
    ) -> Self {
        Self::with_policy(
            label,
            timeout,
            WaitPolicy::PoseConverge {
                target,
                heading_deg,
                distance_tol_in,
                heading_tol_deg,
            },
        )
    }

    pub fn with_min_time(mut self, min_time: Duration) -> Self {
        self.min_time = min_time;
        self
    }

    pub fn with_target(mut self, target: RelativePoint) -> Self {
        self.diag_target = Some(target);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.diag_heading_deg = Some(heading_deg);
        self
    }

    /// The target used for diagnostics.
    pub fn target(&self) -> Option<RelativePoint> {
        match self.policy {
            WaitPolicy::StallNearTarget { target, .. }
            | WaitPolicy::PoseConverge { target, .. } => Some(target),
            _ => self.diag_target,
        }
    }

    /// The target heading used for diagnostics.
    pub fn heading_deg(&self) -> Option<f64> {
        match self.policy {
            WaitPolicy::PoseConverge { heading_deg, .. } => Some(heading_deg),
            _ => self.diag_heading_deg,
        }
    }

    /// Reject requests holding NaN or infinite values.
    pub fn validate(&self) -> Result<(), AutoError> {
        match self.policy {
            WaitPolicy::Timeout => (),
            WaitPolicy::Stall { epsilon_in, .. } => ensure_finite("stall epsilon", &[epsilon_in])?,
            WaitPolicy::StallNearTarget {
                epsilon_in,
                target,
                radius_in,
                ..
            } => ensure_finite(
                "stall near target request",
                &[epsilon_in, target.x, target.y, radius_in],
            )?,
            WaitPolicy::PoseConverge {
                target,
                heading_deg,
                distance_tol_in,
                heading_tol_deg,
            } => ensure_finite(
                "pose close request",
                &[target.x, target.y, heading_deg, distance_tol_in, heading_tol_deg],
            )?,
        }

        if let Some(t) = self.diag_target {
            ensure_finite("wait target", &[t.x, t.y])?;
        }
        if let Some(h) = self.diag_heading_deg {
            ensure_finite("wait heading", &[h])?;
        }

        Ok(())
    }
}

impl Outcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::Converged => "converged",
            Outcome::TimedOut => "timed_out",
            Outcome::Stalled => "stalled",
            Outcome::StalledNearTarget => "stalled_near_target",
            Outcome::MotionEnded => "motion_ended",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl WaitReport {
    pub fn elapsed_ms(&self) -> u64 {
        as_millis_u64(self.elapsed)
    }
}

impl fmt::Display for WaitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WAIT [{}]: {} ms {} dist={} hErr={} in_motion={}",
            self.label,
            self.elapsed_ms(),
            self.outcome,
            fmt_opt(self.final_distance_in),
            fmt_opt(self.final_heading_error_deg),
            self.in_motion_at_exit
        )
    }
}

impl StallTracker {
    fn new(pose: RelativePoint, now: Duration) -> Self {
        Self {
            anchor: pose,
            last_moved: now,
            has_moved: false,
        }
    }

    fn update(&mut self, pose: RelativePoint, now: Duration, epsilon_in: f64) {
        if self.anchor.distance_to(&pose) >= epsilon_in {
            self.has_moved = true;
            self.anchor = pose;
            self.last_moved = now;
        }
    }

    fn is_stalled(&self, now: Duration, window: Duration) -> bool {
        self.has_moved && now.saturating_sub(self.last_moved) >= window
    }
}

impl Tracer {
    fn new(period: Duration, pose: Pose, wheel_in: Option<f64>) -> Self {
        Self {
            period,
            next: period,
            last_pose: pose,
            last_wheel_in: wheel_in,
        }
    }

    /// Emit a trace line if a trace period has passed, returning true if one was emitted.
    ///
    /// Periods skipped between polls are not caught up on.
    fn poll<S: Sensors + ?Sized>(
        &mut self,
        elapsed: Duration,
        pose: Pose,
        req: &WaitRequest,
        sensors: &S,
    ) -> bool {
        if elapsed < self.next {
            return false;
        }
        while self.next <= elapsed {
            self.next += self.period;
        }

        let wheel_in = sensors.tracking_wheel_distance_in();
        let wheel_delta = match (wheel_in, self.last_wheel_in) {
            (Some(w), Some(l)) => Some(w - l),
            _ => None,
        };

        trace!(
            target: TRACE_TARGET,
            "WAIT TRACE [{}] @{}ms dist={} hErr={} pose={} dPose=({:.2}, {:.2}, {:.1}) \
             wheel={} dWheel={} imu={} rot={}",
            req.label,
            as_millis_u64(elapsed),
            fmt_opt(req.target().map(|t| pose.point().distance_to(&t))),
            fmt_opt(req.heading_deg().map(|h| heading_error(h, pose.heading_deg))),
            pose,
            pose.x - self.last_pose.x,
            pose.y - self.last_pose.y,
            heading_error(pose.heading_deg, self.last_pose.heading_deg),
            fmt_opt(wheel_in),
            fmt_opt(wheel_delta),
            fmt_opt(sensors.inertial_heading_deg()),
            fmt_opt(sensors.inertial_rotation_deg())
        );

        self.last_pose = pose;
        self.last_wheel_in = wheel_in;

        true
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run a supervised wait on the motion currently commanded on `controller`.
///
/// Blocks the calling thread, sleeping on `clock` between polls. Never fails: how the wait ended
/// is reported in the returned [`WaitReport`].
pub fn wait<C, S, K>(
    controller: &mut C,
    sensors: &S,
    clock: &K,
    params: &SupervisorParams,
    req: &WaitRequest,
) -> WaitReport
where
    C: MotionController + ?Sized,
    S: Sensors + ?Sized,
    K: Clock + ?Sized,
{
    let start = clock.now();
    let start_pose = controller.pose();

    let mut stall = StallTracker::new(start_pose.point(), start);
    let mut tracer = match params.trace_period() {
        Some(p) if log_enabled!(target: TRACE_TARGET, Level::Trace) => Some(Tracer::new(
            p,
            start_pose,
            sensors.tracking_wheel_distance_in(),
        )),
        _ => None,
    };

    let outcome = loop {
        clock.sleep(params.poll_interval());

        let now = clock.now();
        let elapsed = now.saturating_sub(start);

        if elapsed >= req.timeout {
            controller.cancel_all_motions();
            break Outcome::TimedOut;
        }

        let pose = controller.pose();

        if let Some(ref mut t) = tracer {
            t.poll(elapsed, pose, req, sensors);
        }

        if let Some(outcome) = evaluate(&req.policy, &mut stall, pose, now, elapsed, req.min_time) {
            controller.cancel_all_motions();
            break outcome;
        }

        if !controller.is_in_motion() && elapsed >= req.min_time {
            break Outcome::MotionEnded;
        }
    };

    let final_pose = controller.pose();
    let report = WaitReport {
        label: req.label.clone(),
        outcome,
        elapsed: clock.now().saturating_sub(start),
        final_pose,
        final_distance_in: req.target().map(|t| final_pose.point().distance_to(&t)),
        final_heading_error_deg: req
            .heading_deg()
            .map(|h| heading_error(h, final_pose.heading_deg)),
        in_motion_at_exit: controller.is_in_motion(),
    };

    info!("{}", report);

    report
}

/// Evaluate the policy's predicate, returning the outcome if it fires.
fn evaluate(
    policy: &WaitPolicy,
    stall: &mut StallTracker,
    pose: Pose,
    now: Duration,
    elapsed: Duration,
    min_time: Duration,
) -> Option<Outcome> {
    match *policy {
        WaitPolicy::Timeout => None,
        WaitPolicy::Stall { epsilon_in, window } => {
            stall.update(pose.point(), now, epsilon_in);

            if stall.is_stalled(now, window) {
                Some(Outcome::Stalled)
            } else {
                None
            }
        }
        WaitPolicy::StallNearTarget {
            epsilon_in,
            window,
            target,
            radius_in,
        } => {
            stall.update(pose.point(), now, epsilon_in);

            if pose.point().distance_to(&target) <= radius_in && stall.is_stalled(now, window) {
                Some(Outcome::StalledNearTarget)
            } else {
                None
            }
        }
        WaitPolicy::PoseConverge {
            target,
            heading_deg,
            distance_tol_in,
            heading_tol_deg,
        } => {
            let dist = pose.point().distance_to(&target);
            let herr = heading_error(heading_deg, pose.heading_deg).abs();

            if elapsed >= min_time && dist <= distance_tol_in && herr <= heading_tol_deg {
                Some(Outcome::Converged)
            } else {
                None
            }
        }
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => String::from("-"),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        motion::{DriveParams, NoSensors},
        sim::{SimBounds, SimClock, SimController, SimParams},
    };

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn run(ctrl: &mut SimController, clock: &SimClock, req: &WaitRequest) -> WaitReport {
        wait(ctrl, &NoSensors, clock, &SupervisorParams::default(), req)
    }

    #[test]
    fn test_stall_needs_movement() {
        let clock = SimClock::new();
        let mut ctrl = SimController::scripted(clock.clone(), |_| Pose::new(0.0, 0.0, 0.0));

        let req = WaitRequest::stalled("still", ms(1000), ms(200), 0.1);
        let report = run(&mut ctrl, &clock, &req);

        assert_eq!(report.outcome, Outcome::TimedOut);
        assert_eq!(report.elapsed, ms(1000));
        assert_eq!(ctrl.cancel_count(), 1);
    }

    #[test]
    fn test_stall_after_movement() {
        let clock = SimClock::new();
        let mut ctrl = SimController::scripted(clock.clone(), |t| {
            let t = t.as_millis().min(300) as f64;
            Pose::new(5.0 * t / 300.0, 0.0, 90.0)
        });

        let req = WaitRequest::stalled("push", ms(2000), ms(200), 0.1);
        let report = run(&mut ctrl, &clock, &req);

        assert_eq!(report.outcome, Outcome::Stalled);
        assert_eq!(report.elapsed, ms(500));
        assert_eq!(ctrl.cancel_count(), 1);
        assert!((report.final_pose.x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_converge_min_time() {
        let clock = SimClock::new();
        let mut ctrl = SimController::scripted(clock.clone(), |_| Pose::new(0.0, 0.0, 0.0));

        let target = RelativePoint::new(0.0, 0.0);
        let req = WaitRequest::pose_close("goal", ms(2000), target, 0.0, 1.0, 5.0)
            .with_min_time(ms(150));
        let report = run(&mut ctrl, &clock, &req);

        assert_eq!(report.outcome, Outcome::Converged);
        assert_eq!(report.elapsed, ms(150));
        assert_eq!(report.final_distance_in, Some(0.0));
        assert_eq!(report.final_heading_error_deg, Some(0.0));
    }

    #[test]
    fn test_converge_wraps_heading() {
        let clock = SimClock::new();
        let mut ctrl = SimController::scripted(clock.clone(), |_| Pose::new(0.5, 0.0, 358.0));

        let target = RelativePoint::new(0.0, 0.0);
        let req = WaitRequest::pose_close("wrap", ms(1000), target, 2.0, 1.0, 5.0);
        let report = run(&mut ctrl, &clock, &req);

        assert_eq!(report.outcome, Outcome::Converged);
        assert_eq!(report.elapsed, ms(10));
        assert!((report.final_heading_error_deg.unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_motion_ends() {
        let clock = SimClock::new();
        let mut ctrl = SimController::new(clock.clone(), SimParams::default());

        let target = RelativePoint::new(0.0, 30.0);
        ctrl.drive_to_point(target, ms(5000), &DriveParams::default());

        let req = WaitRequest::timeout("drive", ms(2000)).with_target(target);
        let report = run(&mut ctrl, &clock, &req);

        assert_eq!(report.outcome, Outcome::MotionEnded);
        assert!(!report.in_motion_at_exit);
        assert!(report.elapsed >= ms(480) && report.elapsed <= ms(520));
        assert!(report.final_distance_in.unwrap() < 0.01);
        assert_eq!(report.final_heading_error_deg, None);
        assert_eq!(ctrl.cancel_count(), 0);
    }

    #[test]
    fn test_stall_near_target_radius() {
        let bounds = SimBounds {
            min_x: -100.0,
            max_x: 100.0,
            min_y: -100.0,
            max_y: 20.0,
        };
        let target = RelativePoint::new(0.0, 24.0);

        let cases = [(6.0, Outcome::StalledNearTarget), (2.0, Outcome::TimedOut)];
        for (radius, expected) in cases.iter() {
            let clock = SimClock::new();
            let mut ctrl =
                SimController::new(clock.clone(), SimParams::default()).with_bounds(bounds);
            ctrl.drive_to_point(target, ms(5000), &DriveParams::default());

            let req =
                WaitRequest::stalled_near_target("wall", ms(1500), ms(200), 0.1, target, *radius);
            let report = run(&mut ctrl, &clock, &req);

            assert_eq!(report.outcome, *expected);
            assert_eq!(ctrl.cancel_count(), 1);
            assert!((report.final_distance_in.unwrap() - 4.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stall_far_from_target_ignored() {
        // A pause far from the target doesn't count as a stall near it
        let clock = SimClock::new();
        let mut ctrl = SimController::scripted(clock.clone(), |t| {
            let t = t.as_millis().min(200) as f64;
            Pose::new(0.0, t / 20.0, 0.0)
        });

        let target = RelativePoint::new(0.0, 40.0);
        let req = WaitRequest::stalled_near_target("pause", ms(800), ms(100), 0.1, target, 6.0);
        let report = run(&mut ctrl, &clock, &req);

        assert_eq!(report.outcome, Outcome::TimedOut);
        assert_eq!(report.elapsed, ms(800));
    }

    #[test]
    fn test_validate() {
        let req = WaitRequest::pose_close(
            "bad",
            ms(100),
            RelativePoint::new(std::f64::NAN, 0.0),
            0.0,
            1.0,
            1.0,
        );
        assert!(matches!(req.validate(), Err(AutoError::NonFinite(_))));

        let req = WaitRequest::timeout("bad", ms(100)).with_heading(std::f64::INFINITY);
        assert!(req.validate().is_err());

        assert!(WaitRequest::stalled("ok", ms(100), ms(10), 0.1).validate().is_ok());
    }

    #[test]
    fn test_report_display() {
        let report = WaitReport {
            label: String::from("cluster"),
            outcome: Outcome::StalledNearTarget,
            elapsed: ms(1234),
            final_pose: Pose::default(),
            final_distance_in: Some(1.5),
            final_heading_error_deg: None,
            in_motion_at_exit: true,
        };

        assert_eq!(
            report.to_string(),
            "WAIT [cluster]: 1234 ms stalled_near_target dist=1.50 hErr=- in_motion=true"
        );
    }

    #[test]
    fn test_tracer_once_per_period() {
        let clock = SimClock::new();
        let ctrl = SimController::scripted(clock.clone(), |t| {
            Pose::new(t.as_millis() as f64 / 100.0, 0.0, 0.0)
        });
        let req = WaitRequest::timeout("trace", ms(2000));
        let period = SupervisorParams::default().trace_period().unwrap();

        let mut tracer = Tracer::new(period, ctrl.pose(), None);
        let mut fired = Vec::new();

        while clock.now() < ms(1000) {
            clock.sleep(ms(10));
            let now = clock.now();
            if tracer.poll(now, ctrl.pose(), &req, &NoSensors) {
                fired.push(now);
            }
        }

        assert_eq!(fired, vec![ms(200), ms(400), ms(600), ms(800), ms(1000)]);
        assert!((tracer.last_pose.x - 10.0).abs() < 1e-9);
        assert_eq!(tracer.next, ms(1200));
    }

    #[test]
    fn test_tracer_skips_missed_periods() {
        let mut tracer = Tracer::new(ms(200), Pose::default(), None);
        let req = WaitRequest::timeout("trace", ms(2000));
        let pose = Pose::new(1.0, 2.0, 3.0);

        // A late poll fires once, then waits for the next whole period
        assert!(tracer.poll(ms(650), pose, &req, &NoSensors));
        assert_eq!(tracer.next, ms(800));
        assert_eq!(tracer.last_pose, pose);

        assert!(!tracer.poll(ms(790), pose, &req, &NoSensors));
        assert!(tracer.poll(ms(800), pose, &req, &NoSensors));
    }
}
