//! # Simulated motion controller
//!
//! An idealised stand-in for the real drivetrain controller, used by the executable's demo
//! routine and by the tests. Two modes are provided:
//!
//! - Kinematic: commanded drives move in a straight line towards the target at a fixed speed
//!   (scaled by the command's `max_speed`), and turns rotate at a fixed rate. Optional walls stop
//!   the robot while the controller still reports motion, which is how a stall looks on the real
//!   robot.
//! - Scripted: the pose is a function of time and the controller reports motion until cancelled.
//!
//! Time comes from a [`SimClock`], which only advances when something sleeps on it, so every
//! timing in a simulated run is deterministic.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use log::debug;
use serde::Deserialize;

use crate::{
    auto_tf::AutoTransform,
    frame::{
        heading_error, heading_to, normalize_heading, offset_along_heading, CoordinateContext,
        FieldPoint, RelativePoint,
    },
    motion::{Clock, DriveParams, MotionController, Pose, Sensors, TurnDirection, TurnParams},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Command value at which the simulated robot moves at its full speed.
const FULL_COMMAND: f64 = 127.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulation clock shared between the simulator and whatever is waiting on it.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<Duration>>,
}

/// Parameters of the simulated robot.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Speed when driving at full command.
    ///
    /// Units: inches/second
    pub linear_speed_in_s: f64,

    /// Turn rate at full command.
    ///
    /// Units: degrees/second
    pub turn_rate_deg_s: f64,

    /// A drive ends once within this distance of its stopping point.
    ///
    /// Units: inches
    pub arrive_tolerance_in: f64,

    /// A turn ends once within this angle of its target.
    ///
    /// Units: degrees
    pub heading_tolerance_deg: f64,

    /// Half width of the square field, used to place walls around the field.
    ///
    /// Units: inches
    pub field_half_width_in: Option<f64>,
}

/// Axis aligned walls in the start-relative frame, bounding the robot's pose point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// A command received by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    DriveToPoint {
        target: RelativePoint,
        timeout: Duration,
        params: DriveParams,
    },
    DriveToPose {
        target: RelativePoint,
        heading_deg: f64,
        timeout: Duration,
        params: DriveParams,
    },
    TurnToHeading {
        heading_deg: f64,
        timeout: Duration,
        params: TurnParams,
    },
}

/// The simulated motion controller.
pub struct SimController {
    inner: Rc<SimInner>,
}

/// Simulated sensors, reading the state of the [`SimController`] they were made from.
pub struct SimSensors {
    inner: Rc<SimInner>,
}

type Script = Box<dyn Fn(Duration) -> Pose>;

struct SimInner {
    clock: SimClock,
    params: SimParams,
    bounds: Cell<Option<SimBounds>>,
    script: Option<Script>,
    state: RefCell<SimState>,
}

struct SimState {
    ready: bool,
    pose: Pose,
    last_update: Duration,
    motion: Option<ActiveMotion>,
    scripted_in_motion: bool,
    pending_early_stop_in: Option<f64>,
    commands: Vec<SimCommand>,
    cancel_count: usize,
    rotation_deg: f64,
    wheel_in: f64,
}

#[derive(Debug, Clone, Copy)]
struct ActiveMotion {
    kind: MotionKind,
    deadline: Duration,
    speed_scale: f64,
}

#[derive(Debug, Clone, Copy)]
enum MotionKind {
    Drive {
        target: RelativePoint,
        final_heading_deg: Option<f64>,
        forwards: bool,
        stop_short_in: f64,
    },
    Turn {
        heading_deg: f64,
        direction: TurnDirection,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration)
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            linear_speed_in_s: 60.0,
            turn_rate_deg_s: 360.0,
            arrive_tolerance_in: 0.25,
            heading_tolerance_deg: 1.0,
            field_half_width_in: None,
        }
    }
}

impl SimBounds {
    /// Walls of a square field of half width `half_width_in` centred on the field origin, inset
    /// by `margin_in` so the pose point stops where the bumper would touch.
    pub fn around_field(coords: &CoordinateContext, half_width_in: f64, margin_in: f64) -> Self {
        let h = half_width_in - margin_in;

        Self::from_corners(
            coords.to_relative(FieldPoint::new(-h, -h)),
            coords.to_relative(FieldPoint::new(h, h)),
        )
    }

    /// Bounds spanning two opposite corners.
    pub fn from_corners(a: RelativePoint, b: RelativePoint) -> Self {
        Self {
            min_x: a.x.min(b.x),
            max_x: a.x.max(b.x),
            min_y: a.y.min(b.y),
            max_y: a.y.max(b.y),
        }
    }

    /// The same walls after mapping through an auto transform.
    pub fn transformed(&self, transform: &AutoTransform) -> Self {
        Self::from_corners(
            transform.point(RelativePoint::new(self.min_x, self.min_y)),
            transform.point(RelativePoint::new(self.max_x, self.max_y)),
        )
    }

    fn clamp(&self, p: RelativePoint) -> RelativePoint {
        RelativePoint::new(
            util::maths::clamp(p.x, self.min_x, self.max_x),
            util::maths::clamp(p.y, self.min_y, self.max_y),
        )
    }
}

impl SimController {
    /// A kinematic simulator starting at the relative origin facing 0°.
    pub fn new(clock: SimClock, params: SimParams) -> Self {
        Self::build(clock, params, None)
    }

    /// A scripted simulator whose pose is `script(now)`.
    pub fn scripted<F>(clock: SimClock, script: F) -> Self
    where
        F: Fn(Duration) -> Pose + 'static,
    {
        Self::build(clock, SimParams::default(), Some(Box::new(script)))
    }

    fn build(clock: SimClock, params: SimParams, script: Option<Script>) -> Self {
        let now = clock.now();
        let pose = match script {
            Some(ref s) => s(now),
            None => Pose::default(),
        };

        Self {
            inner: Rc::new(SimInner {
                clock,
                params,
                bounds: Cell::new(None),
                script,
                state: RefCell::new(SimState {
                    ready: true,
                    pose,
                    last_update: now,
                    motion: None,
                    scripted_in_motion: true,
                    pending_early_stop_in: None,
                    commands: Vec::new(),
                    cancel_count: 0,
                    rotation_deg: pose.heading_deg,
                    wheel_in: 0.0,
                }),
            }),
        }
    }

    pub fn with_bounds(self, bounds: SimBounds) -> Self {
        self.inner.bounds.set(Some(bounds));
        self
    }

    /// Teleport the robot. Any motion in flight is dropped.
    pub fn with_pose(self, pose: Pose) -> Self {
        {
            let mut state = self.inner.state.borrow_mut();
            state.pose = pose;
            state.rotation_deg = pose.heading_deg;
            state.motion = None;
        }
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.state.borrow_mut().ready = ready;
    }

    /// Make the next drive end by itself `distance_in` short of its target.
    pub fn inject_early_stop(&self, distance_in: f64) {
        self.inner.state.borrow_mut().pending_early_stop_in = Some(distance_in);
    }

    /// All commands received so far, oldest first.
    pub fn commands(&self) -> Vec<SimCommand> {
        self.inner.state.borrow().commands.clone()
    }

    /// Number of times the motions have been cancelled.
    pub fn cancel_count(&self) -> usize {
        self.inner.state.borrow().cancel_count
    }

    /// Sensors reading this simulator's state.
    pub fn sensors(&self) -> SimSensors {
        SimSensors {
            inner: self.inner.clone(),
        }
    }

    fn start_motion(
        &mut self,
        command: SimCommand,
        kind: MotionKind,
        timeout: Duration,
        max_speed: f64,
    ) {
        self.inner.update();

        let now = self.inner.clock.now();
        let mut state = self.inner.state.borrow_mut();

        debug!("Sim command: {:?}", command);
        state.commands.push(command);

        let kind = match kind {
            MotionKind::Drive {
                target,
                final_heading_deg,
                forwards,
                stop_short_in,
            } => MotionKind::Drive {
                target,
                final_heading_deg,
                forwards,
                stop_short_in: stop_short_in
                    .max(state.pending_early_stop_in.take().unwrap_or(0.0)),
            },
            k => k,
        };

        state.motion = Some(ActiveMotion {
            kind,
            deadline: now + timeout,
            speed_scale: (max_speed / FULL_COMMAND).max(0.0).min(1.0),
        });
        state.scripted_in_motion = true;
    }
}

impl MotionController for SimController {
    fn is_ready(&self) -> bool {
        self.inner.state.borrow().ready
    }

    fn drive_to_point(&mut self, target: RelativePoint, timeout: Duration, params: &DriveParams) {
        self.start_motion(
            SimCommand::DriveToPoint {
                target,
                timeout,
                params: *params,
            },
            MotionKind::Drive {
                target,
                final_heading_deg: None,
                forwards: params.forwards,
                stop_short_in: params.early_exit_range_in,
            },
            timeout,
            params.max_speed,
        )
    }

    fn drive_to_pose(
        &mut self,
        target: RelativePoint,
        heading_deg: f64,
        timeout: Duration,
        params: &DriveParams,
    ) {
        self.start_motion(
            SimCommand::DriveToPose {
                target,
                heading_deg,
                timeout,
                params: *params,
            },
            MotionKind::Drive {
                target,
                final_heading_deg: Some(heading_deg),
                forwards: params.forwards,
                stop_short_in: params.early_exit_range_in,
            },
            timeout,
            params.max_speed,
        )
    }

    fn turn_to_heading(&mut self, heading_deg: f64, timeout: Duration, params: &TurnParams) {
        self.start_motion(
            SimCommand::TurnToHeading {
                heading_deg,
                timeout,
                params: *params,
            },
            MotionKind::Turn {
                heading_deg,
                direction: params.direction,
            },
            timeout,
            params.max_speed,
        )
    }

    fn cancel_all_motions(&mut self) {
        self.inner.update();

        let mut state = self.inner.state.borrow_mut();
        state.motion = None;
        state.scripted_in_motion = false;
        state.cancel_count += 1;
    }

    fn pose(&self) -> Pose {
        self.inner.update();
        self.inner.state.borrow().pose
    }

    fn is_in_motion(&self) -> bool {
        self.inner.update();

        let state = self.inner.state.borrow();
        match self.inner.script {
            Some(_) => state.scripted_in_motion,
            None => state.motion.is_some(),
        }
    }
}

impl Sensors for SimSensors {
    fn inertial_heading_deg(&self) -> Option<f64> {
        self.inner.update();
        Some(normalize_heading(self.inner.state.borrow().pose.heading_deg))
    }

    fn inertial_rotation_deg(&self) -> Option<f64> {
        self.inner.update();
        Some(self.inner.state.borrow().rotation_deg)
    }

    fn tracking_wheel_distance_in(&self) -> Option<f64> {
        self.inner.update();
        Some(self.inner.state.borrow().wheel_in)
    }
}

impl SimInner {
    /// Bring the simulated state up to the clock's current time.
    fn update(&self) {
        let now = self.clock.now();
        let mut state = self.state.borrow_mut();

        if let Some(ref script) = self.script {
            let pose = script(now);
            state.track(pose, true);
            state.pose = pose;
            state.last_update = now;
            return;
        }

        let deadline = state.motion.map(|m| m.deadline);
        let end = match deadline {
            Some(d) if d < now => d,
            _ => now,
        };

        let dt = end.saturating_sub(state.last_update).as_secs_f64();
        if dt > 0.0 {
            state.step(dt, &self.params, self.bounds.get());
        }

        if let Some(d) = deadline {
            if d <= now && state.motion.is_some() {
                debug!("Sim motion reached its timeout");
                state.motion = None;
            }
        }

        state.last_update = now;
    }
}

impl SimState {
    fn step(&mut self, dt: f64, params: &SimParams, bounds: Option<SimBounds>) {
        let motion = match self.motion {
            Some(m) => m,
            None => return,
        };

        match motion.kind {
            MotionKind::Drive {
                target,
                final_heading_deg,
                forwards,
                stop_short_in,
            } => {
                let here = self.pose.point();
                let remaining = here.distance_to(&target);

                if remaining > stop_short_in {
                    let mut facing = heading_to(&here, &target);
                    if !forwards {
                        facing = normalize_heading(facing + 180.0);
                    }
                    self.set_heading(facing);

                    let travel = (params.linear_speed_in_s * motion.speed_scale * dt)
                        .min(remaining - stop_short_in);
                    let travel_heading = heading_to(&here, &target);
                    let mut next = offset_along_heading(here, travel_heading, travel);
                    if let Some(b) = bounds {
                        next = b.clamp(next);
                    }

                    let moved = here.distance_to(&next);
                    self.wheel_in += if forwards { moved } else { -moved };
                    self.pose.x = next.x;
                    self.pose.y = next.y;
                }

                let remaining = self.pose.point().distance_to(&target);
                if remaining <= stop_short_in + params.arrive_tolerance_in {
                    if stop_short_in <= 0.0 && bounds.map_or(true, |b| b.clamp(target) == target) {
                        self.pose.x = target.x;
                        self.pose.y = target.y;
                    }
                    if let Some(h) = final_heading_deg {
                        self.set_heading(h);
                    }
                    self.motion = None;
                }
            }
            MotionKind::Turn {
                heading_deg,
                direction,
            } => {
                let err = match direction {
                    TurnDirection::Auto => heading_error(heading_deg, self.pose.heading_deg),
                    TurnDirection::Clockwise => {
                        normalize_heading(heading_deg - self.pose.heading_deg)
                    }
                    TurnDirection::CounterClockwise => {
                        -normalize_heading(self.pose.heading_deg - heading_deg)
                    }
                };
                let max_step = params.turn_rate_deg_s * motion.speed_scale * dt;

                if err.abs() <= max_step || err.abs() <= params.heading_tolerance_deg {
                    self.rotate_by(err);
                    self.motion = None;
                } else {
                    self.rotate_by(max_step * err.signum());
                }
            }
        }
    }

    fn set_heading(&mut self, heading_deg: f64) {
        let mut pose = self.pose;
        pose.heading_deg = normalize_heading(heading_deg);
        self.track(pose, false);
        self.pose.heading_deg = pose.heading_deg;
    }

    fn rotate_by(&mut self, delta_deg: f64) {
        self.rotation_deg += delta_deg;
        self.pose.heading_deg = normalize_heading(self.pose.heading_deg + delta_deg);
    }

    /// Accumulate rotation, and wheel distance when the pose jumps, between the current and next
    /// pose.
    fn track(&mut self, next: Pose, include_distance: bool) {
        self.rotation_deg += heading_error(next.heading_deg, self.pose.heading_deg);
        if include_distance {
            self.wheel_in += self.pose.point().distance_to(&next.point());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::FieldOrigin;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_drive_and_turn() {
        let clock = SimClock::new();
        let mut sim = SimController::new(clock.clone(), SimParams::default());
        let sensors = sim.sensors();

        sim.drive_to_point(RelativePoint::new(30.0, 0.0), ms(5000), &DriveParams::default());
        assert!(sim.is_in_motion());

        clock.advance(ms(250));
        let p = sim.pose();
        assert!((p.x - 15.0).abs() < 1e-9);
        assert!((p.heading_deg - 90.0).abs() < 1e-9);

        clock.advance(ms(300));
        assert!(!sim.is_in_motion());
        assert_eq!(sim.pose().point(), RelativePoint::new(30.0, 0.0));
        assert!((sensors.tracking_wheel_distance_in().unwrap() - 30.0).abs() < 1e-9);

        sim.turn_to_heading(0.0, ms(1000), &TurnParams::default());
        clock.advance(ms(500));
        assert!(!sim.is_in_motion());
        assert!(sim.pose().heading_deg.abs() < 1e-9);

        // Turned right 90 then back left 90
        assert!(sensors.inertial_rotation_deg().unwrap().abs() < 1e-9);
        assert_eq!(sim.commands().len(), 2);
    }

    #[test]
    fn test_backwards_drive() {
        let clock = SimClock::new();
        let mut sim = SimController::new(clock.clone(), SimParams::default());

        sim.drive_to_point(RelativePoint::new(0.0, -12.0), ms(5000), &DriveParams::backwards());
        clock.advance(ms(1000));

        let p = sim.pose();
        assert_eq!(p.point(), RelativePoint::new(0.0, -12.0));
        assert!(p.heading_deg.abs() < 1e-9);
        assert!((sim.sensors().tracking_wheel_distance_in().unwrap() + 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_and_cancel() {
        let clock = SimClock::new();
        let mut sim = SimController::new(clock.clone(), SimParams::default());

        sim.drive_to_point(RelativePoint::new(0.0, 100.0), ms(500), &DriveParams::default());
        clock.advance(ms(1000));

        // Stopped at the deadline, not the advanced time
        assert!(!sim.is_in_motion());
        assert!((sim.pose().y - 30.0).abs() < 1e-9);

        sim.drive_to_point(RelativePoint::new(0.0, 100.0), ms(5000), &DriveParams::default());
        clock.advance(ms(100));
        sim.cancel_all_motions();
        clock.advance(ms(100));
        assert!(!sim.is_in_motion());
        assert!((sim.pose().y - 36.0).abs() < 1e-9);
        assert_eq!(sim.cancel_count(), 1);
    }

    #[test]
    fn test_early_stop() {
        let clock = SimClock::new();
        let mut sim = SimController::new(clock.clone(), SimParams::default());

        sim.inject_early_stop(5.0);
        sim.drive_to_point(RelativePoint::new(0.0, 20.0), ms(5000), &DriveParams::default());
        clock.advance(ms(1000));
        assert!(!sim.is_in_motion());
        assert!((sim.pose().y - 15.0).abs() < 1e-9);

        // Only applies once
        sim.drive_to_point(RelativePoint::new(0.0, 20.0), ms(5000), &DriveParams::default());
        clock.advance(ms(1000));
        assert_eq!(sim.pose().point(), RelativePoint::new(0.0, 20.0));
    }

    #[test]
    fn test_walls() {
        let coords = CoordinateContext::new(FieldOrigin::new(-46.6, 13.0)).unwrap();
        let bounds = SimBounds::around_field(&coords, 72.0, 7.5);

        // Field x = 64.5 is 111.1 in ahead of the start
        assert!((bounds.max_y - 111.1).abs() < 1e-9);
        assert!((bounds.min_y + 17.9).abs() < 1e-9);

        let clock = SimClock::new();
        let mut sim = SimController::new(clock.clone(), SimParams::default()).with_bounds(bounds);
        sim.drive_to_point(RelativePoint::new(0.0, -40.0), ms(3000), &DriveParams::backwards());

        clock.advance(ms(2000));
        assert!(sim.is_in_motion());
        assert!((sim.pose().y + 17.9).abs() < 1e-9);

        clock.advance(ms(1000));
        assert!(!sim.is_in_motion());
    }

    #[test]
    fn test_transformed_bounds() {
        use crate::auto_tf::{Alliance, Side};

        let bounds = SimBounds {
            min_x: -10.0,
            max_x: 20.0,
            min_y: -5.0,
            max_y: 100.0,
        };

        let left = bounds.transformed(&AutoTransform::new(Side::Left, Alliance::Red));
        assert_eq!((left.min_x, left.max_x, left.min_y, left.max_y), (-20.0, 10.0, -5.0, 100.0));

        let blue = bounds.transformed(&AutoTransform::new(Side::Right, Alliance::Blue));
        assert_eq!((blue.min_x, blue.max_x, blue.min_y, blue.max_y), (-20.0, 10.0, -100.0, 5.0));
    }

    #[test]
    fn test_directional_turn() {
        let clock = SimClock::new();
        let mut sim = SimController::new(clock.clone(), SimParams::default());
        let sensors = sim.sensors();

        let params = TurnParams {
            direction: TurnDirection::CounterClockwise,
            ..Default::default()
        };
        sim.turn_to_heading(90.0, ms(2000), &params);
        clock.advance(ms(2000));

        assert!((sim.pose().heading_deg - 90.0).abs() < 1e-9);
        assert!((sensors.inertial_rotation_deg().unwrap() + 270.0).abs() < 1e-6);
    }
}
