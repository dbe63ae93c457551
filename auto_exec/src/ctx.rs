//! # Autonomous run context
//!
//! [`AutoCtx`] owns everything a single autonomous run needs: the motion controller, sensors and
//! clock, the parameters, the active [`CoordinateContext`] and the side/alliance transform. Only
//! the run holding the context can re-anchor its coordinates, so the field origin has exactly one
//! writer for the whole run.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::{
    auto_tf::{Alliance, AutoTransform, Side},
    error::{ensure_finite, AutoError},
    frame::{CoordinateContext, FieldPoint, RelativePoint},
    motion::{Clock, MotionController, Pose, Sensors},
    params::AutoParams,
    supervisor::{self, WaitReport, WaitRequest},
};
use util::time::as_millis_u64;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Context of one autonomous run.
pub struct AutoCtx<C, S, K> {
    controller: C,
    sensors: S,
    clock: K,
    params: AutoParams,
    coords: CoordinateContext,
    transform: AutoTransform,

    /// Clock time the run started at.
    run_start: Duration,

    field_points: Vec<FieldPointRecord>,
}

/// A pose recorded in field coordinates during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPointRecord {
    pub label: String,
    pub elapsed_ms: u64,
    pub point: FieldPoint,
    pub heading_deg: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<C, S, K> AutoCtx<C, S, K>
where
    C: MotionController,
    S: Sensors,
    K: Clock,
{
    /// Create the context for a run from the given start.
    ///
    /// The field origin is selected from the start parameters for this side and alliance.
    pub fn new(
        controller: C,
        sensors: S,
        clock: K,
        params: AutoParams,
        side: Side,
        alliance: Alliance,
    ) -> Result<Self, AutoError> {
        let origin = params.start.origins().select(side, alliance);
        let coords = CoordinateContext::new(origin)?;
        let transform = AutoTransform::new(side, alliance);
        let run_start = clock.now();

        info!(
            "Autonomous context for {} start, origin ({:.2}, {:.2})",
            transform, origin.start_x, origin.start_y
        );

        Ok(Self {
            controller,
            sensors,
            clock,
            params,
            coords,
            transform,
            run_start,
            field_points: Vec::new(),
        })
    }

    // ---- ACCESSORS ----

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn params(&self) -> &AutoParams {
        &self.params
    }

    pub fn coords(&self) -> &CoordinateContext {
        &self.coords
    }

    pub fn transform(&self) -> AutoTransform {
        self.transform
    }

    /// Recorded field points, oldest first.
    pub fn field_points(&self) -> &[FieldPointRecord] {
        &self.field_points
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.run_start)
    }

    // ---- COORDINATES ----

    /// Convert raw field coordinates into the relative frame.
    pub fn relative(&self, field_x: f64, field_y: f64) -> RelativePoint {
        self.coords.relative(field_x, field_y)
    }

    /// Replace the coordinate context.
    pub fn set_coords(&mut self, coords: CoordinateContext) {
        info!(
            "Coordinates re-anchored, origin ({:.2}, {:.2}) -> ({:.2}, {:.2})",
            self.coords.origin().start_x,
            self.coords.origin().start_y,
            coords.origin().start_x,
            coords.origin().start_y
        );
        self.coords = coords;
    }

    /// Re-anchor so the robot's current pose is at `field`.
    ///
    /// Used after seating the robot against a known field feature, for example the loader.
    pub fn reanchor(&mut self, field: FieldPoint) -> Result<(), AutoError> {
        self.ensure_ready()?;
        ensure_finite("re-anchor point", &[field.x, field.y])?;

        let pose = self.controller.pose();
        let coords = CoordinateContext::anchored_at(field, pose.point())?;
        self.set_coords(coords);

        Ok(())
    }

    // ---- MOTION ----

    /// Return `Err(NotReady)` if the motion controller isn't ready.
    pub fn ensure_ready(&self) -> Result<(), AutoError> {
        if self.controller.is_ready() {
            Ok(())
        } else {
            warn!("Motion controller not ready, skipping");
            Err(AutoError::NotReady)
        }
    }

    /// Current pose in the relative frame.
    pub fn pose(&self) -> Pose {
        self.controller.pose()
    }

    /// Supervise the motion currently in flight.
    pub fn wait(&mut self, req: &WaitRequest) -> Result<WaitReport, AutoError> {
        self.ensure_ready()?;
        req.validate()?;

        Ok(supervisor::wait(
            &mut self.controller,
            &self.sensors,
            &self.clock,
            &self.params.supervisor,
            req,
        ))
    }

    // ---- DIAGNOSTICS ----

    /// Log the time since the run started.
    pub fn log_elapsed(&self, label: &str) {
        info!("AUTO [{}]: {} ms elapsed", label, as_millis_u64(self.elapsed()));
    }

    /// Log the current pose in field coordinates.
    pub fn log_field_pose(&self, label: &str) {
        let pose = self.controller.pose();
        let field = self.coords.to_field(pose.point());

        info!(
            "POSE [{}]: {} heading={:.1} (rel {})",
            label,
            field,
            pose.heading(),
            pose
        );
    }

    /// Log a relative target in field coordinates.
    pub fn log_field_target(&self, label: &str, target: RelativePoint) {
        info!(
            "TARGET [{}]: {} (rel {})",
            label,
            self.coords.to_field(target),
            target
        );
    }

    /// Record the current pose in field coordinates.
    pub fn record_field_point(&mut self, label: &str) {
        let pose = self.controller.pose();

        self.field_points.push(FieldPointRecord {
            label: label.into(),
            elapsed_ms: as_millis_u64(self.elapsed()),
            point: self.coords.to_field(pose.point()),
            heading_deg: pose.heading(),
        });
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        motion::DriveParams,
        sim::{SimClock, SimController, SimSensors},
        supervisor::Outcome,
    };

    type SimCtx = AutoCtx<SimController, SimSensors, SimClock>;

    fn ctx(side: Side, alliance: Alliance) -> SimCtx {
        let clock = SimClock::new();
        let ctrl = SimController::new(clock.clone(), Default::default());
        let sensors = ctrl.sensors();
        AutoCtx::new(ctrl, sensors, clock, AutoParams::default(), side, alliance).unwrap()
    }

    #[test]
    fn test_origin_selection() {
        let c = ctx(Side::Right, Alliance::Red);
        assert_eq!(c.coords().origin().start_y, -13.0);

        let c = ctx(Side::Right, Alliance::Blue);
        assert_eq!(c.coords().origin().start_y, 13.0);
    }

    #[test]
    fn test_wait_not_ready() {
        let mut c = ctx(Side::Left, Alliance::Red);
        c.controller().set_ready(false);

        let req = WaitRequest::timeout("nothing", Duration::from_millis(100));
        assert!(matches!(c.wait(&req), Err(AutoError::NotReady)));

        // Nothing slept, nothing cancelled
        assert_eq!(c.elapsed(), Duration::from_millis(0));
        assert_eq!(c.controller().cancel_count(), 0);
    }

    #[test]
    fn test_reanchor_and_record() {
        let mut c = ctx(Side::Left, Alliance::Red);

        let target = c.relative(-21.0, 21.0);
        c.controller_mut()
            .drive_to_point(target, Duration::from_secs(5), &DriveParams::default());
        let report = c
            .wait(&WaitRequest::timeout("cluster", Duration::from_secs(2)).with_target(target))
            .unwrap();
        assert_eq!(report.outcome, Outcome::MotionEnded);

        c.record_field_point("cluster");
        let rec = &c.field_points()[0];
        assert!((rec.point.x + 21.0).abs() < 1e-9);
        assert!((rec.point.y - 21.0).abs() < 1e-9);
        assert_eq!(rec.elapsed_ms, report.elapsed_ms());

        // The robot is really 2in further along field X than odometry thinks
        c.reanchor(FieldPoint::new(-19.0, 21.0)).unwrap();
        let here = c.coords().to_field(c.pose().point());
        assert!((here.x + 19.0).abs() < 1e-9);
        assert!((here.y - 21.0).abs() < 1e-9);
        assert!((c.coords().origin().start_x + 44.6).abs() < 1e-9);
    }

    #[test]
    fn test_reanchor_rejects_nan() {
        let mut c = ctx(Side::Left, Alliance::Red);
        let before = *c.coords();

        assert!(matches!(
            c.reanchor(FieldPoint::new(std::f64::NAN, 0.0)),
            Err(AutoError::NonFinite(_))
        ));
        assert_eq!(*c.coords(), before);
    }
}
