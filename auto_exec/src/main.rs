//! Autonomous routine executable, run against the simulated drivetrain.
//!
//! # Usage
//!
//!     auto_exec [<left|right> <red|blue>]
//!
//! With no arguments the red left start is used.
//!
//! # Architecture
//!
//! The execution consists of:
//!
//!     - Initialise the session and logger
//!     - Load the autonomy and simulator parameters
//!     - Build the simulated controller, with walls around the field if configured
//!     - Run the demonstration routine:
//!         - Turn-drive-turn to the cluster
//!         - Approach the low goal, supervised by pose convergence, with a retry
//!         - Back away to the loader lane
//!         - Push into the loader until stalled, then re-anchor on it
//!         - Back out of the loader
//!     - Save the recorded field points and wait reports into the session
//!
//! Routine targets are authored in field coordinates for the red right start square and mapped
//! onto the requested start by the auto transform.

// ------------------------------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ------------------------------------------------------------------------------------------------

use auto_lib::{
    frame::{heading_to, pose_from_front_contact},
    motion::{Clock, DriveParams, MotionController, Sensors, TurnParams},
    params::AutoParams,
    primitives::{DriveWait, StallExit, TurnDriveTurn, DEFAULT_TURN_TIMEOUT},
    sim::{SimBounds, SimClock, SimController, SimParams},
    supervisor::TRACE_TARGET,
    *,
};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{info, warn};
use std::{env, time::Duration};

// Internal
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Field position of the ring cluster.
const CLUSTER_FIELD: (f64, f64) = (-21.0, -21.0);

/// Field position the front bumper touches at the low goal.
const LOW_GOAL_CONTACT_FIELD: (f64, f64) = (-8.3, -9.7);

/// Field position of the loader lane.
const LOADER_LANE_FIELD: (f64, f64) = (-48.0, -48.0);

/// Field position of the loader face.
const LOADER_FIELD: (f64, f64) = (-72.0, -48.0);

/// Motion timeout for the low goal approach.
const LOW_GOAL_MOTION_TIMEOUT: Duration = Duration::from_millis(9000);

/// How far to push towards the loader before giving up on contact.
///
/// Units: inches
const LOADER_PUSH_DISTANCE_IN: f64 = 30.0;

/// Max speed while pushing into the loader.
const LOADER_PUSH_SPEED: f64 = 80.0;

/// Distance backed out of the loader.
///
/// Units: inches
const LOADER_BACKOUT_IN: f64 = 12.0;

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    let (side, alliance) = parse_start(env::args().skip(1).collect())?;

    let session = Session::new("auto_exec", "sessions")
        .wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &[TRACE_TARGET], &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Autonomous Executable\n");
    info!("Software root: {:?}", util::host::get_sw_root());
    info!("Start: {} {}", side, alliance);

    // ---- LOAD PARAMETERS ----

    let params = AutoParams::load().wrap_err("Could not load autonomy params")?;
    let sim_params: SimParams =
        util::params::load("sim.toml").wrap_err("Could not load simulator params")?;

    info!("Parameters loaded");

    // ---- INITIALISE SIMULATION ----

    let transform = AutoTransform::new(side, alliance);
    let canonical = CoordinateContext::new(params.start.origins().red_right)
        .wrap_err("Invalid start origin")?;

    let clock = SimClock::new();
    let mut controller = SimController::new(clock.clone(), sim_params.clone());

    match sim_params.field_half_width_in {
        Some(half_width) => {
            let bounds = SimBounds::around_field(
                &canonical,
                half_width,
                params.robot.front_bumper_in,
            )
            .transformed(&transform);
            info!("Simulated walls: {:?}", bounds);
            controller = controller.with_bounds(bounds);
        }
        None => warn!("No field width given, simulating without walls"),
    }

    let sensors = controller.sensors();

    let mut ctx = AutoCtx::new(controller, sensors, clock, params, side, alliance)
        .wrap_err("Failed to create the autonomous context")?;

    // ---- RUN ----

    let reports = run_routine(&mut ctx, &canonical).wrap_err("Autonomous routine failed")?;

    ctx.log_elapsed("auto_end");
    info!("Final field position: {}", ctx.field_position());
    info!("{} motions supervised", reports.len());

    session.save("field_points.json", ctx.field_points().to_vec());
    session.save("wait_reports.json", reports);

    session.exit();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse the side and alliance from the command line arguments.
fn parse_start(args: Vec<String>) -> Result<(Side, Alliance), Report> {
    match args.as_slice() {
        [] => Ok((Side::Left, Alliance::Red)),
        [side, alliance] => Ok((
            side.parse().wrap_err("Invalid side")?,
            alliance.parse().wrap_err("Invalid alliance")?,
        )),
        _ => Err(eyre!("Expected no arguments or `<left|right> <red|blue>`")),
    }
}

/// Run the demonstration routine, returning the report of every supervised motion.
fn run_routine<C, S, K>(
    ctx: &mut AutoCtx<C, S, K>,
    canonical: &CoordinateContext,
) -> Result<Vec<WaitReport>, AutoError>
where
    C: MotionController,
    S: Sensors,
    K: Clock,
{
    let transform = ctx.transform();
    let target = |(x, y): (f64, f64)| transform.point(canonical.relative(x, y));

    let turn_params = TurnParams {
        max_speed: ctx.params().speeds.turn_max_speed,
        ..Default::default()
    };

    let mut reports = Vec::new();

    ctx.record_field_point("start");
    ctx.log_field_pose("start");

    // ---- CLUSTER ----

    let cluster = target(CLUSTER_FIELD);
    reports.extend(
        ctx.turn_drive_to(&TurnDriveTurn::new("cluster", cluster).with_turn_params(turn_params))?
            .into_stages(),
    );
    ctx.record_field_point("cluster");
    ctx.log_elapsed("cluster");

    // ---- LOW GOAL ----

    let contact = target(LOW_GOAL_CONTACT_FIELD);
    let goal_heading = heading_to(&ctx.pose().point(), &contact);
    let bumper_in = ctx.params().robot.front_bumper_in;
    let goal_pose = pose_from_front_contact(contact, goal_heading, bumper_in);

    let approach = TurnDriveTurn::new("low_goal", goal_pose)
        .with_final_heading(goal_heading)
        .with_turn_params(turn_params)
        .with_timeouts(DEFAULT_TURN_TIMEOUT, LOW_GOAL_MOTION_TIMEOUT)
        .with_drive_wait(DriveWait::PoseClose {
            wait_timeout: Duration::from_millis(1900),
            min_time: Duration::from_millis(400),
            distance_tol_in: 1.25,
            heading_tol_deg: 6.0,
        });

    let report = ctx.turn_drive_to(&approach)?;
    if let Some(dist) = report.final_distance_in() {
        info!("low_goal: seated {:.2} in from the goal pose", dist);
    }
    reports.extend(report.into_stages());
    ctx.record_field_point("low_goal");
    ctx.log_elapsed("low_goal");

    // ---- LOADER LANE ----

    let lane = target(LOADER_LANE_FIELD);
    let loader = target(LOADER_FIELD);
    let retreat = TurnDriveTurn::new("loader_lane", lane)
        .with_drive_params(DriveParams::backwards())
        .with_turn_params(turn_params)
        .with_drive_wait(DriveWait::MotionTimeout)
        .with_final_heading(heading_to(&lane, &loader));

    reports.extend(ctx.turn_drive_to(&retreat)?.into_stages());
    ctx.log_field_pose("loader_lane");

    // ---- LOADER ----

    let push = ctx.drive_relative_stall_exit(
        "loader_push",
        LOADER_PUSH_DISTANCE_IN,
        Duration::from_millis(2000),
        true,
        StallExit::default(),
        LOADER_PUSH_SPEED,
    )?;
    info!("loader_push: {}", push.outcome);
    reports.push(push);

    // Seated against the loader, so the pose is known exactly
    let (loader_x, loader_y) = LOADER_FIELD;
    let seated = target((loader_x + ctx.params().robot.front_bumper_in, loader_y));
    let seated_field = ctx.coords().to_field(seated);
    ctx.reanchor(seated_field)?;
    ctx.record_field_point("loader");
    ctx.log_elapsed("loader");

    reports.push(ctx.drive_relative(
        "loader_backout",
        LOADER_BACKOUT_IN,
        Duration::from_millis(1500),
        false,
    )?);
    ctx.record_field_point("loader_backout");

    Ok(reports)
}
