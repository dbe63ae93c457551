//! Autonomy core parameters
//!
//! Loaded from `auto_exec.toml`. Every section and field has a default, so a partial file only
//! overrides what it names.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{
    auto_tf::StartOrigins,
    error::AutoError,
    frame::FieldOrigin,
    primitives::RetryPolicy,
    supervisor::SupervisorParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the autonomy core.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutoParams {
    pub supervisor: SupervisorParams,

    pub retry: RetryPolicy,

    pub robot: RobotParams,

    pub start: StartParams,

    pub speeds: SpeedParams,
}

/// Robot geometry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RobotParams {
    /// Distance from the pose reference point to the front bumper face.
    ///
    /// Units: inches
    pub front_bumper_in: f64,

    /// Distance from the pose reference point to the back bumper face.
    ///
    /// Units: inches
    pub back_bumper_in: f64,
}

/// Start square geometry.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct StartParams {
    /// Field X of the canonical red-left start origin.
    ///
    /// Units: inches
    pub red_left_x: f64,

    /// Field Y of the canonical red-left start origin.
    ///
    /// Units: inches
    pub red_left_y: f64,

    /// Fine adjustment added to the measured start X, after placement testing.
    pub fine_adjust_x: f64,

    /// Fine adjustment added to the measured start Y.
    pub fine_adjust_y: f64,
}

/// Default command speeds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpeedParams {
    pub max_speed: f64,
    pub turn_max_speed: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AutoParams {
    /// Load from `auto_exec.toml` in the params directory.
    pub fn load() -> Result<Self, AutoError> {
        util::params::load("auto_exec.toml").map_err(AutoError::ParamLoadError)
    }
}

impl Default for RobotParams {
    fn default() -> Self {
        Self {
            front_bumper_in: 7.5,
            back_bumper_in: 7.5,
        }
    }
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            red_left_x: -46.6,
            red_left_y: 13.0,
            fine_adjust_x: 0.0,
            fine_adjust_y: 0.0,
        }
    }
}

impl StartParams {
    /// The field origins of both start squares, with fine adjustments applied.
    ///
    /// The Y adjustment is mirrored along with the origin for the right-hand square.
    pub fn origins(&self) -> StartOrigins {
        StartOrigins::from_red_left(FieldOrigin::new(
            self.red_left_x + self.fine_adjust_x,
            self.red_left_y + self.fine_adjust_y,
        ))
    }
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            max_speed: 127.0,
            turn_max_speed: 127.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::auto_tf::{Alliance, Side};

    #[test]
    fn test_partial_params() {
        let p: AutoParams = util::params::from_str(
            "[retry]\nmax_attempts = 2\n\n[start]\nfine_adjust_y = 0.5\n",
        )
        .unwrap();

        assert_eq!(p.retry.max_attempts, 2);
        assert_eq!(p.retry.trigger_distance_in, 3.0);
        assert_eq!(p.supervisor, SupervisorParams::default());
        assert_eq!(p.robot.front_bumper_in, 7.5);

        let origins = p.start.origins();
        assert_eq!(origins.select(Side::Left, Alliance::Red), FieldOrigin::new(-46.6, 13.5));
        assert_eq!(origins.select(Side::Right, Alliance::Red), FieldOrigin::new(-46.6, -13.5));
    }

    #[test]
    fn test_params_file() {
        let path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../params/auto_exec.toml");
        let p: AutoParams = util::params::load_from(path).unwrap();

        assert_eq!(p.supervisor.poll_interval_ms, 10);
        assert_eq!(p.start.red_left_x, -46.6);
        assert_eq!(p.speeds.max_speed, 127.0);
    }
}
