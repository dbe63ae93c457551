//! # Autonomy core library
//!
//! Pose transforms and motion supervision for the match autonomous routines. Routines author their
//! targets in absolute field coordinates, resolve them into the start-relative odometry frame,
//! mirror/rotate them for the active side and alliance, and hand them to an external motion
//! controller. The supervisor then decides when each motion is done.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Auto transform composer - maps canonical tuning onto the requested side and alliance
pub mod auto_tf;

/// Per-run autonomous context
pub mod ctx;

/// Errors raised by the autonomy core
pub mod error;

/// Frame transforms between the field and start-relative frames
pub mod frame;

/// Interfaces to the external motion controller, sensors and time source
pub mod motion;

/// Autonomy core parameters
pub mod params;

/// Compound motion primitives (turn-drive-turn, relative drives)
pub mod primitives;

/// Simulated motion controller
pub mod sim;

/// Motion completion supervisor
pub mod supervisor;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use auto_tf::{Alliance, AutoTransform, Side};
pub use ctx::AutoCtx;
pub use error::AutoError;
pub use frame::{CoordinateContext, FieldOrigin, FieldPoint, RelativePoint};
pub use supervisor::{Outcome, WaitReport, WaitRequest};
