//! Parameters structure for the motion supervisor

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters shared by every supervised wait.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorParams {
    /// Time between polls of the motion controller.
    ///
    /// Units: milliseconds
    pub poll_interval_ms: u64,

    /// Time between progress trace lines during a wait. Zero disables tracing.
    ///
    /// Units: milliseconds
    pub trace_period_ms: u64,

    /// Extra time given to a turn's wait on top of the turn's own motion timeout.
    ///
    /// Units: milliseconds
    pub turn_grace_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SupervisorParams {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            trace_period_ms: 200,
            turn_grace_ms: 250,
        }
    }
}

impl SupervisorParams {
    /// Poll interval, never less than one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn trace_period(&self) -> Option<Duration> {
        match self.trace_period_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn turn_grace(&self) -> Duration {
        Duration::from_millis(self.turn_grace_ms)
    }
}
