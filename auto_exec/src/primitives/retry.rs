//! Retry-at-reduced-speed policy

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::supervisor::Outcome;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// When, and how, a drive which ended short of its target is re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first drive. Zero disables retrying.
    pub max_attempts: u32,

    /// Factor applied to the max speed for each retry.
    pub speed_backoff: f64,

    /// A retry is only made if the drive ended farther than this from the target.
    ///
    /// Units: inches
    pub trigger_distance_in: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            speed_backoff: 0.7,
            trigger_distance_in: 3.0,
        }
    }
}

impl RetryPolicy {
    /// A policy which never retries.
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// True if another retry should be made, given `retries_made` so far and how the last drive
    /// ended.
    ///
    /// A drive whose wait converged is never retried, even if it ended outside the trigger
    /// distance.
    pub fn should_retry(&self, retries_made: u32, outcome: Outcome, distance_in: f64) -> bool {
        outcome != Outcome::Converged
            && retries_made < self.max_attempts
            && distance_in > self.trigger_distance_in
    }

    /// Max speed for the given (1 based) retry.
    pub fn retry_speed(&self, base_speed: f64, attempt: u32) -> f64 {
        base_speed * self.speed_backoff.powi(attempt as i32)
    }
}
