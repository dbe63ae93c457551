//! # Autonomy core errors

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors that can occur in the autonomy core.
///
/// Motions which end short of their target are not errors, see
/// [`Outcome`](crate::supervisor::Outcome).
#[derive(Debug, thiserror::Error)]
pub enum AutoError {
    /// The motion controller (or a sensor it depends on) has not been initialised. Nothing was
    /// commanded.
    #[error("The motion controller is not ready")]
    NotReady,

    /// A NaN or infinite value reached a command boundary. Nothing was commanded.
    #[error("Non-finite value for {0}")]
    NonFinite(&'static str),

    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Return `Err(NonFinite(what))` if any of `values` is NaN or infinite.
pub(crate) fn ensure_finite(what: &'static str, values: &[f64]) -> Result<(), AutoError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(AutoError::NonFinite(what))
    }
}
