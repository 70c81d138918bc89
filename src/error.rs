// Error types for the swerve runtime

use crate::swerve::backend::bus::BusError;

/// Result type alias
pub type Result<T> = std::result::Result<T, SwerveError>;

/// Failures surfaced by the swerve control and hardware-abstraction layer.
///
/// Every variant is fatal at subsystem construction: a drivetrain with
/// partially-applied configuration must never reach the periodic loop.
#[derive(Debug, thiserror::Error)]
pub enum SwerveError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Timed out waiting for {setting} to converge ({waited_ms} ms)")]
    ConvergenceTimeout { setting: String, waited_ms: u64 },

    #[error("{role} controller requires PID gains but none were set")]
    MissingPidGains { role: &'static str },

    #[error("Incompatible backends for {module} module: {reason}")]
    IncompatibleBackends {
        module: &'static str,
        reason: String,
    },
}
