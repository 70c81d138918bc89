// Bounded polling for asynchronous hardware configuration
//
// Field-bus devices acknowledge a settings write immediately but apply it
// some time later; the only confirmation is the read-back. These helpers
// poll until the read-back agrees or a deadline passes. They block the
// calling thread and are only ever used during one-time device
// initialization, never from the periodic control path.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, SwerveError};

/// Fixed poll interval. Short enough not to eat the deadline budget, long
/// enough not to flood the bus with read requests (~20 ms device loop).
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `predicate` every [`POLL_INTERVAL`] until it returns true.
///
/// Returns the total time waited. If `max_wait` elapses first the
/// configuration is unconfirmed and a [`SwerveError::ConvergenceTimeout`]
/// naming `description` is returned; continuing with unconfirmed
/// configuration on a physical actuator is unsafe.
pub fn wait_until_true<F>(description: &str, max_wait: Duration, mut predicate: F) -> Result<Duration>
where
    F: FnMut() -> bool,
{
    let mut waited = Duration::ZERO;

    while !predicate() {
        if waited >= max_wait {
            return Err(SwerveError::ConvergenceTimeout {
                setting: description.to_string(),
                waited_ms: waited.as_millis() as u64,
            });
        }
        thread::sleep(POLL_INTERVAL);
        waited += POLL_INTERVAL;
    }

    debug!("{} converged after {:?}", description, waited);
    Ok(waited)
}

/// Polls `supplier` until its value is within `tolerance` of `target`.
///
/// A supplier may report NaN while the device has no valid read-back yet;
/// NaN never compares within tolerance, so it simply counts as
/// not-yet-converged.
pub fn wait_until_equal<F>(
    description: &str,
    max_wait: Duration,
    mut supplier: F,
    target: f64,
    tolerance: f64,
) -> Result<Duration>
where
    F: FnMut() -> f64,
{
    wait_until_true(description, max_wait, || {
        (supplier() - target).abs() <= tolerance
    })
}
