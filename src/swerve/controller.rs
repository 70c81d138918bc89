// Capability interfaces for the heterogeneous module hardware
//
// The rest of the system addresses "a drive controller", "a steer
// controller" or "an absolute encoder" through these traits without knowing
// which silicon implements them. Vendor selection happens once, at
// construction, from the backend configs in `backend::`.

use crate::error::Result;
use crate::swerve::angle::{ContinuousAngle, DiscreetAngle};

/// Wheel drive actuator: linear speed along the wheel's heading.
///
/// Open-loop and closed-loop are mutually exclusive modes selected by which
/// setter was called most recently; the last call wins and is re-applied
/// every control cycle.
pub trait DriveController: Send {
    /// Raw output, `pct` in `[-1, 1]`.
    fn set_open_loop_speed(&mut self, pct: f64) -> Result<()>;

    /// Feedback-controlled speed target, m/s.
    fn set_closed_loop_speed(&mut self, speed_ms: f64) -> Result<()>;

    fn speed_ms(&mut self) -> Result<f64>;

    fn position_m(&mut self) -> Result<f64>;

    /// Distance travelled in the encoder's native units (motor ticks).
    fn position_native_units(&mut self) -> Result<f64>;

    fn reference_speed_ms(&self) -> f64;

    /// Applied output duty cycle, `[-1, 1]`.
    fn output(&mut self) -> Result<f64>;
}

/// Wheel steering actuator: position-controlled heading.
///
/// The relative, accumulated angle is what the position loop tracks; it must
/// be able to exceed one revolution so the optimizer can command e.g. 540
/// degrees without wrapping mid-rotation. The absolute angle is ground truth
/// from the absolute sensor, used once at startup to seed the relative angle.
pub trait SteerController: Send {
    fn reference_angle(&self) -> ContinuousAngle;

    fn set_reference_angle(&mut self, reference: ContinuousAngle) -> Result<()>;

    /// Unwrapped, accumulated mechanism heading.
    fn angle(&mut self) -> Result<ContinuousAngle>;

    /// Wrapped heading from the absolute sensor.
    fn absolute_angle(&mut self) -> Result<DiscreetAngle>;

    /// Applied output duty cycle, `[-1, 1]`.
    fn output(&mut self) -> Result<f64>;

    /// Cycle-local logic, invoked once per control loop (e.g. an
    /// at-reference check that cuts output to avoid dither).
    fn periodic(&mut self) -> Result<()>;
}

/// Absolute heading sensor, independent of motor rotation count and immune
/// to power-cycle loss of position. Corrected for the per-module mechanical
/// mounting offset and an optional inversion at construction.
pub trait AbsoluteEncoder: Send {
    fn absolute_angle(&mut self) -> Result<DiscreetAngle>;
}

/// Result of the steering optimization for one command cycle.
#[derive(Debug, Clone, Copy)]
pub struct SteerSetPoint {
    /// `+1.0` or `-1.0`; multiplied into the requested drive speed.
    pub drive_sign: f64,
    /// Unwrapped target for the steer position loop.
    pub target_angle: ContinuousAngle,
}
