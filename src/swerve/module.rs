// One chassis corner: a drive controller / steer controller pair and the
// steering optimization that turns an arbitrary target heading into a
// minimal-rotation actuator command.

use std::f64::consts::{FRAC_PI_2, PI};

use crate::error::Result;
use crate::swerve::angle::{ContinuousAngle, DiscreetAngle};
use crate::swerve::controller::{DriveController, SteerController, SteerSetPoint};
use crate::swerve::types::{ModulePosition, ModuleState};

const TWO_PI: f64 = 2.0 * PI;

/// A swerve module. Owns its two controllers exclusively and permanently.
pub struct SwerveModule {
    drive_controller: Box<dyn DriveController>,
    steer_controller: Box<dyn SteerController>,
}

impl SwerveModule {
    pub fn new(
        drive_controller: Box<dyn DriveController>,
        steer_controller: Box<dyn SteerController>,
    ) -> Self {
        Self {
            drive_controller,
            steer_controller,
        }
    }

    /// Computes the minimal-rotation steer command for a desired heading.
    ///
    /// The target is compared against the wrapped equivalent of the current
    /// heading, so the difference never grows across accumulated
    /// revolutions. The difference is brought into `[-pi, pi)` with a single
    /// correction (one target/current pair is always within one revolution
    /// of normalizable), then, when it exceeds a quarter turn, the drive
    /// direction is reversed instead of rotating further: a wheel pointing
    /// backward driving in reverse produces the same chassis motion. A
    /// difference of exactly ±pi/2 passes through un-flipped.
    ///
    /// The returned target is relative to the unwrapped current angle so the
    /// position setpoint stays continuous.
    pub fn steer_setpoint(
        target_angle: DiscreetAngle,
        current_angle: ContinuousAngle,
    ) -> SteerSetPoint {
        let mut drive_sign = 1.0;
        let mut difference = target_angle.radians() - current_angle.as_discreet().radians();

        if difference >= PI {
            difference -= TWO_PI;
        } else if difference < -PI {
            difference += TWO_PI;
        }

        if difference > FRAC_PI_2 {
            difference -= PI;
            drive_sign = -1.0;
        } else if difference < -FRAC_PI_2 {
            difference += PI;
            drive_sign = -1.0;
        }

        SteerSetPoint {
            drive_sign,
            target_angle: current_angle.plus(ContinuousAngle::from_radians(difference)),
        }
    }

    pub fn set_open_loop_speed(&mut self, drive_pct: f64, steer_angle: DiscreetAngle) -> Result<()> {
        let set_point = Self::steer_setpoint(steer_angle, self.steer_controller.angle()?);
        self.steer_controller
            .set_reference_angle(set_point.target_angle)?;
        self.drive_controller
            .set_open_loop_speed(drive_pct * set_point.drive_sign)
    }

    pub fn set_closed_loop_speed(&mut self, speed_ms: f64, steer_angle: DiscreetAngle) -> Result<()> {
        let set_point = Self::steer_setpoint(steer_angle, self.steer_controller.angle()?);
        self.steer_controller
            .set_reference_angle(set_point.target_angle)?;
        self.drive_controller
            .set_closed_loop_speed(speed_ms * set_point.drive_sign)
    }

    /// Measured (speed, wrapped heading) for odometry and telemetry.
    pub fn state(&mut self) -> Result<ModuleState> {
        Ok(ModuleState {
            speed_ms: self.drive_controller.speed_ms()?,
            angle: self.steer_controller.angle()?.as_discreet(),
        })
    }

    /// Accumulated (distance, unwrapped heading) for odometry.
    pub fn position(&mut self) -> Result<ModulePosition> {
        Ok(ModulePosition {
            distance_m: self.drive_controller.position_m()?,
            angle: self.steer_controller.angle()?,
        })
    }

    pub fn steer_absolute_angle(&mut self) -> Result<DiscreetAngle> {
        self.steer_controller.absolute_angle()
    }

    pub fn steer_angle(&mut self) -> Result<ContinuousAngle> {
        self.steer_controller.angle()
    }

    pub fn steer_reference_angle(&self) -> ContinuousAngle {
        self.steer_controller.reference_angle()
    }

    pub fn steer_output(&mut self) -> Result<f64> {
        self.steer_controller.output()
    }

    pub fn drive_position_m(&mut self) -> Result<f64> {
        self.drive_controller.position_m()
    }

    pub fn drive_position_native_units(&mut self) -> Result<f64> {
        self.drive_controller.position_native_units()
    }

    pub fn drive_speed_ms(&mut self) -> Result<f64> {
        self.drive_controller.speed_ms()
    }

    pub fn reference_speed_ms(&self) -> f64 {
        self.drive_controller.reference_speed_ms()
    }

    pub fn drive_output(&mut self) -> Result<f64> {
        self.drive_controller.output()
    }

    pub fn periodic(&mut self) -> Result<()> {
        self.steer_controller.periodic()
    }
}
