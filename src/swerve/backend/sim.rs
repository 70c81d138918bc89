// Simulation backends
//
// Stand-ins for the servo hardware, used when the runtime runs without a
// chassis attached and by the module/coordinator tests. The sim drive
// integrates position from commanded speed; the sim steer tracks its
// reference perfectly, so the optimizer's output is directly observable.

use std::time::Instant;

use crate::error::{Result, SwerveError};
use crate::swerve::angle::{ContinuousAngle, DiscreetAngle};
use crate::swerve::controller::{AbsoluteEncoder, DriveController, SteerController};
use crate::swerve::types::{GearRatio, PidGains};

/// Matches the STS family resolution so native-unit telemetry is comparable
/// across backends.
const TICKS_PER_REV: f64 = 4096.0;

pub struct SimDriveController {
    max_speed_ms: f64,
    meters_per_tick: f64,
    has_gains: bool,
    speed_ms: f64,
    position_m: f64,
    reference_speed_ms: f64,
    output: f64,
    last_update: Instant,
}

impl SimDriveController {
    pub fn new(gains: &PidGains, gear_ratio: &GearRatio, max_speed_ms: f64) -> Self {
        Self {
            max_speed_ms,
            meters_per_tick: gear_ratio.wheel_circumference_m * gear_ratio.drive_reduction
                / TICKS_PER_REV,
            has_gains: gains.is_set(),
            speed_ms: 0.0,
            position_m: 0.0,
            reference_speed_ms: 0.0,
            output: 0.0,
            last_update: Instant::now(),
        }
    }

    fn integrate(&mut self) {
        let now = Instant::now();
        self.position_m += self.speed_ms * now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
    }
}

impl DriveController for SimDriveController {
    fn set_open_loop_speed(&mut self, pct: f64) -> Result<()> {
        self.integrate();
        self.output = pct.clamp(-1.0, 1.0);
        self.speed_ms = self.output * self.max_speed_ms;
        Ok(())
    }

    fn set_closed_loop_speed(&mut self, speed_ms: f64) -> Result<()> {
        if !self.has_gains {
            return Err(SwerveError::MissingPidGains { role: "drive" });
        }
        self.integrate();
        self.reference_speed_ms = speed_ms;
        self.speed_ms = speed_ms.clamp(-self.max_speed_ms, self.max_speed_ms);
        self.output = self.speed_ms / self.max_speed_ms;
        Ok(())
    }

    fn speed_ms(&mut self) -> Result<f64> {
        Ok(self.speed_ms)
    }

    fn position_m(&mut self) -> Result<f64> {
        self.integrate();
        Ok(self.position_m)
    }

    fn position_native_units(&mut self) -> Result<f64> {
        self.integrate();
        Ok(self.position_m / self.meters_per_tick)
    }

    fn reference_speed_ms(&self) -> f64 {
        self.reference_speed_ms
    }

    fn output(&mut self) -> Result<f64> {
        Ok(self.output)
    }
}

/// Perfectly-tracking steer actuator, seeded from its absolute encoder the
/// same way the hardware backend is.
pub struct SimSteerController {
    absolute_encoder: Box<dyn AbsoluteEncoder>,
    angle: ContinuousAngle,
    reference_angle: ContinuousAngle,
}

impl SimSteerController {
    pub fn new(mut absolute_encoder: Box<dyn AbsoluteEncoder>) -> Result<Self> {
        let seed = absolute_encoder.absolute_angle()?;
        Ok(Self {
            absolute_encoder,
            angle: ContinuousAngle::from_degrees(seed.degrees()),
            reference_angle: ContinuousAngle::from_degrees(0.0),
        })
    }
}

impl SteerController for SimSteerController {
    fn reference_angle(&self) -> ContinuousAngle {
        self.reference_angle
    }

    fn set_reference_angle(&mut self, reference: ContinuousAngle) -> Result<()> {
        self.reference_angle = reference;
        self.angle = reference;
        Ok(())
    }

    fn angle(&mut self) -> Result<ContinuousAngle> {
        Ok(self.angle)
    }

    fn absolute_angle(&mut self) -> Result<DiscreetAngle> {
        self.absolute_encoder.absolute_angle()
    }

    fn output(&mut self) -> Result<f64> {
        Ok(0.0)
    }

    fn periodic(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reports a fixed, already-aligned wheel heading.
pub struct SimAbsoluteEncoder {
    angle: DiscreetAngle,
}

impl SimAbsoluteEncoder {
    pub fn new(angle: DiscreetAngle) -> Self {
        Self { angle }
    }
}

impl AbsoluteEncoder for SimAbsoluteEncoder {
    fn absolute_angle(&mut self) -> Result<DiscreetAngle> {
        Ok(self.angle)
    }
}
