// Shared value types for the swerve layer

use crate::swerve::angle::{ContinuousAngle, DiscreetAngle};

/// Chassis corner position of a module, with a fixed array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleLocation {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl ModuleLocation {
    pub const ALL: [ModuleLocation; 4] = [
        ModuleLocation::FrontLeft,
        ModuleLocation::FrontRight,
        ModuleLocation::BackLeft,
        ModuleLocation::BackRight,
    ];

    pub fn index(&self) -> usize {
        match self {
            ModuleLocation::FrontLeft => 0,
            ModuleLocation::FrontRight => 1,
            ModuleLocation::BackLeft => 2,
            ModuleLocation::BackRight => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModuleLocation::FrontLeft => "Front left",
            ModuleLocation::FrontRight => "Front right",
            ModuleLocation::BackLeft => "Back left",
            ModuleLocation::BackRight => "Back right",
        }
    }
}

/// Mechanical constants of one module type.
///
/// A gear ratio represents a unique mechanical configuration: the same
/// module sold with different pinions gets one constant per variant (see
/// [`ratios`]). Created once at startup, never mutated.
#[derive(Debug, Clone, Copy)]
pub struct GearRatio {
    /// Distance the wheel travels per wheel turn, in meters.
    pub wheel_circumference_m: f64,
    /// Overall drive reduction: motor rotations times this value gives
    /// wheel rotations.
    pub drive_reduction: f64,
    /// Whether the drive motor must be inverted for positive speed to move
    /// the robot forward.
    pub drive_inverted: bool,
    /// Overall steer reduction: motor rotations times this value gives
    /// steering mechanism rotations.
    pub steer_reduction: f64,
    /// Whether the steer motor must be inverted for positive speed to be
    /// counter-clockwise.
    pub steer_inverted: bool,
}

impl GearRatio {
    pub fn with_wheel_circumference(self, wheel_circumference_m: f64) -> Self {
        Self {
            wheel_circumference_m,
            ..self
        }
    }
}

/// Gear ratio presets for the 3in-wheel module family this chassis uses.
pub mod ratios {
    use super::GearRatio;
    use std::f64::consts::PI;

    const WHEEL_CIRCUMFERENCE_M: f64 = 0.0762 * PI;
    const STEER_REDUCTION: f64 = (1.0 / 2.89) * (1.0 / 3.61) * (14.0 / 62.0);

    pub const SWERVE_3IN_LOW: GearRatio = GearRatio {
        wheel_circumference_m: WHEEL_CIRCUMFERENCE_M,
        drive_reduction: (12.0 / 22.0) * (15.0 / 45.0),
        drive_inverted: true,
        steer_reduction: STEER_REDUCTION,
        steer_inverted: true,
    };

    pub const SWERVE_3IN_MID: GearRatio = GearRatio {
        drive_reduction: (13.0 / 22.0) * (15.0 / 45.0),
        ..SWERVE_3IN_LOW
    };

    pub const SWERVE_3IN_HIGH: GearRatio = GearRatio {
        drive_reduction: (14.0 / 22.0) * (15.0 / 45.0),
        ..SWERVE_3IN_LOW
    };
}

/// Closed-loop gains pushed to an actuator at construction time.
///
/// Fields default to NaN so an unset gain is detectable before any hardware
/// write happens.
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    /// Feed-forward. May stay NaN, in which case backends derive one from
    /// the module's maximum speed.
    pub ff: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            p: f64::NAN,
            i: f64::NAN,
            d: f64::NAN,
            ff: f64::NAN,
        }
    }
}

impl PidGains {
    pub fn new(p: f64, i: f64, d: f64) -> Self {
        Self {
            p,
            i,
            d,
            ff: f64::NAN,
        }
    }

    pub fn with_ff(self, ff: f64) -> Self {
        Self { ff, ..self }
    }

    pub fn is_set(&self) -> bool {
        !self.p.is_nan() && !self.i.is_nan() && !self.d.is_nan()
    }

    pub fn has_feed_forward(&self) -> bool {
        !self.ff.is_nan()
    }
}

/// Chassis-level velocity command in the robot frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChassisSpeeds {
    /// Forward velocity, m/s.
    pub vx_ms: f64,
    /// Leftward velocity, m/s.
    pub vy_ms: f64,
    /// Counter-clockwise rotation, rad/s.
    pub omega_rad_s: f64,
}

impl ChassisSpeeds {
    pub const STOP: ChassisSpeeds = ChassisSpeeds {
        vx_ms: 0.0,
        vy_ms: 0.0,
        omega_rad_s: 0.0,
    };

    pub fn new(vx_ms: f64, vy_ms: f64, omega_rad_s: f64) -> Self {
        Self {
            vx_ms,
            vy_ms,
            omega_rad_s,
        }
    }
}

/// One wheel's commanded or measured (speed, heading) vector.
#[derive(Debug, Clone, Copy)]
pub struct ModuleState {
    pub speed_ms: f64,
    pub angle: DiscreetAngle,
}

impl ModuleState {
    pub fn new(speed_ms: f64, angle: DiscreetAngle) -> Self {
        Self { speed_ms, angle }
    }
}

/// One wheel's accumulated (distance, heading) pair, for odometry.
#[derive(Debug, Clone, Copy)]
pub struct ModulePosition {
    pub distance_m: f64,
    pub angle: ContinuousAngle,
}

/// Estimated robot pose in the field frame.
#[derive(Debug, Clone, Copy)]
pub struct Pose2d {
    pub x_m: f64,
    pub y_m: f64,
    pub heading: DiscreetAngle,
}

impl Pose2d {
    pub const ORIGIN: Pose2d = Pose2d {
        x_m: 0.0,
        y_m: 0.0,
        heading: DiscreetAngle::ZERO,
    };
}
