// Timeouts, topics, chassis wiring
use std::time::Duration;

use crate::swerve::angle::DiscreetAngle;
use crate::swerve::drive::SwerveModuleConfig;
use crate::swerve::types::{GearRatio, PidGains, ratios};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_CHASSIS: &str = "swerve/cmd/chassis"; // commands
pub const TOPIC_RT_TELEMETRY: &str = "swerve/rt/telemetry"; // measured state
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for the servo field bus
pub const BUS_PORT: &str = "/dev/ttyUSB0";

// Enable hardware backends (set to false for simulation/testing)
pub const HARDWARE_ENABLED: bool = false;

// Physical maximum wheel speed
pub const MAX_SPEED_MS: f64 = 4.5;

// Chassis geometry
pub const WHEEL_BASE_M: f64 = 0.47;
pub const TRACK_WIDTH_M: f64 = 0.47;

pub const GEAR_RATIO: GearRatio = ratios::SWERVE_3IN_MID;

// Steer position loop gains
pub const STEER_GAINS: PidGains = PidGains {
    p: 0.6,
    i: 0.0,
    d: 0.06,
    ff: f64::NAN,
};

// Drive velocity loop gains (feed-forward derived from MAX_SPEED_MS)
pub const DRIVE_GAINS: PidGains = PidGains {
    p: 0.08,
    i: 0.0,
    d: 0.0,
    ff: f64::NAN,
};

// Bus ids and measured mounting offsets, ModuleLocation index order:
// front left, front right, back left, back right. Each steer servo's
// integrated encoder head answers on the steer servo's own id.
pub fn module_configs() -> [SwerveModuleConfig; 4] {
    [
        SwerveModuleConfig {
            drive_id: 1,
            steer_id: 2,
            encoder_id: 2,
            align_angle: DiscreetAngle::from_degrees(243.1),
        },
        SwerveModuleConfig {
            drive_id: 3,
            steer_id: 4,
            encoder_id: 4,
            align_angle: DiscreetAngle::from_degrees(16.7),
        },
        SwerveModuleConfig {
            drive_id: 5,
            steer_id: 6,
            encoder_id: 6,
            align_angle: DiscreetAngle::from_degrees(198.4),
        },
        SwerveModuleConfig {
            drive_id: 7,
            steer_id: 8,
            encoder_id: 8,
            align_angle: DiscreetAngle::from_degrees(87.3),
        },
    ]
}
