// Message types exchanged over the runtime's pub/sub surface

use serde::{Deserialize, Serialize};

use crate::swerve::types::ChassisSpeeds;

/// Chassis velocity command from teleop/scripts -> runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChassisCommand {
    /// Forward velocity, m/s (positive = forward)
    pub vx_ms: f64,
    /// Lateral velocity, m/s (positive = left)
    pub vy_ms: f64,
    /// Rotational velocity, rad/s (positive = counter-clockwise)
    pub omega_rad_s: f64,
}

impl From<&ChassisCommand> for ChassisSpeeds {
    fn from(cmd: &ChassisCommand) -> Self {
        ChassisSpeeds {
            vx_ms: cmd.vx_ms,
            vy_ms: cmd.vy_ms,
            omega_rad_s: cmd.omega_rad_s,
        }
    }
}

/// Per-module measured state, runtime -> dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleTelemetry {
    pub location: String,
    pub speed_ms: f64,
    pub angle_deg: f64,
    pub absolute_angle_deg: f64,
    pub reference_angle_deg: f64,
}

/// Aggregated drivetrain state published once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveTelemetry {
    pub x_m: f64,
    pub y_m: f64,
    pub heading_deg: f64,
    pub modules: Vec<ModuleTelemetry>,
}

/// Health status published by the runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}
