// Vendor backend selection
//
// Each capability has a closed set of backend families, selected at
// construction time by the configuration variant itself. Pairing backends
// from different families on one module is a wiring error and is rejected
// before any hardware write.

pub mod bus;
pub mod sim;
pub mod sts;

use std::sync::Arc;

use crate::error::{Result, SwerveError};
use crate::swerve::angle::DiscreetAngle;
use crate::swerve::controller::{AbsoluteEncoder, DriveController, SteerController};
use crate::swerve::registry::{DeviceRegistry, ServoDevice};
use crate::swerve::types::{GearRatio, PidGains};

/// Backend family discriminant, used for the compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFamily {
    Sts,
    Sim,
}

/// STS drive servo settings. Gains may stay unset for open-loop-only use;
/// closed-loop commands are rejected until gains are configured.
#[derive(Debug, Clone)]
pub struct StsDriveConfig {
    pub gains: PidGains,
    pub current_limit_ma: Option<u16>,
    pub nominal_voltage: Option<f64>,
}

/// STS steer servo settings. Gains are mandatory: the steer position loop
/// is always closed-loop.
#[derive(Debug, Clone)]
pub struct StsSteerConfig {
    pub gains: PidGains,
    pub current_limit_ma: Option<u16>,
    pub nominal_voltage: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StsEncoderConfig {
    pub inverted: bool,
}

/// Drive controller backend selection.
pub enum DriveBackend {
    Sts(StsDriveConfig),
    Sim { gains: PidGains },
}

/// Steer controller backend selection.
pub enum SteerBackend {
    Sts(StsSteerConfig),
    Sim,
}

/// Absolute encoder backend selection.
pub enum EncoderBackend {
    Sts(StsEncoderConfig),
    /// Fixed, already-aligned wheel heading.
    Sim { wheel_angle: DiscreetAngle },
}

fn hardware_device(
    registry: Option<&DeviceRegistry>,
    id: u8,
    role: &'static str,
) -> Result<Arc<ServoDevice>> {
    match registry {
        Some(registry) => Ok(registry.device(id)),
        None => Err(SwerveError::IncompatibleBackends {
            module: role,
            reason: "STS backend requires a serial bus registry".to_string(),
        }),
    }
}

impl DriveBackend {
    pub fn family(&self) -> BackendFamily {
        match self {
            DriveBackend::Sts(_) => BackendFamily::Sts,
            DriveBackend::Sim { .. } => BackendFamily::Sim,
        }
    }

    pub fn build(
        &self,
        registry: Option<&DeviceRegistry>,
        id: u8,
        gear_ratio: &GearRatio,
        max_speed_ms: f64,
    ) -> Result<Box<dyn DriveController>> {
        match self {
            DriveBackend::Sts(config) => Ok(Box::new(sts::StsDriveController::new(
                hardware_device(registry, id, "drive")?,
                config,
                gear_ratio,
                max_speed_ms,
            )?)),
            DriveBackend::Sim { gains } => Ok(Box::new(sim::SimDriveController::new(
                gains,
                gear_ratio,
                max_speed_ms,
            ))),
        }
    }
}

impl SteerBackend {
    pub fn family(&self) -> BackendFamily {
        match self {
            SteerBackend::Sts(_) => BackendFamily::Sts,
            SteerBackend::Sim => BackendFamily::Sim,
        }
    }

    pub fn build(
        &self,
        registry: Option<&DeviceRegistry>,
        id: u8,
        gear_ratio: &GearRatio,
        absolute_encoder: Box<dyn AbsoluteEncoder>,
    ) -> Result<Box<dyn SteerController>> {
        match self {
            SteerBackend::Sts(config) => Ok(Box::new(sts::StsSteerController::new(
                hardware_device(registry, id, "steer")?,
                config,
                gear_ratio,
                absolute_encoder,
            )?)),
            SteerBackend::Sim => Ok(Box::new(sim::SimSteerController::new(absolute_encoder)?)),
        }
    }
}

impl EncoderBackend {
    pub fn family(&self) -> BackendFamily {
        match self {
            EncoderBackend::Sts(_) => BackendFamily::Sts,
            EncoderBackend::Sim { .. } => BackendFamily::Sim,
        }
    }

    pub fn build(
        &self,
        registry: Option<&DeviceRegistry>,
        id: u8,
        align_angle: DiscreetAngle,
    ) -> Result<Box<dyn AbsoluteEncoder>> {
        match self {
            EncoderBackend::Sts(config) => Ok(Box::new(sts::StsAbsoluteEncoder::new(
                hardware_device(registry, id, "encoder")?,
                align_angle,
                config,
            )?)),
            EncoderBackend::Sim { wheel_angle } => {
                Ok(Box::new(sim::SimAbsoluteEncoder::new(*wheel_angle)))
            }
        }
    }
}

/// Rejects mixed-family wiring. The steer controller seeds from (and in the
/// integrated case shares silicon with) the encoder, so the three backends
/// of one drivetrain must come from the same family.
pub fn ensure_same_family(
    drive: &DriveBackend,
    steer: &SteerBackend,
    encoder: &EncoderBackend,
) -> Result<()> {
    let family = drive.family();
    if steer.family() != family || encoder.family() != family {
        return Err(SwerveError::IncompatibleBackends {
            module: "drivetrain",
            reason: format!(
                "drive={:?}, steer={:?}, encoder={:?} must be one family",
                drive.family(),
                steer.family(),
                encoder.family()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_families_are_rejected() {
        let drive = DriveBackend::Sim {
            gains: PidGains::default(),
        };
        let steer = SteerBackend::Sts(StsSteerConfig {
            gains: PidGains::new(0.5, 0.0, 0.1),
            current_limit_ma: None,
            nominal_voltage: None,
        });
        let encoder = EncoderBackend::Sim {
            wheel_angle: DiscreetAngle::ZERO,
        };
        let err = ensure_same_family(&drive, &steer, &encoder).unwrap_err();
        assert!(matches!(err, SwerveError::IncompatibleBackends { .. }));
    }

    #[test]
    fn matched_families_pass() {
        let drive = DriveBackend::Sim {
            gains: PidGains::default(),
        };
        let steer = SteerBackend::Sim;
        let encoder = EncoderBackend::Sim {
            wheel_angle: DiscreetAngle::ZERO,
        };
        ensure_same_family(&drive, &steer, &encoder).unwrap();
    }

    #[test]
    fn sts_without_registry_is_a_wiring_error() {
        let backend = DriveBackend::Sts(StsDriveConfig {
            gains: PidGains::default(),
            current_limit_ma: None,
            nominal_voltage: None,
        });
        let err = backend
            .build(None, 1, &crate::swerve::types::ratios::SWERVE_3IN_LOW, 4.5)
            .err()
            .unwrap();
        assert!(matches!(err, SwerveError::IncompatibleBackends { .. }));
    }
}
