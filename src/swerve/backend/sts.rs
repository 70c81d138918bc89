// STS serial-servo backends for drive, steer and absolute encoder
//
// Construction applies the vendor configuration as one batch, seeds the
// relative position feedback from the absolute sensor, then polls the
// read-back until the settings are confirmed. Configuration registers apply
// asynchronously; an unconfirmed zero reference would poison every steering
// command after it, so non-convergence aborts construction.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, SwerveError};
use crate::swerve::angle::{ContinuousAngle, DiscreetAngle};
use crate::swerve::backend::bus::{BusError, OperatingMode, Register};
use crate::swerve::backend::{StsDriveConfig, StsEncoderConfig, StsSteerConfig};
use crate::swerve::controller::{AbsoluteEncoder, DriveController, SteerController};
use crate::swerve::convergence::{wait_until_equal, wait_until_true};
use crate::swerve::registry::ServoDevice;
use crate::swerve::types::GearRatio;

/// Encoder resolution shared by the whole servo family.
const TICKS_PER_REV: f64 = 4096.0;

/// Velocity registers are in ticks per 10 ms.
const VELOCITY_PERIODS_PER_SECOND: f64 = 100.0;

/// Gain registers are fixed-point, value = gain * 1000.
const GAIN_FIXED_POINT: f64 = 1000.0;

/// Output registers are permille of full duty cycle.
const OUTPUT_PERMILLE: f64 = 1000.0;

const SETTINGS_TIMEOUT: Duration = Duration::from_millis(500);

fn gain_fixed(gain: f64) -> u16 {
    (gain * GAIN_FIXED_POINT).round().clamp(0.0, u16::MAX as f64) as u16
}

fn ensure_reachable(device: &ServoDevice) -> Result<()> {
    if device.ping()? {
        Ok(())
    } else {
        Err(SwerveError::Bus(BusError::Timeout { id: device.id() }))
    }
}

/// Read-back supplier for the convergence poll. Failed reads report NaN,
/// which never compares within tolerance.
fn read_back_u16(device: &ServoDevice, register: Register) -> f64 {
    device.read_u16(register).map(f64::from).unwrap_or(f64::NAN)
}

fn read_back_i32(device: &ServoDevice, register: Register) -> f64 {
    device
        .read_i32(register)
        .map(|v| v as f64)
        .unwrap_or(f64::NAN)
}

fn write_gains_confirmed(device: &ServoDevice, gains: [(Register, u16); 4]) -> Result<()> {
    for (register, value) in gains {
        device.write_u16(register, value)?;
        wait_until_equal(
            &format!("{:?} for servo {}", register, device.id()),
            SETTINGS_TIMEOUT,
            || read_back_u16(device, register),
            value as f64,
            0.5,
        )?;
    }
    Ok(())
}

fn apply_common_settings(
    device: &ServoDevice,
    inverted: bool,
    current_limit_ma: Option<u16>,
    nominal_voltage: Option<f64>,
) -> Result<()> {
    device.write_u8(Register::TorqueEnable, 0)?;
    device.write_u8(Register::BrakeMode, 1)?;
    device.write_u8(Register::Direction, inverted as u8)?;
    if let Some(limit) = current_limit_ma {
        device.write_u16(Register::CurrentLimit, limit)?;
    }
    if let Some(voltage) = nominal_voltage {
        device.write_u8(Register::NominalVoltage, (voltage * 10.0).round() as u8)?;
    }
    Ok(())
}

fn set_mode_confirmed(device: &ServoDevice, mode: OperatingMode) -> Result<()> {
    device.write_u8(Register::OperatingMode, mode as u8)?;
    wait_until_true(
        &format!("operating mode for servo {}", device.id()),
        SETTINGS_TIMEOUT,
        || matches!(device.read_u8(Register::OperatingMode), Ok(v) if v == mode as u8),
    )?;
    Ok(())
}

/// Drive servo in velocity (closed loop) or PWM (open loop) mode.
///
/// The two modes are exclusive; whichever setter was called last wins and
/// the mode register is only rewritten when the caller actually switches.
pub struct StsDriveController {
    device: Arc<ServoDevice>,
    meters_per_tick: f64,
    /// m/s per velocity-register unit.
    velocity_coefficient: f64,
    mode: OperatingMode,
    has_gains: bool,
    reference_speed_ms: f64,
}

impl StsDriveController {
    pub fn new(
        device: Arc<ServoDevice>,
        config: &StsDriveConfig,
        gear_ratio: &GearRatio,
        max_speed_ms: f64,
    ) -> Result<Self> {
        let meters_per_tick =
            gear_ratio.wheel_circumference_m * gear_ratio.drive_reduction / TICKS_PER_REV;
        let velocity_coefficient = meters_per_tick * VELOCITY_PERIODS_PER_SECOND;

        ensure_reachable(&device)?;
        apply_common_settings(
            &device,
            gear_ratio.drive_inverted,
            config.current_limit_ma,
            config.nominal_voltage,
        )?;

        let has_gains = config.gains.is_set();
        if has_gains {
            let ff = if config.gains.has_feed_forward() {
                config.gains.ff
            } else {
                // Full output at the module's maximum speed
                let max_velocity_units = max_speed_ms / velocity_coefficient;
                OUTPUT_PERMILLE / max_velocity_units
            };
            write_gains_confirmed(
                &device,
                [
                    (Register::PGain, gain_fixed(config.gains.p)),
                    (Register::IGain, gain_fixed(config.gains.i)),
                    (Register::DGain, gain_fixed(config.gains.d)),
                    (Register::FfGain, gain_fixed(ff)),
                ],
            )?;
        }

        set_mode_confirmed(&device, OperatingMode::Velocity)?;
        device.write_u8(Register::TorqueEnable, 1)?;
        device.write_u8(Register::Lock, 1)?;
        info!("drive servo {} configured", device.id());

        Ok(Self {
            device,
            meters_per_tick,
            velocity_coefficient,
            mode: OperatingMode::Velocity,
            has_gains,
            reference_speed_ms: 0.0,
        })
    }

    fn ensure_mode(&mut self, mode: OperatingMode) -> Result<()> {
        // Mode switches happen when the caller alternates open/closed loop,
        // which is rare; no convergence wait here since this runs inside
        // the control loop.
        if self.mode != mode {
            debug!("drive servo {} switching to {:?}", self.device.id(), mode);
            self.device.write_u8(Register::OperatingMode, mode as u8)?;
            self.mode = mode;
        }
        Ok(())
    }
}

impl DriveController for StsDriveController {
    fn set_open_loop_speed(&mut self, pct: f64) -> Result<()> {
        self.ensure_mode(OperatingMode::Pwm)?;
        let permille = (pct * OUTPUT_PERMILLE).round().clamp(-1000.0, 1000.0) as i16;
        self.device.write_i16(Register::GoalPwm, permille)?;
        Ok(())
    }

    fn set_closed_loop_speed(&mut self, speed_ms: f64) -> Result<()> {
        if !self.has_gains {
            return Err(SwerveError::MissingPidGains { role: "drive" });
        }
        self.ensure_mode(OperatingMode::Velocity)?;
        self.reference_speed_ms = speed_ms;
        let units = (speed_ms / self.velocity_coefficient)
            .round()
            .clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        self.device.write_i16(Register::GoalVelocity, units)?;
        Ok(())
    }

    fn speed_ms(&mut self) -> Result<f64> {
        let units = self.device.read_i16(Register::PresentVelocity)?;
        Ok(units as f64 * self.velocity_coefficient)
    }

    fn position_m(&mut self) -> Result<f64> {
        let ticks = self.device.read_i32(Register::PresentPosition)?;
        Ok(ticks as f64 * self.meters_per_tick)
    }

    fn position_native_units(&mut self) -> Result<f64> {
        Ok(self.device.read_i32(Register::PresentPosition)? as f64)
    }

    fn reference_speed_ms(&self) -> f64 {
        self.reference_speed_ms
    }

    fn output(&mut self) -> Result<f64> {
        let permille = self.device.read_i16(Register::PresentPwm)?;
        Ok(permille as f64 / OUTPUT_PERMILLE)
    }
}

/// Steer servo in position mode, seeded from the absolute encoder.
pub struct StsSteerController {
    device: Arc<ServoDevice>,
    absolute_encoder: Box<dyn AbsoluteEncoder>,
    /// Mechanism degrees per motor tick.
    degrees_per_tick: f64,
    reference_angle: ContinuousAngle,
    /// True once the at-reference hold snapped the goal to the present
    /// position; cleared by the next reference write.
    holding: bool,
}

/// Window inside which the position loop is considered on target and the
/// output is cut to avoid dither.
const REFERENCE_TOLERANCE_DEG: f64 = 0.25;

impl StsSteerController {
    pub fn new(
        device: Arc<ServoDevice>,
        config: &StsSteerConfig,
        gear_ratio: &GearRatio,
        mut absolute_encoder: Box<dyn AbsoluteEncoder>,
    ) -> Result<Self> {
        // Checked before any hardware write: a position loop with unset
        // gains would hold nothing.
        if !config.gains.is_set() {
            return Err(SwerveError::MissingPidGains { role: "steer" });
        }
        let degrees_per_tick = 360.0 * gear_ratio.steer_reduction / TICKS_PER_REV;

        ensure_reachable(&device)?;
        apply_common_settings(
            &device,
            gear_ratio.steer_inverted,
            config.current_limit_ma,
            config.nominal_voltage,
        )?;
        write_gains_confirmed(
            &device,
            [
                (Register::PGain, gain_fixed(config.gains.p)),
                (Register::IGain, gain_fixed(config.gains.i)),
                (Register::DGain, gain_fixed(config.gains.d)),
                (Register::FfGain, 0),
            ],
        )?;
        set_mode_confirmed(&device, OperatingMode::Position)?;

        // Seed the multi-turn counter from the absolute sensor so the
        // relative angle starts at the true mechanism heading.
        let absolute = absolute_encoder.absolute_angle()?;
        let seed_ticks = (absolute.degrees() / degrees_per_tick).round() as i32;
        device.write_i32(Register::PresentPosition, seed_ticks)?;
        wait_until_equal(
            &format!("position seed for steer servo {}", device.id()),
            SETTINGS_TIMEOUT,
            || read_back_i32(&device, Register::PresentPosition),
            seed_ticks as f64,
            2.0,
        )?;

        device.write_u8(Register::TorqueEnable, 1)?;
        device.write_u8(Register::Lock, 1)?;
        info!(
            "steer servo {} configured, seeded at {:.1} deg",
            device.id(),
            absolute.degrees()
        );

        Ok(Self {
            device,
            absolute_encoder,
            degrees_per_tick,
            reference_angle: ContinuousAngle::from_degrees(0.0),
            holding: false,
        })
    }

    fn ticks_from(&self, angle: ContinuousAngle) -> i32 {
        (angle.degrees() / self.degrees_per_tick).round() as i32
    }
}

impl SteerController for StsSteerController {
    fn reference_angle(&self) -> ContinuousAngle {
        self.reference_angle
    }

    fn set_reference_angle(&mut self, reference: ContinuousAngle) -> Result<()> {
        self.device
            .write_i32(Register::GoalPosition, self.ticks_from(reference))?;
        self.reference_angle = reference;
        self.holding = false;
        Ok(())
    }

    fn angle(&mut self) -> Result<ContinuousAngle> {
        let ticks = self.device.read_i32(Register::PresentPosition)?;
        Ok(ContinuousAngle::from_degrees(
            ticks as f64 * self.degrees_per_tick,
        ))
    }

    fn absolute_angle(&mut self) -> Result<DiscreetAngle> {
        self.absolute_encoder.absolute_angle()
    }

    fn output(&mut self) -> Result<f64> {
        let permille = self.device.read_i16(Register::PresentPwm)?;
        Ok(permille as f64 / OUTPUT_PERMILLE)
    }

    fn periodic(&mut self) -> Result<()> {
        if self.holding {
            return Ok(());
        }
        let present_ticks = self.device.read_i32(Register::PresentPosition)?;
        let actual_deg = present_ticks as f64 * self.degrees_per_tick;
        if (self.reference_angle.degrees() - actual_deg).abs() <= REFERENCE_TOLERANCE_DEG {
            // On target: snap the goal to the present position so the loop
            // stops correcting the residual and dithering against friction.
            self.device
                .write_i32(Register::GoalPosition, present_ticks)?;
            self.holding = true;
        }
        Ok(())
    }
}

/// Absolute encoder head on the servo bus (either a standalone device or
/// the magnetic encoder integrated in the steer servo, addressed by the
/// same bus id). The mechanical mounting offset is written to the device's
/// zero-offset register and confirmed before use.
pub struct StsAbsoluteEncoder {
    device: Arc<ServoDevice>,
}

impl StsAbsoluteEncoder {
    pub fn new(
        device: Arc<ServoDevice>,
        align_angle: DiscreetAngle,
        config: &StsEncoderConfig,
    ) -> Result<Self> {
        let offset_ticks = (align_angle.rotations() * TICKS_PER_REV).round() as u16;
        device.write_u16(Register::ZeroOffset, offset_ticks)?;
        device.write_u8(Register::Direction, config.inverted as u8)?;
        wait_until_equal(
            &format!("zero offset for encoder {}", device.id()),
            SETTINGS_TIMEOUT,
            || read_back_u16(&device, Register::ZeroOffset),
            offset_ticks as f64,
            0.5,
        )?;
        Ok(Self { device })
    }
}

impl AbsoluteEncoder for StsAbsoluteEncoder {
    fn absolute_angle(&mut self) -> Result<DiscreetAngle> {
        let ticks = self.device.read_i32(Register::PresentPosition)?;
        Ok(DiscreetAngle::from_rotations(ticks as f64 / TICKS_PER_REV))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swerve::backend::bus::tests::scripted_bus;
    use crate::swerve::registry::DeviceRegistry;
    use crate::swerve::types::{PidGains, ratios};

    #[test]
    fn gain_fixed_point_rounds_and_clamps() {
        assert_eq!(gain_fixed(0.5), 500);
        assert_eq!(gain_fixed(0.0004), 0);
        assert_eq!(gain_fixed(1e9), u16::MAX);
    }

    #[test]
    fn steer_without_gains_fails_before_any_write() {
        let (bus, transport) = scripted_bus();
        let registry = DeviceRegistry::with_bus(bus);
        let encoder = Box::new(crate::swerve::backend::sim::SimAbsoluteEncoder::new(
            DiscreetAngle::ZERO,
        ));
        let config = StsSteerConfig {
            gains: PidGains::default(),
            current_limit_ma: None,
            nominal_voltage: None,
        };
        let err = StsSteerController::new(
            registry.device(4),
            &config,
            &ratios::SWERVE_3IN_LOW,
            encoder,
        )
        .err()
        .unwrap();
        assert!(matches!(err, SwerveError::MissingPidGains { role: "steer" }));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn unresponsive_drive_servo_fails_construction() {
        let (bus, _transport) = scripted_bus();
        let registry = DeviceRegistry::with_bus(bus);
        let config = StsDriveConfig {
            gains: PidGains::default(),
            current_limit_ma: None,
            nominal_voltage: None,
        };
        let err =
            StsDriveController::new(registry.device(2), &config, &ratios::SWERVE_3IN_LOW, 4.5)
                .err()
                .unwrap();
        assert!(matches!(
            err,
            SwerveError::Bus(BusError::Timeout { id: 2 })
        ));
    }

    #[test]
    fn encoder_confirms_zero_offset_then_reads_wrapped_angle() {
        let (bus, transport) = scripted_bus();
        let registry = DeviceRegistry::with_bus(bus);
        let align = DiscreetAngle::from_degrees(90.0);
        let offset_ticks = 1024u16;

        transport.push_status(5, &[]); // zero offset write ack
        transport.push_status(5, &[]); // direction write ack
        transport.push_status(5, &offset_ticks.to_le_bytes()); // offset read-back
        // Present position: a quarter turn
        transport.push_status(5, &1024i32.to_le_bytes());

        let config = StsEncoderConfig { inverted: false };
        let mut encoder = StsAbsoluteEncoder::new(registry.device(5), align, &config).unwrap();
        let angle = encoder.absolute_angle().unwrap();
        assert!((angle.degrees() - 90.0).abs() < 1e-9);
    }
}
