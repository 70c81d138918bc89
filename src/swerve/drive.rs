// Drivetrain coordinator: owns the four modules, fans chassis commands out
// through the kinematics collaborator and aggregates module telemetry.

use tracing::info;

use crate::error::Result;
use crate::swerve::angle::{ContinuousAngle, DiscreetAngle};
use crate::swerve::backend::{self, DriveBackend, EncoderBackend, SteerBackend};
use crate::swerve::module::SwerveModule;
use crate::swerve::registry::DeviceRegistry;
use crate::swerve::types::{
    ChassisSpeeds, GearRatio, ModuleLocation, ModulePosition, ModuleState, Pose2d,
};

/// Chassis kinematics, supplied by the surrounding application.
/// States and positions are ordered FrontLeft, FrontRight, BackLeft,
/// BackRight (`ModuleLocation` index order).
pub trait SwerveKinematics: Send {
    /// Inverse kinematics: chassis velocity to four wheel vectors.
    fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleState; 4];

    /// Forward kinematics: four wheel vectors to chassis velocity.
    fn to_chassis_speeds(&self, states: &[ModuleState; 4]) -> ChassisSpeeds;
}

/// Pose estimator, supplied by the surrounding application.
pub trait PoseEstimator: Send {
    fn update(&mut self, gyro_angle: DiscreetAngle, positions: &[ModulePosition; 4]);

    fn estimated_position(&self) -> Pose2d;

    fn reset(&mut self, gyro_angle: DiscreetAngle, positions: &[ModulePosition; 4], pose: Pose2d);
}

pub type GyroSupplier = Box<dyn Fn() -> DiscreetAngle + Send>;

/// Bus wiring of one module.
#[derive(Debug, Clone, Copy)]
pub struct SwerveModuleConfig {
    pub drive_id: u8,
    pub steer_id: u8,
    pub encoder_id: u8,
    /// Absolute encoder reading when the wheel points straight forward.
    pub align_angle: DiscreetAngle,
}

/// Drivetrain-wide wiring: the external collaborators and the speed limit.
pub struct SwerveDriveConfig {
    pub max_speed_ms: f64,
    pub kinematics: Box<dyn SwerveKinematics>,
    pub estimator: Box<dyn PoseEstimator>,
    pub gyro_angle: GyroSupplier,
}

pub struct SwerveDrive {
    modules: [SwerveModule; 4],
    max_speed_ms: f64,
    kinematics: Box<dyn SwerveKinematics>,
    estimator: Box<dyn PoseEstimator>,
    gyro_angle: GyroSupplier,
}

impl SwerveDrive {
    /// Builds the four modules and seeds the estimator at the origin.
    ///
    /// Module configs are in `ModuleLocation` index order. `registry` is
    /// the serial bus registry for hardware backends; simulation-only
    /// drivetrains pass `None`.
    pub fn new(
        config: SwerveDriveConfig,
        module_configs: [SwerveModuleConfig; 4],
        gear_ratio: GearRatio,
        drive_backend: DriveBackend,
        steer_backend: SteerBackend,
        encoder_backend: EncoderBackend,
        registry: Option<&DeviceRegistry>,
    ) -> Result<Self> {
        backend::ensure_same_family(&drive_backend, &steer_backend, &encoder_backend)?;

        let build_module = |module_config: &SwerveModuleConfig| -> Result<SwerveModule> {
            let absolute_encoder = encoder_backend.build(
                registry,
                module_config.encoder_id,
                module_config.align_angle,
            )?;
            let steer = steer_backend.build(
                registry,
                module_config.steer_id,
                &gear_ratio,
                absolute_encoder,
            )?;
            let drive = drive_backend.build(
                registry,
                module_config.drive_id,
                &gear_ratio,
                config.max_speed_ms,
            )?;
            Ok(SwerveModule::new(drive, steer))
        };

        let mut modules = [
            build_module(&module_configs[0])?,
            build_module(&module_configs[1])?,
            build_module(&module_configs[2])?,
            build_module(&module_configs[3])?,
        ];
        for location in ModuleLocation::ALL {
            info!("{} module initialized", location.label());
        }

        let positions = Self::positions_of(&mut modules)?;
        let mut estimator = config.estimator;
        estimator.reset((config.gyro_angle)(), &positions, Pose2d::ORIGIN);

        Ok(Self {
            modules,
            max_speed_ms: config.max_speed_ms,
            kinematics: config.kinematics,
            estimator,
            gyro_angle: config.gyro_angle,
        })
    }

    fn positions_of(modules: &mut [SwerveModule; 4]) -> Result<[ModulePosition; 4]> {
        Ok([
            modules[0].position()?,
            modules[1].position()?,
            modules[2].position()?,
            modules[3].position()?,
        ])
    }

    fn module_positions(&mut self) -> Result<[ModulePosition; 4]> {
        Self::positions_of(&mut self.modules)
    }

    fn module_states(&mut self) -> Result<[ModuleState; 4]> {
        Ok([
            self.modules[0].state()?,
            self.modules[1].state()?,
            self.modules[2].state()?,
            self.modules[3].state()?,
        ])
    }

    /// Uniformly scales wheel speeds down so none exceeds `max_speed_ms`,
    /// preserving their ratios and directions. Must run after kinematics
    /// conversion and before dispatch, or individual wheels would receive
    /// physically unachievable commands and the chassis would silently
    /// deviate from the commanded trajectory.
    pub fn desaturate_wheel_speeds(states: &mut [ModuleState; 4], max_speed_ms: f64) {
        let highest = states
            .iter()
            .map(|state| state.speed_ms.abs())
            .fold(0.0, f64::max);
        if highest > max_speed_ms {
            let scale = max_speed_ms / highest;
            for state in states.iter_mut() {
                state.speed_ms *= scale;
            }
        }
    }

    /// Low-level open-loop dispatch. Speeds are converted to output
    /// fractions of the maximum speed.
    pub fn set_open_loop_module_states(&mut self, states: &[ModuleState; 4]) -> Result<()> {
        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_open_loop_speed(state.speed_ms / self.max_speed_ms, state.angle)?;
        }
        Ok(())
    }

    /// Low-level closed-loop dispatch, for path followers needing direct
    /// module-state control. Prefer `set_closed_loop_speed`.
    pub fn set_closed_loop_module_states(&mut self, states: &[ModuleState; 4]) -> Result<()> {
        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_closed_loop_speed(state.speed_ms, state.angle)?;
        }
        Ok(())
    }

    pub fn set_open_loop_speed(&mut self, chassis_speeds: ChassisSpeeds) -> Result<()> {
        let mut states = self.kinematics.to_module_states(chassis_speeds);
        Self::desaturate_wheel_speeds(&mut states, self.max_speed_ms);
        self.set_open_loop_module_states(&states)
    }

    pub fn set_closed_loop_speed(&mut self, chassis_speeds: ChassisSpeeds) -> Result<()> {
        let mut states = self.kinematics.to_module_states(chassis_speeds);
        Self::desaturate_wheel_speeds(&mut states, self.max_speed_ms);
        self.set_closed_loop_module_states(&states)
    }

    /// Measured chassis velocity via forward kinematics.
    pub fn chassis_speeds(&mut self) -> Result<ChassisSpeeds> {
        let states = self.module_states()?;
        Ok(self.kinematics.to_chassis_speeds(&states))
    }

    /// Commands zero speed at each module's current heading. Not a neutral
    /// state: headings are held so the next command does not lurch through
    /// a heading reset.
    pub fn stop(&mut self) -> Result<()> {
        for module in self.modules.iter_mut() {
            let heading = module.steer_angle()?.as_discreet();
            module.set_open_loop_speed(0.0, heading)?;
        }
        Ok(())
    }

    /// Steers every wheel to `angle` at rest. Diagnostic/calibration
    /// command, e.g. for tuning the steer position loop.
    pub fn steer_all_wheels_to(&mut self, angle: DiscreetAngle) -> Result<()> {
        for module in self.modules.iter_mut() {
            module.set_open_loop_speed(0.0, angle)?;
        }
        Ok(())
    }

    /// Once-per-control-cycle hook: integrates odometry and runs each
    /// module's cycle-local logic.
    pub fn periodic(&mut self) -> Result<()> {
        let positions = self.module_positions()?;
        self.estimator.update((self.gyro_angle)(), &positions);
        for module in self.modules.iter_mut() {
            module.periodic()?;
        }
        Ok(())
    }

    pub fn estimated_position(&self) -> Pose2d {
        self.estimator.estimated_position()
    }

    pub fn reset_estimated_position(&mut self, actual_pose: Pose2d) -> Result<()> {
        let positions = self.module_positions()?;
        self.estimator
            .reset((self.gyro_angle)(), &positions, actual_pose);
        Ok(())
    }

    fn module(&mut self, location: ModuleLocation) -> &mut SwerveModule {
        &mut self.modules[location.index()]
    }

    pub fn steer_absolute_angle(&mut self, location: ModuleLocation) -> Result<DiscreetAngle> {
        self.module(location).steer_absolute_angle()
    }

    pub fn steer_angle(&mut self, location: ModuleLocation) -> Result<ContinuousAngle> {
        self.module(location).steer_angle()
    }

    pub fn steer_reference_angle(&mut self, location: ModuleLocation) -> ContinuousAngle {
        self.module(location).steer_reference_angle()
    }

    pub fn steer_output(&mut self, location: ModuleLocation) -> Result<f64> {
        self.module(location).steer_output()
    }

    pub fn drive_speed_ms(&mut self, location: ModuleLocation) -> Result<f64> {
        self.module(location).drive_speed_ms()
    }

    pub fn drive_position_m(&mut self, location: ModuleLocation) -> Result<f64> {
        self.module(location).drive_position_m()
    }

    /// Distance travelled in the drive encoder's native units (motor
    /// ticks).
    pub fn drive_position_native_units(&mut self, location: ModuleLocation) -> Result<f64> {
        self.module(location).drive_position_native_units()
    }

    pub fn reference_speed_ms(&mut self, location: ModuleLocation) -> f64 {
        self.module(location).reference_speed_ms()
    }

    pub fn drive_output(&mut self, location: ModuleLocation) -> Result<f64> {
        self.module(location).drive_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chassis::{DeadReckoningEstimator, RectangularKinematics};
    use crate::swerve::types::{PidGains, ratios};

    const EPSILON: f64 = 1e-9;

    fn sim_drivetrain(max_speed_ms: f64) -> SwerveDrive {
        let module_config = SwerveModuleConfig {
            drive_id: 0,
            steer_id: 0,
            encoder_id: 0,
            align_angle: DiscreetAngle::ZERO,
        };
        SwerveDrive::new(
            SwerveDriveConfig {
                max_speed_ms,
                kinematics: Box::new(RectangularKinematics::new(0.47, 0.47)),
                estimator: Box::new(DeadReckoningEstimator::new()),
                gyro_angle: Box::new(|| DiscreetAngle::ZERO),
            },
            [module_config; 4],
            ratios::SWERVE_3IN_LOW,
            DriveBackend::Sim {
                gains: PidGains::new(0.1, 0.0, 0.0),
            },
            SteerBackend::Sim,
            EncoderBackend::Sim {
                wheel_angle: DiscreetAngle::ZERO,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn forward_command_drives_all_wheels_forward() {
        let mut drive = sim_drivetrain(4.0);
        drive
            .set_open_loop_speed(ChassisSpeeds::new(2.0, 0.0, 0.0))
            .unwrap();
        for location in ModuleLocation::ALL {
            assert!(
                (drive.drive_speed_ms(location).unwrap() - 2.0).abs() < EPSILON,
                "{}",
                location.label()
            );
            let heading = drive.steer_angle(location).unwrap().as_discreet();
            assert!(heading.degrees().abs() < EPSILON, "{}", location.label());
        }
    }

    #[test]
    fn desaturation_preserves_ratios() {
        let mut states = [
            ModuleState::new(8.0, DiscreetAngle::ZERO),
            ModuleState::new(4.0, DiscreetAngle::ZERO),
            ModuleState::new(-8.0, DiscreetAngle::ZERO),
            ModuleState::new(2.0, DiscreetAngle::ZERO),
        ];
        SwerveDrive::desaturate_wheel_speeds(&mut states, 4.0);
        assert!((states[0].speed_ms - 4.0).abs() < EPSILON);
        assert!((states[1].speed_ms - 2.0).abs() < EPSILON);
        assert!((states[2].speed_ms + 4.0).abs() < EPSILON);
        assert!((states[3].speed_ms - 1.0).abs() < EPSILON);
    }

    #[test]
    fn desaturation_leaves_achievable_commands_alone() {
        let mut states = [
            ModuleState::new(1.0, DiscreetAngle::ZERO),
            ModuleState::new(2.0, DiscreetAngle::ZERO),
            ModuleState::new(3.0, DiscreetAngle::ZERO),
            ModuleState::new(-2.5, DiscreetAngle::ZERO),
        ];
        SwerveDrive::desaturate_wheel_speeds(&mut states, 4.0);
        assert!((states[2].speed_ms - 3.0).abs() < EPSILON);
    }

    #[test]
    fn overspeed_chassis_command_is_scaled_at_dispatch() {
        let mut drive = sim_drivetrain(4.0);
        drive
            .set_open_loop_speed(ChassisSpeeds::new(8.0, 0.0, 0.0))
            .unwrap();
        for location in ModuleLocation::ALL {
            let speed = drive.drive_speed_ms(location).unwrap();
            assert!(
                (speed - 4.0).abs() < EPSILON,
                "{}: {speed}",
                location.label()
            );
        }
    }

    #[test]
    fn stop_holds_current_headings() {
        let mut drive = sim_drivetrain(4.0);
        // Strafe left: all wheels at 90 degrees
        drive
            .set_open_loop_speed(ChassisSpeeds::new(0.0, 2.0, 0.0))
            .unwrap();
        drive.stop().unwrap();
        for location in ModuleLocation::ALL {
            assert!(drive.drive_speed_ms(location).unwrap().abs() < EPSILON);
            let heading = drive.steer_angle(location).unwrap().as_discreet();
            assert!(
                (heading.degrees() - 90.0).abs() < EPSILON,
                "{}: {}",
                location.label(),
                heading.degrees()
            );
        }
    }

    #[test]
    fn steer_all_wheels_is_a_rest_command() {
        let mut drive = sim_drivetrain(4.0);
        drive
            .steer_all_wheels_to(DiscreetAngle::from_degrees(45.0))
            .unwrap();
        for location in ModuleLocation::ALL {
            assert!(drive.drive_speed_ms(location).unwrap().abs() < EPSILON);
            let heading = drive.steer_angle(location).unwrap().as_discreet();
            assert!((heading.degrees() - 45.0).abs() < EPSILON);
        }
    }

    #[test]
    fn chassis_speed_read_back_matches_command() {
        let mut drive = sim_drivetrain(4.0);
        drive
            .set_open_loop_speed(ChassisSpeeds::new(1.0, 0.5, 0.0))
            .unwrap();
        let measured = drive.chassis_speeds().unwrap();
        assert!((measured.vx_ms - 1.0).abs() < 1e-6, "vx {}", measured.vx_ms);
        assert!((measured.vy_ms - 0.5).abs() < 1e-6, "vy {}", measured.vy_ms);
        assert!(measured.omega_rad_s.abs() < 1e-6);
    }

    #[test]
    fn periodic_integrates_odometry() {
        let mut drive = sim_drivetrain(4.0);
        drive
            .set_open_loop_speed(ChassisSpeeds::new(2.0, 0.0, 0.0))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        drive.periodic().unwrap();
        let pose = drive.estimated_position();
        assert!(pose.x_m > 0.05, "x {}", pose.x_m);
        assert!(pose.y_m.abs() < 0.01, "y {}", pose.y_m);
    }

    #[test]
    fn reset_estimated_position_rebases_the_pose() {
        let mut drive = sim_drivetrain(4.0);
        drive
            .reset_estimated_position(Pose2d {
                x_m: 3.0,
                y_m: -1.0,
                heading: DiscreetAngle::ZERO,
            })
            .unwrap();
        let pose = drive.estimated_position();
        assert!((pose.x_m - 3.0).abs() < EPSILON);
        assert!((pose.y_m + 1.0).abs() < EPSILON);
    }
}
