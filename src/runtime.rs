// 50 Hz control loop with watchdog
//
// If teleop crashes and stops publishing commands, the watchdog stops the
// drivetrain instead of replaying the last command forever. Stopping holds
// the current wheel headings, so recovery does not lurch.

use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{info, warn};

use crate::chassis::{DeadReckoningEstimator, RectangularKinematics};
use crate::config::{
    self, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_CHASSIS, TOPIC_HEALTH, TOPIC_RT_TELEMETRY,
};
use crate::error::Result;
use crate::messages::{ChassisCommand, DriveTelemetry, ModuleTelemetry, RuntimeHealth};
use crate::swerve::angle::DiscreetAngle;
use crate::swerve::backend::{
    DriveBackend, EncoderBackend, SteerBackend, StsDriveConfig, StsEncoderConfig, StsSteerConfig,
};
use crate::swerve::drive::{SwerveDrive, SwerveDriveConfig};
use crate::swerve::registry::DeviceRegistry;
use crate::swerve::types::{ChassisSpeeds, ModuleLocation};

struct Runtime {
    latest_cmd: Option<ChassisCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Runtime {
    fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    fn on_command(&mut self, cmd: ChassisCommand) {
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Command to apply this cycle, or None when the watchdog tripped.
    fn actuation(&mut self) -> Option<ChassisSpeeds> {
        let cmd_age = self.cmd_received_at.elapsed();
        if cmd_age > CMD_TIMEOUT || self.latest_cmd.is_none() {
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping drivetrain", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            None
        } else {
            self.health = RuntimeHealth::Ok;
            self.latest_cmd.as_ref().map(ChassisSpeeds::from)
        }
    }
}

fn build_drivetrain() -> Result<SwerveDrive> {
    let drive_config = SwerveDriveConfig {
        max_speed_ms: config::MAX_SPEED_MS,
        kinematics: Box::new(RectangularKinematics::new(
            config::WHEEL_BASE_M,
            config::TRACK_WIDTH_M,
        )),
        estimator: Box::new(DeadReckoningEstimator::new()),
        // No gyro on the bench setup yet; dead reckoning runs unrotated.
        gyro_angle: Box::new(|| DiscreetAngle::ZERO),
    };

    if config::HARDWARE_ENABLED {
        info!("Opening servo bus on {}", config::BUS_PORT);
        let registry = DeviceRegistry::open(config::BUS_PORT)?;
        SwerveDrive::new(
            drive_config,
            config::module_configs(),
            config::GEAR_RATIO,
            DriveBackend::Sts(StsDriveConfig {
                gains: config::DRIVE_GAINS,
                current_limit_ma: Some(38_000),
                nominal_voltage: Some(12.0),
            }),
            SteerBackend::Sts(StsSteerConfig {
                gains: config::STEER_GAINS,
                current_limit_ma: Some(38_000),
                nominal_voltage: Some(12.0),
            }),
            EncoderBackend::Sts(StsEncoderConfig { inverted: false }),
            Some(&registry),
        )
    } else {
        info!("Hardware disabled, using simulation backends");
        SwerveDrive::new(
            drive_config,
            config::module_configs(),
            config::GEAR_RATIO,
            DriveBackend::Sim {
                gains: config::DRIVE_GAINS,
            },
            SteerBackend::Sim,
            EncoderBackend::Sim {
                wheel_angle: DiscreetAngle::ZERO,
            },
            None,
        )
    }
}

fn collect_telemetry(drive: &mut SwerveDrive) -> Result<DriveTelemetry> {
    let pose = drive.estimated_position();
    let mut modules = Vec::with_capacity(4);
    for location in ModuleLocation::ALL {
        modules.push(ModuleTelemetry {
            location: location.label().to_string(),
            speed_ms: drive.drive_speed_ms(location)?,
            angle_deg: drive.steer_angle(location)?.degrees(),
            absolute_angle_deg: drive.steer_absolute_angle(location)?.degrees(),
            reference_angle_deg: drive.steer_reference_angle(location).degrees(),
        });
    }
    Ok(DriveTelemetry {
        x_m: pose.x_m,
        y_m: pose.y_m,
        heading_deg: pose.heading.degrees(),
        modules,
    })
}

pub async fn run() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Device construction blocks on configuration convergence; it must
    // finish before the first tick, never during one.
    let mut drive = build_drivetrain()?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_CHASSIS).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_RT_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_CHASSIS);
    info!("Publishing to: {}, {}", TOPIC_RT_TELEMETRY, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ChassisCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Apply the command, or stop if the watchdog tripped
        match runtime.actuation() {
            Some(speeds) => drive.set_open_loop_speed(speeds)?,
            None => drive.stop()?,
        }

        // 3. Integrate odometry and run module cycle-local logic
        drive.periodic()?;

        // 4. Publish telemetry and health
        let telemetry = collect_telemetry(&mut drive)?;
        pub_telemetry.put(serde_json::to_string(&telemetry)?).await?;
        pub_health
            .put(serde_json::to_string(&runtime.health)?)
            .await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_starts_stale() {
        let mut runtime = Runtime::new();
        assert!(runtime.actuation().is_none());
        assert_eq!(runtime.health, RuntimeHealth::CmdStale);
    }

    #[test]
    fn fresh_command_is_applied() {
        let mut runtime = Runtime::new();
        runtime.on_command(ChassisCommand {
            vx_ms: 1.0,
            vy_ms: 0.0,
            omega_rad_s: 0.0,
        });
        let speeds = runtime.actuation().unwrap();
        assert_eq!(speeds.vx_ms, 1.0);
        assert_eq!(runtime.health, RuntimeHealth::Ok);
    }

    #[test]
    fn stale_command_trips_the_watchdog() {
        let mut runtime = Runtime::new();
        runtime.on_command(ChassisCommand {
            vx_ms: 1.0,
            vy_ms: 0.0,
            omega_rad_s: 0.0,
        });
        runtime.cmd_received_at = Instant::now() - CMD_TIMEOUT - Duration::from_millis(10);
        assert!(runtime.actuation().is_none());
        assert_eq!(runtime.health, RuntimeHealth::CmdStale);

        // A new command recovers
        runtime.on_command(ChassisCommand {
            vx_ms: 0.5,
            vy_ms: 0.0,
            omega_rad_s: 0.0,
        });
        assert!(runtime.actuation().is_some());
    }

    #[test]
    fn sim_drivetrain_builds_and_runs_a_cycle() {
        let mut drive = build_drivetrain().unwrap();
        drive
            .set_open_loop_speed(ChassisSpeeds::new(0.5, 0.0, 0.0))
            .unwrap();
        drive.periodic().unwrap();
        let telemetry = collect_telemetry(&mut drive).unwrap();
        assert_eq!(telemetry.modules.len(), 4);
        assert_eq!(telemetry.modules[0].location, "Front left");
    }
}
