// Swerve drivetrain module
//
// Provides:
// - Wheel-heading angle model (wrapped and unwrapped representations)
// - Drive/steer/encoder controller traits with STS-servo and simulation backends
// - Per-module steering optimization (minimal wheel travel, drive sign flip)
// - Four-module drivetrain coordinator with odometry

pub mod angle;
pub mod backend;
pub mod controller;
pub mod convergence;
pub mod drive;
pub mod module;
pub mod registry;
pub mod types;

pub use angle::{ContinuousAngle, DiscreetAngle};
pub use drive::{SwerveDrive, SwerveDriveConfig, SwerveModuleConfig};
pub use module::SwerveModule;
pub use registry::DeviceRegistry;
